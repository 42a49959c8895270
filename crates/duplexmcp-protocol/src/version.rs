//! Protocol revision constants and negotiation.

/// Streamable HTTP transport revision
pub const PROTOCOL_2025_03_26: &str = "2025-03-26";

/// Legacy SSE transport revision
pub const PROTOCOL_2024_11_05: &str = "2024-11-05";

/// Supported revisions, newest first.
pub const SUPPORTED_VERSIONS: &[&str] = &[PROTOCOL_2025_03_26, PROTOCOL_2024_11_05];

/// Latest revision this implementation speaks.
pub fn latest() -> &'static str {
    SUPPORTED_VERSIONS[0]
}

/// Whether a revision is supported.
pub fn is_supported(version: &str) -> bool {
    SUPPORTED_VERSIONS.contains(&version)
}

/// Negotiate the revision for a session.
///
/// The server echoes the client's requested version when it is supported and
/// otherwise answers with its own newest revision.
pub fn negotiate(requested: &str) -> &'static str {
    SUPPORTED_VERSIONS
        .iter()
        .find(|v| **v == requested)
        .copied()
        .unwrap_or_else(latest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_echoes_supported() {
        assert_eq!(negotiate("2024-11-05"), "2024-11-05");
        assert_eq!(negotiate("2025-03-26"), "2025-03-26");
    }

    #[test]
    fn test_negotiate_falls_back_to_latest() {
        assert_eq!(negotiate("2099-01-01"), PROTOCOL_2025_03_26);
        assert_eq!(negotiate(""), PROTOCOL_2025_03_26);
    }
}
