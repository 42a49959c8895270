//! Pending waiters for server-initiated requests.
//!
//! When a handler calls back into the client, the outgoing request is
//! registered here and the reply (arriving on a later POST) completes the
//! waiter. Server-initiated ids live in their own namespace — string ids
//! `s-1`, `s-2`, … — so they can never collide with client-chosen ids.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use duplexmcp_protocol::{JsonRpcResponse, MessageId};

/// Prefix of the server-initiated request id namespace.
pub const SERVER_REQUEST_ID_PREFIX: &str = "s-";

/// Map of in-flight server→client requests awaiting their responses.
///
/// Each waiter completes at most once: the oneshot channel enforces the
/// single-completion invariant, and removal happens before completion so a
/// racing timeout and response cannot both claim the slot.
#[derive(Debug, Default)]
pub struct PendingRequests {
    waiters: Mutex<HashMap<MessageId, oneshot::Sender<JsonRpcResponse>>>,
    next_id: AtomicU64,
}

impl PendingRequests {
    /// Create an empty waiter map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next server-initiated request id.
    pub fn allocate_id(&self) -> MessageId {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        MessageId::String(format!("{SERVER_REQUEST_ID_PREFIX}{n}"))
    }

    /// Register a waiter for `id` and return its completion receiver.
    pub fn register(&self, id: MessageId) -> oneshot::Receiver<JsonRpcResponse> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(id, tx);
        rx
    }

    /// Complete the waiter for the response's id, if one exists.
    ///
    /// Returns `true` when the response was claimed by a waiter.
    pub fn complete(&self, response: JsonRpcResponse) -> bool {
        let Some(id) = response.message_id().cloned() else {
            return false;
        };
        let waiter = self.waiters.lock().remove(&id);
        match waiter {
            Some(tx) => tx.send(response).is_ok(),
            None => {
                debug!(%id, "response without a pending waiter, dropping");
                false
            }
        }
    }

    /// Drop the waiter for `id` (deadline elapsed or caller gave up).
    pub fn remove(&self, id: &MessageId) {
        self.waiters.lock().remove(id);
    }

    /// Drop every waiter; their receivers resolve with a closed-channel
    /// error which callers surface as cancellation.
    pub fn cancel_all(&self) {
        let drained: Vec<_> = {
            let mut waiters = self.waiters.lock();
            waiters.drain().collect()
        };
        if !drained.is_empty() {
            debug!(count = drained.len(), "cancelling pending server requests");
        }
    }

    /// Number of in-flight waiters.
    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Whether no waiters are in flight.
    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_id_namespace() {
        let pending = PendingRequests::new();
        assert_eq!(pending.allocate_id(), MessageId::String("s-1".into()));
        assert_eq!(pending.allocate_id(), MessageId::String("s-2".into()));
    }

    #[tokio::test]
    async fn test_complete_resolves_waiter() {
        let pending = PendingRequests::new();
        let id = pending.allocate_id();
        let rx = pending.register(id.clone());

        let response = JsonRpcResponse::success(json!({"ok": true}), id);
        assert!(pending.complete(response));

        let received = rx.await.unwrap();
        assert!(received.is_success());
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_complete_without_waiter_is_dropped() {
        let pending = PendingRequests::new();
        let response = JsonRpcResponse::success(json!({}), MessageId::String("s-99".into()));
        assert!(!pending.complete(response));
    }

    #[tokio::test]
    async fn test_cancel_all_wakes_receivers() {
        let pending = PendingRequests::new();
        let rx = pending.register(pending.allocate_id());
        pending.cancel_all();
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_at_most_one_completion() {
        let pending = PendingRequests::new();
        let id = pending.allocate_id();
        let _rx = pending.register(id.clone());

        let response = JsonRpcResponse::success(json!({}), id);
        assert!(pending.complete(response.clone()));
        assert!(!pending.complete(response));
    }
}
