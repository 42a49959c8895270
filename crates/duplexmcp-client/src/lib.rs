//! # DuplexMCP Client
//!
//! Streamable HTTP client for the DuplexMCP runtime: typed operations over
//! JSON or POST-SSE response shapes, client-side dispatch of
//! server-initiated requests (sampling, roots, elicitation), and a
//! resumable notification stream with exponential backoff.
//!
//! ```rust,ignore
//! use duplexmcp_client::Client;
//!
//! let client = Client::builder("http://127.0.0.1:8080").build()?;
//! client.initialize().await?;
//! let tools = client.list_tools().await?;
//! let result = client.call_tool("greet", None).await?;
//! client.close().await?;
//! ```

mod client;
mod dispatcher;
mod error;
mod transport;

pub use client::{Client, ClientBuilder};
pub use dispatcher::{
    ClientDispatcher, ElicitationHandler, NotificationCallback, SamplingHandler,
};
pub use error::{ClientError, ClientResult};
pub use transport::{
    EventStream, HttpClientConfig, HttpClientTransport, PostOutcome, RetryPolicy,
};
