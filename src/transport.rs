//! The POST primitive the service talks through.
//!
//! Hosts plug in whatever HTTP stack their platform offers by implementing [Transport]. The
//! `reqwest` feature provides [ReqwestTransport] for native targets.
use async_trait::async_trait;

#[cfg(feature = "reqwest")]
mod reqwest_client;

#[cfg(feature = "reqwest")]
pub use reqwest_client::ReqwestTransport;

/// Content type of request envelopes.
pub const XML_CONTENT_TYPE: &str = "text/xml; charset=utf-8";

/// Failures below the protocol level. None of these are retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No connection could be made, or it broke or timed out.
    #[error("connection failed: {0}")]
    Connection(String),
    /// The server answered with a non-success HTTP status.
    #[error("HTTP status {status}")]
    HttpStatus { status: u16 },
    /// The response body could not be read as text.
    #[error("unreadable response body: {0}")]
    Body(String),
    /// No transport was configured.
    #[error("no transport configured")]
    Disabled,
}

/// Asynchronous POST of an envelope, returning the response body.
// TODO: Remove async_trait once native async fn in dyn traits is usable for the MSRV.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, url: &str, body: String) -> Result<String, TransportError>;
}

/// Implementation of [Transport] for `()` that always fails, for offline use of the builder.
#[async_trait]
impl Transport for () {
    async fn post(&self, _url: &str, _body: String) -> Result<String, TransportError> {
        Err(TransportError::Disabled)
    }
}
