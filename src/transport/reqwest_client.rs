//! Reqwest-based transport.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;

use super::{Transport, TransportError, XML_CONTENT_TYPE};

/// POSTs envelopes with reqwest.
///
/// ```ignore
/// use hvmobile::transport::ReqwestTransport;
///
/// let transport = ReqwestTransport::new()?;
/// ```
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a new transport with default settings.
    ///
    /// Default timeout: 30 seconds
    pub fn new() -> anyhow::Result<Self> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn post(&self, url: &str, body: String) -> Result<String, TransportError> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", XML_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatus {
                status: status.as_u16(),
            });
        }

        response
            .text()
            .await
            .map_err(|e| TransportError::Body(e.to_string()))
    }
}
