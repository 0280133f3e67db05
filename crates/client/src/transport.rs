//! reqwest-backed [`HttpTransport`].

use async_trait::async_trait;
use bcconnect_types::{ApiError, HttpMethod, HttpRequest, HttpResponse, HttpTransport, traits::Result};
use reqwest::Client;
use std::time::Duration;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Sends [`HttpRequest`]s with a shared reqwest [`Client`].
///
/// Every received response is returned as-is, whatever its status; only a
/// missing response (connect failure, timeout, broken body) is an error.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidConfiguration`] if the TLS backend cannot be
    /// initialised.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("bcconnect/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::InvalidConfiguration(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await?;
        tracing::trace!(status, bytes = body.len(), "response received");
        Ok(HttpResponse { status, body })
    }
}
