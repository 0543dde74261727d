use std::future::Future;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::debug;

use crate::request::RequestUnit;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

/// Delivers one request. Implementations are shared by every worker, so they
/// must be cheap to call concurrently.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        request: &RequestUnit,
        timeout: Duration,
    ) -> impl Future<Output = Result<StatusCode, TransportError>> + Send;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder().build()?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    async fn send(
        &self,
        request: &RequestUnit,
        timeout: Duration,
    ) -> Result<StatusCode, TransportError> {
        let mut req = self
            .client
            .post(request.url.clone())
            .timeout(timeout)
            .body(request.body.clone());
        for (k, v) in &request.headers {
            req = req.header(k, v);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(timeout)
            } else {
                TransportError::Http(e)
            }
        })?;
        let status = resp.status();
        // The connection only goes back to the pool once the body is consumed.
        if let Err(e) = resp.bytes().await {
            debug!(url = %request.url, %status, error = %e, "failed to drain response body");
        }
        Ok(status)
    }
}
