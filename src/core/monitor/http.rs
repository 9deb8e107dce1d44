// Minimal HTTP fetch abstraction for the IP and geo workers.
//
// A trait object so workers are testable with canned responses; the
// production implementation rides isahc with a per-request timeout.

use crate::core::monitor::types::MonitorError;
use async_trait::async_trait;
use isahc::config::Configurable;
use isahc::{AsyncReadResponseExt, HttpClient, Request};
use std::time::Duration;

#[async_trait]
pub trait HttpFetcher: Send + Sync {
    /// GET the URL and return the body as text. Non-2xx is an error.
    async fn get_text(&self, url: &str, timeout: Duration) -> Result<String, MonitorError>;
}

pub struct IsahcFetcher {
    client: HttpClient,
}

impl IsahcFetcher {
    pub fn new() -> Result<Self, MonitorError> {
        let client = HttpClient::builder()
            .build()
            .map_err(|e| MonitorError::HttpError(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpFetcher for IsahcFetcher {
    async fn get_text(&self, url: &str, timeout: Duration) -> Result<String, MonitorError> {
        let request = Request::get(url)
            .timeout(timeout)
            .header(
                "User-Agent",
                concat!("netpulse/", env!("CARGO_PKG_VERSION")),
            )
            .body(())
            .map_err(|e| MonitorError::HttpError(format!("request build failed: {}", e)))?;

        let mut response = self
            .client
            .send_async(request)
            .await
            .map_err(|e| MonitorError::HttpError(format!("request failed: {}", e)))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(MonitorError::HttpError(format!("HTTP {} from {}", status, url)));
        }
        response
            .text()
            .await
            .map_err(|e| MonitorError::HttpError(format!("body read failed: {}", e)))
    }
}
