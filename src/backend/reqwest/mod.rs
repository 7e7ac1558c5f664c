//! Reqwest backend for cross-platform HTTP support

use crate::backend::BackendConfig;
use crate::backend::types::{BackendRequest, BackendResponse};
use crate::{Error, Result};

/// Reqwest backend for cross-platform HTTP
#[derive(Clone)]
pub struct ReqwestBackend {
    client: reqwest::Client,
}

impl ReqwestBackend {
    /// Create a new Reqwest backend with configuration
    pub fn with_config(config: BackendConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();

        // Apply timeout configuration
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout).connect_timeout(timeout);
        }

        // Apply user agent configuration
        if let Some(user_agent) = config.user_agent {
            builder = builder.user_agent(user_agent);
        }

        let client = builder
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create reqwest client: {}", e)))?;

        Ok(Self { client })
    }

    /// Execute an HTTP request using reqwest
    pub async fn execute(&self, request: BackendRequest) -> Result<BackendResponse> {
        let mut req_builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);

        if !request.body.is_empty() {
            req_builder = req_builder.body(request.body);
        }

        let response = req_builder.send().await?;

        let status = response.status();
        let headers = response.headers().clone();

        // A status has been received; a broken body still yields a response.
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(%status, error = %e, "failed to read response body");
                bytes::Bytes::new()
            }
        };

        Ok(BackendResponse {
            status,
            headers,
            body,
        })
    }
}
