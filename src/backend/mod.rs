//! Backend abstraction for HTTP client implementations

pub mod types;

#[cfg(feature = "backend-reqwest")]
pub mod reqwest;

use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use types::{BackendRequest, BackendResponse, Transport};

/// Configuration for backend creation
#[derive(Clone, Debug, Default)]
pub struct BackendConfig {
    /// Request timeout
    pub timeout: Option<Duration>,
    /// User agent string
    pub user_agent: Option<String>,
}

impl BackendConfig {
    /// Derive backend settings from the client configuration
    pub fn from_config(config: &crate::Config) -> Self {
        Self {
            timeout: Some(config.request_timeout()),
            user_agent: config.user_agent().map(str::to_string),
        }
    }
}

/// HTTP client backend implementations
#[derive(Clone)]
pub enum Backend {
    /// Cross-platform implementation using reqwest
    #[cfg(feature = "backend-reqwest")]
    Reqwest(reqwest::ReqwestBackend),

    /// Host supplied transport
    Custom(Arc<dyn Transport>),
}

impl Backend {
    /// Auto-select best backend for platform
    #[cfg(feature = "backend-reqwest")]
    pub fn default_for_platform(config: BackendConfig) -> Result<Self> {
        Ok(Backend::Reqwest(reqwest::ReqwestBackend::with_config(
            config,
        )?))
    }

    /// Use a host supplied transport
    pub fn custom(transport: impl Transport + 'static) -> Self {
        Backend::Custom(Arc::new(transport))
    }

    /// Execute an HTTP request
    pub async fn execute(&self, request: BackendRequest) -> Result<BackendResponse> {
        match self {
            #[cfg(feature = "backend-reqwest")]
            Backend::Reqwest(r) => r.execute(request).await,

            Backend::Custom(t) => t.execute(request).await,
        }
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "backend-reqwest")]
            Backend::Reqwest(_) => f.write_str("Backend::Reqwest"),
            Backend::Custom(_) => f.write_str("Backend::Custom"),
        }
    }
}
