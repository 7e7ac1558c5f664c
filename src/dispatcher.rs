//! Authenticated request dispatch

use crate::backend::types::BackendRequest;
use crate::backend::{Backend, BackendConfig};
use crate::credentials::{CredentialStore, Credentials};
use crate::endpoint::{Endpoint, RequestMethod};
use crate::response::NetworkResponse;
use crate::{Config, Error, Result};
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use std::sync::{Arc, OnceLock};
use tokio::runtime::Runtime;

const ANONYMOUS_ID: HeaderName = HeaderName::from_static("anonymousid");

static BLOCKING_RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Process-wide runtime driving [`Dispatcher::send_blocking`], built on first use.
///
/// It outlives every call so pooled connections stay usable between requests.
fn blocking_runtime() -> Result<&'static Runtime> {
    if let Some(runtime) = BLOCKING_RUNTIME.get() {
        return Ok(runtime);
    }
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("ingest-transport-blocking")
        .enable_all()
        .build()
        .map_err(|e| Error::Internal(format!("failed to create runtime: {}", e)))?;
    Ok(BLOCKING_RUNTIME.get_or_init(|| runtime))
}

/// Issues single requests against the known endpoints.
///
/// Credentials are read as one snapshot per request and the snapshot is
/// released before any I/O starts, so concurrent `send` calls never queue
/// behind each other and a token refresh never waits on the network.
#[derive(Clone)]
pub struct Dispatcher {
    config: Arc<Config>,
    credentials: Arc<CredentialStore>,
    backend: Backend,
}

impl Dispatcher {
    /// Create a dispatcher using the platform default backend
    #[cfg(feature = "backend-reqwest")]
    pub fn new(
        config: Arc<Config>,
        auth_token: impl Into<String>,
        anonymous_id_token: impl Into<String>,
    ) -> Result<Self> {
        let backend = Backend::default_for_platform(BackendConfig::from_config(&config))?;
        Ok(Self::with_backend(
            config,
            Credentials::new(auth_token, anonymous_id_token),
            backend,
        ))
    }

    /// Create a dispatcher over an explicit backend
    pub fn with_backend(config: Arc<Config>, credentials: Credentials, backend: Backend) -> Self {
        Self {
            config,
            credentials: Arc::new(CredentialStore::new(credentials)),
            backend,
        }
    }

    /// Configuration this dispatcher resolves endpoints against
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Current credentials snapshot
    pub fn credentials(&self) -> Arc<Credentials> {
        self.credentials.get()
    }

    /// Replace both tokens atomically
    pub fn set_credentials(&self, credentials: Credentials) {
        self.credentials.set(credentials);
    }

    /// Replace the auth token, keeping the current anonymous-id token
    pub fn set_auth_token(&self, auth_token: impl Into<String>) {
        let auth_token = auth_token.into();
        self.credentials.update(|current| {
            Credentials::new(auth_token.clone(), current.anonymous_id_token.clone())
        });
    }

    /// Replace the anonymous-id token, keeping the current auth token
    pub fn set_anonymous_id_token(&self, anonymous_id_token: impl Into<String>) {
        let anonymous_id_token = anonymous_id_token.into();
        self.credentials.update(|current| {
            Credentials::new(current.auth_token.clone(), anonymous_id_token.clone())
        });
    }

    /// Send `payload` to `endpoint` and wait for the outcome.
    ///
    /// Exactly one request is issued. Transport failures and non-2xx statuses
    /// come back as data on the [`NetworkResponse`]; retrying is up to the caller.
    pub async fn send(
        &self,
        payload: impl Into<Bytes>,
        endpoint: Endpoint,
        method: RequestMethod,
    ) -> NetworkResponse {
        let request = match self.build_request(payload.into(), endpoint, method) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(%endpoint, error = %e, "could not build request");
                return NetworkResponse::transport_failure(&e);
            }
        };

        tracing::debug!(%endpoint, method = %request.method, url = %request.url, "sending request");

        match self.backend.execute(request).await {
            Ok(response) => {
                tracing::debug!(%endpoint, status = %response.status, "received response");
                NetworkResponse::from_http(response.status, response.body)
            }
            Err(e) => {
                tracing::warn!(%endpoint, error = %e, "request failed");
                NetworkResponse::transport_failure(&e)
            }
        }
    }

    /// Blocking variant of [`send`](Self::send) for hosts without an async runtime.
    ///
    /// All calls share one lazily started runtime. Must not be called from
    /// inside a tokio runtime.
    pub fn send_blocking(
        &self,
        payload: impl Into<Bytes>,
        endpoint: Endpoint,
        method: RequestMethod,
    ) -> NetworkResponse {
        let runtime = match blocking_runtime() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::warn!(%endpoint, error = %e, "request not sent");
                return NetworkResponse::transport_failure(&e);
            }
        };
        runtime.block_on(self.send(payload, endpoint, method))
    }

    fn build_request(
        &self,
        body: Bytes,
        endpoint: Endpoint,
        method: RequestMethod,
    ) -> Result<BackendRequest> {
        let url = endpoint.url(&self.config)?;

        // One snapshot per request; dropped before the request is awaited.
        let credentials = self.credentials.get();

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&credentials.authorization())
                .map_err(|e| Error::Internal(format!("invalid auth token: {}", e)))?,
        );
        if endpoint.sends_anonymous_id() {
            headers.insert(
                ANONYMOUS_ID,
                HeaderValue::from_str(&credentials.anonymous_id_token)
                    .map_err(|e| Error::Internal(format!("invalid anonymous id token: {}", e)))?,
            );
        }
        if !body.is_empty() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        Ok(BackendRequest {
            method: method.into(),
            url,
            headers,
            body,
        })
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}
