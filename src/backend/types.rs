//! Shared types between backend implementations

use crate::Result;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::{HeaderMap, Method, StatusCode};
use url::Url;

/// Platform-agnostic HTTP request
#[derive(Debug, Clone)]
pub struct BackendRequest {
    /// HTTP method for the request
    pub method: Method,
    /// URL for the request
    pub url: Url,
    /// Headers for the request
    pub headers: HeaderMap,
    /// Body content, empty for GET
    pub body: Bytes,
}

/// Platform-agnostic HTTP response with a fully buffered body
#[derive(Debug, Clone)]
pub struct BackendResponse {
    /// HTTP status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body bytes
    pub body: Bytes,
}

/// Pluggable transport for hosts that bring their own HTTP stack.
///
/// `Err` must only be returned when no HTTP response was received; any
/// received status, including 4xx and 5xx, is an `Ok`.
pub trait Transport: Send + Sync {
    /// Execute one request
    fn execute(&self, request: BackendRequest) -> BoxFuture<'_, Result<BackendResponse>>;
}
