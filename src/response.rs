//! Response handling

use crate::error::{Error, ErrorKind};
use bytes::Bytes;
use serde_json::{Map, Value};

/// Key for the status code when a response is rendered as a loose map
pub const STATUS: &str = "STATUS";
/// Key for the response body when a response is rendered as a loose map
pub const RESPONSE: &str = "RESPONSE";

/// Outcome of a single dispatched request.
///
/// Either a status is present and the error is at most [`ErrorKind::Http`],
/// or the status is absent and the error is [`ErrorKind::Transport`]. The
/// constructors are the only way to build one, which keeps that pairing intact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkResponse {
    status: Option<u16>,
    body: Option<Bytes>,
    error: Option<ErrorKind>,
    invalid_url: bool,
}

/// Coarse classification of a response, as the queue layer consumes it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    /// 2xx
    Success,
    /// 400 rejecting the write key
    WrongWriteKey,
    /// Any other 400
    BadRequest,
    /// 404
    ResourceNotFound,
    /// The endpoint URL could not be built
    InvalidUrl,
    /// Transport failure or any other status
    NetworkError,
}

impl NetworkResponse {
    /// Response for a received HTTP status
    pub(crate) fn from_http(status: http::StatusCode, body: Bytes) -> Self {
        Self {
            status: Some(status.as_u16()),
            body: (!body.is_empty()).then_some(body),
            error: (!status.is_success()).then_some(ErrorKind::Http),
            invalid_url: false,
        }
    }

    /// Response for a request that never produced an HTTP status
    pub(crate) fn transport_failure(error: &Error) -> Self {
        Self {
            status: None,
            body: None,
            error: Some(ErrorKind::transport(error)),
            invalid_url: matches!(error, Error::InvalidUrl),
        }
    }

    /// HTTP status, absent on transport failure
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Response body, if one was received and non-empty
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Response body decoded as UTF-8 (lossy)
    pub fn text(&self) -> Option<String> {
        self.body
            .as_ref()
            .map(|body| String::from_utf8_lossy(body).into_owned())
    }

    /// Error attached to this response
    pub fn error(&self) -> Option<&ErrorKind> {
        self.error.as_ref()
    }

    /// Check if the response status indicates success (2xx)
    pub fn is_success(&self) -> bool {
        self.status.is_some_and(|status| (200..300).contains(&status))
    }

    /// True when no response was received
    pub fn is_transport_error(&self) -> bool {
        matches!(self.error, Some(ErrorKind::Transport { .. }))
    }

    /// Classify the response
    pub fn state(&self) -> ResponseState {
        match self.status {
            Some(status) if (200..300).contains(&status) => ResponseState::Success,
            Some(400) => {
                let invalid_key = self
                    .text()
                    .is_some_and(|text| text.to_ascii_lowercase().contains("invalid write key"));
                if invalid_key {
                    ResponseState::WrongWriteKey
                } else {
                    ResponseState::BadRequest
                }
            }
            Some(404) => ResponseState::ResourceNotFound,
            None if self.invalid_url => ResponseState::InvalidUrl,
            _ => ResponseState::NetworkError,
        }
    }

    /// Render as a loosely typed map keyed by [`STATUS`] and [`RESPONSE`].
    ///
    /// Absent fields map to `null`.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::with_capacity(2);
        map.insert(
            STATUS.to_string(),
            self.status.map(Value::from).unwrap_or(Value::Null),
        );
        map.insert(
            RESPONSE.to_string(),
            self.text().map(Value::String).unwrap_or(Value::Null),
        );
        map
    }
}
