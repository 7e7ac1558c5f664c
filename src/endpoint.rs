//! Logical destinations and request methods

use crate::{Config, Error, Result};
use serde::Deserialize;
use url::Url;

/// Logical remote destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Endpoint {
    /// Event batch ingestion on the data plane
    Batch,
    /// Device-mode transformation on the data plane
    Transform,
    /// Source configuration on the control plane
    SourceConfig,
}

impl Endpoint {
    /// Path used when the configuration carries no override
    pub fn default_path(self) -> &'static str {
        match self {
            Endpoint::Batch => "v1/batch",
            Endpoint::Transform => "transform",
            Endpoint::SourceConfig => "sourceConfig",
        }
    }

    /// Method the endpoint is normally called with
    pub fn default_method(self) -> RequestMethod {
        match self {
            Endpoint::Batch | Endpoint::Transform => RequestMethod::Post,
            Endpoint::SourceConfig => RequestMethod::Get,
        }
    }

    /// Whether requests carry the anonymous-id token
    pub(crate) fn sends_anonymous_id(self) -> bool {
        !matches!(self, Endpoint::SourceConfig)
    }

    /// Resolve the endpoint to a full URL
    pub fn url(self, config: &Config) -> Result<Url> {
        let base = match self {
            Endpoint::Batch | Endpoint::Transform => config.data_plane_url(),
            Endpoint::SourceConfig => config.control_plane_url(),
        };

        let path = config.endpoint_path(self).trim_start_matches('/');
        let mut url = base.join(path).map_err(|_| Error::InvalidUrl)?;

        if self == Endpoint::SourceConfig {
            url.query_pairs_mut()
                .append_pair("p", config.platform())
                .append_pair("v", config.sdk_version());
        }
        Ok(url)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Batch => f.write_str("batch"),
            Endpoint::Transform => f.write_str("transform"),
            Endpoint::SourceConfig => f.write_str("source_config"),
        }
    }
}

/// HTTP method for a dispatched request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

impl From<RequestMethod> for http::Method {
    fn from(method: RequestMethod) -> Self {
        match method {
            RequestMethod::Get => http::Method::GET,
            RequestMethod::Post => http::Method::POST,
            RequestMethod::Put => http::Method::PUT,
            RequestMethod::Delete => http::Method::DELETE,
        }
    }
}
