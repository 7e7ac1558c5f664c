//! Client configuration

use crate::endpoint::Endpoint;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

const DEFAULT_DATA_PLANE_URL: &str = "https://hosted.rudderlabs.com";
const DEFAULT_CONTROL_PLANE_URL: &str = "https://api.rudderlabs.com";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_BACKGROUND_TIMEOUT: Duration = Duration::from_secs(25);
const DEFAULT_GATE_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Region the data plane should be served from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataResidencyServer {
    /// United States
    #[default]
    US,
    /// European Union
    EU,
}

/// Immutable snapshot of endpoint locations, timeouts and residency selection.
///
/// Built once with [`ConfigBuilder`] or [`Config::from_json`] and shared as
/// `Arc<Config>` by the dispatcher and the lifecycle coordinator.
#[derive(Debug, Clone)]
pub struct Config {
    data_plane_url: Url,
    control_plane_url: Url,
    data_residency_server: DataResidencyServer,
    residency_urls: HashMap<DataResidencyServer, Url>,
    endpoint_paths: HashMap<Endpoint, String>,
    request_timeout: Duration,
    background_timeout: Option<Duration>,
    gate_wait_timeout: Duration,
    sdk_version: String,
    platform: String,
    user_agent: Option<String>,
}

impl Config {
    /// Create a configuration builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Load configuration from a JSON document.
    ///
    /// Durations are given in milliseconds; missing fields take the builder defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(json)?;
        raw.into_builder().build()
    }

    /// Data plane URL for the selected residency region.
    ///
    /// Falls back to the US region URL, then to the configured data plane URL.
    pub fn data_plane_url(&self) -> &Url {
        self.residency_urls
            .get(&self.data_residency_server)
            .or_else(|| self.residency_urls.get(&DataResidencyServer::US))
            .unwrap_or(&self.data_plane_url)
    }

    /// Control plane URL used for source configuration
    pub fn control_plane_url(&self) -> &Url {
        &self.control_plane_url
    }

    /// Selected residency region
    pub fn data_residency_server(&self) -> DataResidencyServer {
        self.data_residency_server
    }

    /// Path for an endpoint, honoring overrides
    pub fn endpoint_path(&self, endpoint: Endpoint) -> &str {
        self.endpoint_paths
            .get(&endpoint)
            .map(String::as_str)
            .unwrap_or_else(|| endpoint.default_path())
    }

    /// Per-request transport timeout
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Deadline imposed on a background flush, if any
    pub fn background_timeout(&self) -> Option<Duration> {
        self.background_timeout
    }

    /// Upper bound on how long the wait gate blocks the signalling thread
    pub fn gate_wait_timeout(&self) -> Duration {
        self.gate_wait_timeout
    }

    /// SDK version reported to the control plane
    pub fn sdk_version(&self) -> &str {
        &self.sdk_version
    }

    /// Platform name reported to the control plane
    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// User agent sent on every request
    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_plane_url: Url::parse(DEFAULT_DATA_PLANE_URL).expect("default data plane URL"),
            control_plane_url: Url::parse(DEFAULT_CONTROL_PLANE_URL)
                .expect("default control plane URL"),
            data_residency_server: DataResidencyServer::default(),
            residency_urls: HashMap::new(),
            endpoint_paths: HashMap::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            background_timeout: Some(DEFAULT_BACKGROUND_TIMEOUT),
            gate_wait_timeout: DEFAULT_GATE_WAIT_TIMEOUT,
            sdk_version: env!("CARGO_PKG_VERSION").to_string(),
            platform: "ios".to_string(),
            user_agent: None,
        }
    }
}

/// Builder for [`Config`]
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    data_plane_url: Option<String>,
    control_plane_url: Option<String>,
    data_residency_server: DataResidencyServer,
    residency_urls: HashMap<DataResidencyServer, String>,
    endpoint_paths: HashMap<Endpoint, String>,
    request_timeout: Option<Duration>,
    background_timeout: Option<Option<Duration>>,
    gate_wait_timeout: Option<Duration>,
    sdk_version: Option<String>,
    platform: Option<String>,
    user_agent: Option<String>,
}

impl ConfigBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the data plane URL
    pub fn data_plane_url(mut self, url: impl Into<String>) -> Self {
        self.data_plane_url = Some(url.into());
        self
    }

    /// Set the control plane URL
    pub fn control_plane_url(mut self, url: impl Into<String>) -> Self {
        self.control_plane_url = Some(url.into());
        self
    }

    /// Select the residency region
    pub fn data_residency_server(mut self, server: DataResidencyServer) -> Self {
        self.data_residency_server = server;
        self
    }

    /// Register the data plane URL for a residency region
    pub fn residency_url(mut self, server: DataResidencyServer, url: impl Into<String>) -> Self {
        self.residency_urls.insert(server, url.into());
        self
    }

    /// Override the path of an endpoint
    pub fn endpoint_path(mut self, endpoint: Endpoint, path: impl Into<String>) -> Self {
        self.endpoint_paths.insert(endpoint, path.into());
        self
    }

    /// Set request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the deadline for a background flush, `None` to rely on the host alone
    pub fn background_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.background_timeout = Some(timeout);
        self
    }

    /// Set how long the wait gate may block
    pub fn gate_wait_timeout(mut self, timeout: Duration) -> Self {
        self.gate_wait_timeout = Some(timeout);
        self
    }

    /// Set the SDK version reported to the control plane
    pub fn sdk_version(mut self, version: impl Into<String>) -> Self {
        self.sdk_version = Some(version.into());
        self
    }

    /// Set the platform name reported to the control plane
    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    /// Set user agent
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<Config> {
        let defaults = Config::default();

        let data_plane_url = match self.data_plane_url {
            Some(url) => parse_base_url("data_plane_url", &url)?,
            None => defaults.data_plane_url,
        };
        let control_plane_url = match self.control_plane_url {
            Some(url) => parse_base_url("control_plane_url", &url)?,
            None => defaults.control_plane_url,
        };

        let mut residency_urls = HashMap::with_capacity(self.residency_urls.len());
        for (server, url) in self.residency_urls {
            residency_urls.insert(server, parse_base_url("residency_url", &url)?);
        }

        let request_timeout = self.request_timeout.unwrap_or(defaults.request_timeout);
        if request_timeout.is_zero() {
            return Err(Error::Config("request_timeout must be non-zero".to_string()));
        }

        Ok(Config {
            data_plane_url,
            control_plane_url,
            data_residency_server: self.data_residency_server,
            residency_urls,
            endpoint_paths: self.endpoint_paths,
            request_timeout,
            background_timeout: self
                .background_timeout
                .unwrap_or(defaults.background_timeout),
            gate_wait_timeout: self.gate_wait_timeout.unwrap_or(defaults.gate_wait_timeout),
            sdk_version: self.sdk_version.unwrap_or(defaults.sdk_version),
            platform: self.platform.unwrap_or(defaults.platform),
            user_agent: self.user_agent,
        })
    }
}

/// Base URLs are joined with relative endpoint paths, so they must end in `/`.
fn parse_base_url(field: &str, value: &str) -> Result<Url> {
    let mut url = Url::parse(value.trim())
        .map_err(|e| Error::Config(format!("{} is not a valid URL: {}", field, e)))?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(Error::Config(format!(
            "{} must be an http(s) URL with a host",
            field
        )));
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawConfig {
    data_plane_url: Option<String>,
    control_plane_url: Option<String>,
    data_residency_server: Option<DataResidencyServer>,
    residency_urls: HashMap<DataResidencyServer, String>,
    endpoint_paths: HashMap<Endpoint, String>,
    request_timeout_ms: Option<u64>,
    background_timeout_ms: Option<u64>,
    gate_wait_timeout_ms: Option<u64>,
    sdk_version: Option<String>,
    platform: Option<String>,
    user_agent: Option<String>,
}

impl RawConfig {
    fn into_builder(self) -> ConfigBuilder {
        let mut builder = ConfigBuilder::new();
        if let Some(url) = self.data_plane_url {
            builder = builder.data_plane_url(url);
        }
        if let Some(url) = self.control_plane_url {
            builder = builder.control_plane_url(url);
        }
        if let Some(server) = self.data_residency_server {
            builder = builder.data_residency_server(server);
        }
        for (server, url) in self.residency_urls {
            builder = builder.residency_url(server, url);
        }
        for (endpoint, path) in self.endpoint_paths {
            builder = builder.endpoint_path(endpoint, path);
        }
        if let Some(ms) = self.request_timeout_ms {
            builder = builder.request_timeout(Duration::from_millis(ms));
        }
        // 0 disables the flush deadline
        if let Some(ms) = self.background_timeout_ms {
            let timeout = (ms > 0).then(|| Duration::from_millis(ms));
            builder = builder.background_timeout(timeout);
        }
        if let Some(ms) = self.gate_wait_timeout_ms {
            builder = builder.gate_wait_timeout(Duration::from_millis(ms));
        }
        if let Some(version) = self.sdk_version {
            builder = builder.sdk_version(version);
        }
        if let Some(platform) = self.platform {
            builder = builder.platform(platform);
        }
        if let Some(user_agent) = self.user_agent {
            builder = builder.user_agent(user_agent);
        }
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::builder().build().unwrap();
        assert_eq!(config.data_plane_url().as_str(), "https://hosted.rudderlabs.com/");
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.background_timeout(), Some(Duration::from_secs(25)));
        assert_eq!(config.data_residency_server(), DataResidencyServer::US);
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(Config::builder().data_plane_url("ftp://example.com").build().is_err());
        assert!(Config::builder().data_plane_url("not a url").build().is_err());
        assert!(
            Config::builder()
                .request_timeout(Duration::ZERO)
                .build()
                .is_err()
        );
    }

    #[test]
    fn base_url_gets_trailing_slash() {
        let config = Config::builder()
            .data_plane_url("https://dp.example.com/prefix")
            .build()
            .unwrap();
        assert_eq!(config.data_plane_url().as_str(), "https://dp.example.com/prefix/");
    }

    #[test]
    fn residency_selection_falls_back_to_us() {
        let config = Config::builder()
            .data_plane_url("https://dp.example.com")
            .data_residency_server(DataResidencyServer::EU)
            .residency_url(DataResidencyServer::US, "https://us.example.com")
            .build()
            .unwrap();
        assert_eq!(config.data_plane_url().as_str(), "https://us.example.com/");

        let config = Config::builder()
            .data_plane_url("https://dp.example.com")
            .data_residency_server(DataResidencyServer::EU)
            .residency_url(DataResidencyServer::US, "https://us.example.com")
            .residency_url(DataResidencyServer::EU, "https://eu.example.com")
            .build()
            .unwrap();
        assert_eq!(config.data_plane_url().as_str(), "https://eu.example.com/");

        let config = Config::builder()
            .data_plane_url("https://dp.example.com")
            .data_residency_server(DataResidencyServer::EU)
            .build()
            .unwrap();
        assert_eq!(config.data_plane_url().as_str(), "https://dp.example.com/");
    }

    #[test]
    fn from_json() {
        let config = Config::from_json(
            r#"{
                "dataPlaneUrl": "https://dp.example.com",
                "dataResidencyServer": "EU",
                "residencyUrls": { "EU": "https://eu.example.com" },
                "endpointPaths": { "BATCH": "v2/batch" },
                "requestTimeoutMs": 1500,
                "backgroundTimeoutMs": 0
            }"#,
        )
        .unwrap();

        assert_eq!(config.data_plane_url().as_str(), "https://eu.example.com/");
        assert_eq!(config.endpoint_path(Endpoint::Batch), "v2/batch");
        assert_eq!(config.request_timeout(), Duration::from_millis(1500));
        assert_eq!(config.background_timeout(), None);
    }

    #[test]
    fn from_json_rejects_garbage() {
        assert!(matches!(Config::from_json("{"), Err(Error::Json(_))));
    }
}
