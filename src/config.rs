//! Configuration management for the stage file proxy

use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the stage file proxy
///
/// A decision always works on one immutable snapshot of this struct, so
/// reloading the file never changes a decision that is already running.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProxyConfig {
    /// Local public file path, relative to the document root
    /// (default: sites/default/files)
    #[serde(default = "default_file_public_path")]
    pub file_public_path: String,

    /// Origin server, e.g. `https://www.example.com`
    /// A missing or blank origin disables the proxy entirely.
    #[serde(default)]
    pub origin: Option<String>,

    /// Public file path on the origin (default: same as `file_public_path`)
    #[serde(default)]
    pub origin_dir: Option<String>,

    /// Redirect clients to the origin instead of fetching (default: false)
    #[serde(default)]
    pub hotlink: bool,

    /// For derivative requests, fetch the original file and let local
    /// rendering regenerate the derivative (default: true)
    #[serde(default = "default_true")]
    pub use_derivative_root: bool,

    /// Directory names that mark rendered image derivatives
    #[serde(default = "default_derivative_dirs")]
    pub derivative_dirs: Vec<String>,

    /// Stream scheme segments that may follow the preset segment
    /// (`styles/<preset>/public/<path>`)
    #[serde(default = "default_derivative_scheme_segments")]
    pub derivative_scheme_segments: Vec<String>,

    /// Verify the origin's TLS certificate (default: true)
    #[serde(default = "default_true")]
    pub verify_tls: bool,

    /// Timeout for a single origin fetch in seconds (default: 30)
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Directory the local server serves files from (default: .)
    #[serde(default = "default_document_root")]
    pub document_root: String,

    /// Address the file server listens on (default: 127.0.0.1:8080)
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Metrics endpoint configuration (optional)
    #[serde(default)]
    pub metrics_endpoint: Option<MetricsEndpointConfig>,
}

/// Configuration for the metrics HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsEndpointConfig {
    /// Whether to enable the metrics endpoint (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Address to bind the metrics endpoint to (default: "127.0.0.1:9090")
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsEndpointConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

// Default value functions for serde
fn default_file_public_path() -> String {
    "sites/default/files".to_string()
}

fn default_true() -> bool {
    true
}

fn default_derivative_dirs() -> Vec<String> {
    vec!["styles".to_string(), "imagecache".to_string()]
}

fn default_derivative_scheme_segments() -> Vec<String> {
    vec!["public".to_string()]
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_document_root() -> String {
    ".".to_string()
}

fn default_listen_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_address() -> String {
    "127.0.0.1:9090".to_string()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            file_public_path: default_file_public_path(),
            origin: None,
            origin_dir: None,
            hotlink: false,
            use_derivative_root: default_true(),
            derivative_dirs: default_derivative_dirs(),
            derivative_scheme_segments: default_derivative_scheme_segments(),
            verify_tls: default_true(),
            fetch_timeout_secs: default_fetch_timeout(),
            document_root: default_document_root(),
            listen_address: default_listen_address(),
            metrics_endpoint: None,
        }
    }
}

impl ProxyConfig {
    /// Create a configuration that proxies `file_public_path` to `origin`
    pub fn new(file_public_path: impl Into<String>, origin: impl Into<String>) -> Result<Self> {
        let config = ProxyConfig {
            file_public_path: file_public_path.into(),
            origin: Some(origin.into()),
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    ///
    /// # Returns
    /// * `Ok(ProxyConfig)` if loading and validation succeed
    /// * `Err(ProxyError)` if file cannot be read or config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            ProxyError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        let config: ProxyConfig = serde_yaml::from_str(&content).map_err(|e| {
            ProxyError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - file_public_path must not be empty
    /// - origin, when set, must be an http(s) URL with a host
    /// - fetch_timeout_secs must be > 0
    /// - derivative directory names must be single, non-empty path segments
    /// - listen and metrics addresses must parse as socket addresses
    pub fn validate(&self) -> Result<()> {
        if self.local_namespace().is_empty() {
            return Err(ProxyError::ConfigError(
                "file_public_path must not be empty".to_string(),
            ));
        }

        if let Some(origin) = self.origin_url() {
            let parsed = url::Url::parse(&origin).map_err(|e| {
                ProxyError::ConfigError(format!("Invalid origin '{}': {}", origin, e))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ProxyError::ConfigError(format!(
                    "origin must use http or https, got '{}'",
                    parsed.scheme()
                )));
            }
            if parsed.host_str().is_none() {
                return Err(ProxyError::ConfigError(format!(
                    "origin '{}' has no host",
                    origin
                )));
            }
        }

        if self.fetch_timeout_secs == 0 {
            return Err(ProxyError::ConfigError(
                "fetch_timeout_secs must be greater than 0".to_string(),
            ));
        }

        for name in self
            .derivative_dirs
            .iter()
            .chain(self.derivative_scheme_segments.iter())
        {
            if name.is_empty() || name.contains('/') {
                return Err(ProxyError::ConfigError(format!(
                    "derivative directory names must be single path segments, got '{}'",
                    name
                )));
            }
        }

        self.listen_address.parse::<SocketAddr>().map_err(|e| {
            ProxyError::ConfigError(format!(
                "Invalid listen_address '{}': {}",
                self.listen_address, e
            ))
        })?;

        if let Some(ref endpoint) = self.metrics_endpoint {
            if endpoint.enabled {
                endpoint.address.parse::<SocketAddr>().map_err(|e| {
                    ProxyError::ConfigError(format!(
                        "Invalid metrics_endpoint address '{}': {}",
                        endpoint.address, e
                    ))
                })?;
            }
        }

        Ok(())
    }

    /// Local public file path without surrounding slashes
    pub fn local_namespace(&self) -> &str {
        self.file_public_path.trim().trim_matches('/')
    }

    /// Public file path on the origin, falling back to the local one
    pub fn remote_dir(&self) -> &str {
        match self.origin_dir.as_deref().map(|d| d.trim().trim_matches('/')) {
            Some(dir) if !dir.is_empty() => dir,
            _ => self.local_namespace(),
        }
    }

    /// Origin as an absolute URL without a trailing slash
    ///
    /// Returns `None` when the proxy is disabled. A scheme-less origin is
    /// treated as plain http.
    pub fn origin_url(&self) -> Option<String> {
        let origin = self.origin.as_deref()?.trim().trim_end_matches('/');
        if origin.is_empty() {
            return None;
        }
        if origin.contains("://") {
            Some(origin.to_string())
        } else {
            Some(format!("http://{}", origin))
        }
    }

    /// Timeout for one origin fetch
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Directory on disk that holds the local public files
    pub fn files_root(&self) -> PathBuf {
        Path::new(&self.document_root).join(self.local_namespace())
    }

    /// Update configuration from another config
    ///
    /// This method allows hot-reloading of configuration by merging
    /// changes from a new configuration.
    ///
    /// # Returns
    /// * `Ok(ConfigChanges)` - Description of what changed
    /// * `Err(ProxyError)` - If the new configuration is invalid
    pub fn update_from(&mut self, new_config: &ProxyConfig) -> Result<ConfigChanges> {
        new_config.validate()?;

        let mut changes = ConfigChanges::default();

        if self.file_public_path != new_config.file_public_path {
            changes.file_public_path_changed = true;
            self.file_public_path = new_config.file_public_path.clone();
        }

        if self.origin != new_config.origin {
            changes.origin_changed = true;
            self.origin = new_config.origin.clone();
        }

        if self.origin_dir != new_config.origin_dir {
            changes.origin_dir_changed = true;
            self.origin_dir = new_config.origin_dir.clone();
        }

        if self.hotlink != new_config.hotlink {
            changes.hotlink_changed = true;
            self.hotlink = new_config.hotlink;
        }

        if self.use_derivative_root != new_config.use_derivative_root
            || self.derivative_dirs != new_config.derivative_dirs
            || self.derivative_scheme_segments != new_config.derivative_scheme_segments
        {
            changes.derivatives_changed = true;
            self.use_derivative_root = new_config.use_derivative_root;
            self.derivative_dirs = new_config.derivative_dirs.clone();
            self.derivative_scheme_segments = new_config.derivative_scheme_segments.clone();
        }

        if self.verify_tls != new_config.verify_tls
            || self.fetch_timeout_secs != new_config.fetch_timeout_secs
        {
            changes.client_changed = true;
            self.verify_tls = new_config.verify_tls;
            self.fetch_timeout_secs = new_config.fetch_timeout_secs;
        }

        if self.document_root != new_config.document_root {
            changes.document_root_changed = true;
            self.document_root = new_config.document_root.clone();
        }

        if self.listen_address != new_config.listen_address {
            changes.listen_address_changed = true;
            self.listen_address = new_config.listen_address.clone();
        }

        if self.metrics_endpoint != new_config.metrics_endpoint {
            changes.metrics_endpoint_changed = true;
            self.metrics_endpoint = new_config.metrics_endpoint.clone();
        }

        Ok(changes)
    }

    /// Reload configuration from file and apply changes
    pub fn reload_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<ConfigChanges> {
        let new_config = Self::from_file(path)?;
        self.update_from(&new_config)
    }
}

/// Description of configuration changes after hot reload
#[derive(Debug, Default, Clone)]
pub struct ConfigChanges {
    pub file_public_path_changed: bool,
    pub origin_changed: bool,
    pub origin_dir_changed: bool,
    pub hotlink_changed: bool,
    pub derivatives_changed: bool,
    pub client_changed: bool,
    pub document_root_changed: bool,
    pub listen_address_changed: bool,
    pub metrics_endpoint_changed: bool,
}

impl ConfigChanges {
    /// Check if any changes were made
    pub fn has_changes(&self) -> bool {
        self.file_public_path_changed
            || self.origin_changed
            || self.origin_dir_changed
            || self.hotlink_changed
            || self.derivatives_changed
            || self.client_changed
            || self.document_root_changed
            || self.listen_address_changed
            || self.metrics_endpoint_changed
    }

    /// Check if settings changed that a running server cannot pick up
    ///
    /// The local store, HTTP client and listeners are built once at startup.
    pub fn requires_restart(&self) -> bool {
        self.file_public_path_changed
            || self.client_changed
            || self.document_root_changed
            || self.listen_address_changed
            || self.metrics_endpoint_changed
    }

    /// Get a summary of changes
    pub fn summary(&self) -> Vec<String> {
        let mut changes = Vec::new();

        if self.file_public_path_changed {
            changes.push("file_public_path".to_string());
        }
        if self.origin_changed {
            changes.push("origin".to_string());
        }
        if self.origin_dir_changed {
            changes.push("origin_dir".to_string());
        }
        if self.hotlink_changed {
            changes.push("hotlink".to_string());
        }
        if self.derivatives_changed {
            changes.push("derivatives".to_string());
        }
        if self.client_changed {
            changes.push("http_client".to_string());
        }
        if self.document_root_changed {
            changes.push("document_root".to_string());
        }
        if self.listen_address_changed {
            changes.push("listen_address".to_string());
        }
        if self.metrics_endpoint_changed {
            changes.push("metrics_endpoint".to_string());
        }

        changes
    }
}
