//! Stage File Proxy
//!
//! Lets a development or staging copy of a site run without a full copy of
//! its public files. When a request for a file under the public file path
//! misses locally, the proxy either fetches the file from the production
//! origin and stores it locally, or redirects the client to the origin
//! (hotlinking).
//!
//! # Overview
//!
//! For every request the [`DecisionEngine`] runs the same pipeline:
//!
//! 1. [`path_classifier`] decides whether the path belongs to the public
//!    file namespace and extracts the relative path.
//! 2. A missing or blank origin disables the proxy.
//! 3. [`origin_resolver`] maps image derivatives (`styles/<preset>/...`)
//!    to their original file, and skips them entirely when the original is
//!    already local.
//! 4. With hotlinking on, the client is redirected to the origin.
//! 5. Otherwise the [`FetchCoordinator`] fetches and publishes the file,
//!    sharing one network retrieval among concurrent requests for the same
//!    path, and the client is redirected back to the same local URL.
//!
//! Failed fetches are reported once through a [`FailureLog`] and end in a
//! not found, never in an error page.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use stage_file_proxy::{FileServer, ProxyConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ProxyConfig::from_file("stage_file_proxy.yaml")?;
//! let server = Arc::new(FileServer::new(config)?);
//! server.start().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! ```yaml
//! file_public_path: sites/default/files
//! origin: https://www.example.com
//! origin_dir: sites/default/files   # optional, defaults to file_public_path
//! hotlink: false
//! use_derivative_root: true
//! verify_tls: true
//! fetch_timeout_secs: 30
//! document_root: /var/www/html
//! listen_address: 127.0.0.1:8080
//! metrics_endpoint:
//!   enabled: true
//!   address: 127.0.0.1:9090
//! ```
//!
//! See [`ProxyConfig`] for every option.
//!
//! # Deciding without the server
//!
//! ```rust,no_run
//! use stage_file_proxy::{DecisionEngine, FsStore, HttpOriginClient, ProxyConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ProxyConfig::new("sites/default/files", "https://www.example.com")?;
//! let engine = DecisionEngine::new(
//!     Arc::new(HttpOriginClient::from_config(&config)?),
//!     Arc::new(FsStore::new(config.files_root())),
//! );
//!
//! let outcome = engine
//!     .decide("/sites/default/files/logo.png", Vec::new(), &config)
//!     .await;
//! println!("{:?}", outcome);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod path_classifier;
pub mod origin_resolver;
pub mod url_builder;
pub mod store;
pub mod origin_client;
pub mod failure_log;
pub mod fetch_coordinator;
pub mod decision_engine;
pub mod metrics;
pub mod metrics_endpoint;
pub mod server;

// Re-export commonly used types
pub use config::{ConfigChanges, MetricsEndpointConfig, ProxyConfig};
pub use error::{FetchError, ProxyError, Result};
pub use path_classifier::{classify, Classification};
pub use origin_resolver::OriginDecision;
pub use store::{FsStore, LocalStore, MemoryStore};
pub use origin_client::{HttpOriginClient, OriginClient};
pub use failure_log::{FailureLog, FetchFailure, RecordingFailureLog, TracingFailureLog};
pub use fetch_coordinator::{FetchCoordinator, FetchResult, FetchRole, FetchSuccess};
pub use decision_engine::{DecisionEngine, FetchOutcome, FetchRequest, SkipReason};
pub use metrics::{MetricsSnapshot, ProxyMetrics};
pub use metrics_endpoint::MetricsEndpoint;
pub use server::FileServer;
