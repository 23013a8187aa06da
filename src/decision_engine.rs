//! Per-request decision: skip, hotlink, fetch-then-redirect, or fail
//!
//! The engine never performs HTTP effects itself. It returns a
//! [`FetchOutcome`] and the request pipeline turns that into a response.

use crate::config::ProxyConfig;
use crate::error::FetchError;
use crate::failure_log::{FailureLog, FetchFailure, TracingFailureLog};
use crate::fetch_coordinator::{FetchCoordinator, FetchRole};
use crate::metrics::ProxyMetrics;
use crate::origin_client::OriginClient;
use crate::origin_resolver::{self, OriginDecision};
use crate::path_classifier::{classify, Classification};
use crate::store::LocalStore;
use crate::url_builder::{filter_query, hotlink_location, local_location, origin_file_url};
use std::sync::Arc;
use tracing::debug;

/// Why a request was left to normal serving
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The path is outside the public file namespace
    NotInNamespace,
    /// No origin is configured
    ProxyDisabled,
    /// The derivative can be rendered from a local original
    AlreadyResolvable,
}

/// Final action for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Continue with normal serving
    Skipped(SkipReason),
    /// Redirect the client to the file on the origin
    HotlinkRedirect(String),
    /// The file is now local; redirect the client to the same request
    LocalRedirect(String),
    /// The file could not be retrieved; answer not found
    Failed(FetchError),
}

impl FetchOutcome {
    /// Redirect target, for the redirecting outcomes
    pub fn location(&self) -> Option<&str> {
        match self {
            FetchOutcome::HotlinkRedirect(location) | FetchOutcome::LocalRedirect(location) => {
                Some(location)
            }
            _ => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, FetchOutcome::Skipped(_))
    }
}

/// Per-request state built up while deciding
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchRequest {
    /// Inbound path, decoded
    pub request_path: String,
    /// Query parameters that survived filtering, in request order
    pub query: Vec<(String, String)>,
    /// Path inside the public file namespace, once classified
    pub relative_path: Option<String>,
    /// Relative path to fetch from the origin, once resolved
    pub origin_path: Option<String>,
}

impl FetchRequest {
    /// Start a request, dropping unsafe query parameters
    pub fn new<I>(request_path: impl Into<String>, query: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        FetchRequest {
            request_path: request_path.into(),
            query: filter_query(query),
            relative_path: None,
            origin_path: None,
        }
    }
}

/// Composes classification, origin resolution and fetching
pub struct DecisionEngine {
    store: Arc<dyn LocalStore>,
    coordinator: FetchCoordinator,
    failure_log: Arc<dyn FailureLog>,
    metrics: Arc<ProxyMetrics>,
}

impl DecisionEngine {
    /// Create an engine that logs failures through `tracing`
    pub fn new(origin: Arc<dyn OriginClient>, store: Arc<dyn LocalStore>) -> Self {
        let metrics = Arc::new(ProxyMetrics::new());
        DecisionEngine {
            coordinator: FetchCoordinator::new(origin, Arc::clone(&store), Arc::clone(&metrics)),
            store,
            failure_log: Arc::new(TracingFailureLog),
            metrics,
        }
    }

    /// Replace the failure sink
    pub fn with_failure_log(mut self, failure_log: Arc<dyn FailureLog>) -> Self {
        self.failure_log = failure_log;
        self
    }

    /// Metrics shared by the engine and its fetch coordinator
    pub fn metrics(&self) -> &ProxyMetrics {
        &self.metrics
    }

    /// Shared handle to the metrics, for exporters
    pub fn metrics_arc(&self) -> Arc<ProxyMetrics> {
        Arc::clone(&self.metrics)
    }

    /// The fetch coordinator
    pub fn coordinator(&self) -> &FetchCoordinator {
        &self.coordinator
    }

    /// Decide what to do with a request
    ///
    /// `config` is the snapshot for this decision; it is not re-read.
    /// Fetch failures are logged once by the request that started the
    /// attempt and returned as [`FetchOutcome::Failed`], never as a panic.
    pub async fn decide<I>(&self, request_path: &str, query: I, config: &ProxyConfig) -> FetchOutcome
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut request = FetchRequest::new(request_path, query);
        self.decide_request(&mut request, config).await
    }

    /// Decide for a prepared request, filling in its derived paths
    pub async fn decide_request(&self, request: &mut FetchRequest, config: &ProxyConfig) -> FetchOutcome {
        let relative_path = match classify(&request.request_path, config.local_namespace()) {
            Classification::Relative(path) => path,
            Classification::NotInNamespace => {
                self.metrics.record_skip_not_in_namespace();
                return FetchOutcome::Skipped(SkipReason::NotInNamespace);
            }
        };
        request.relative_path = Some(relative_path.clone());

        let origin_url = match config.origin_url() {
            Some(origin_url) => origin_url,
            None => {
                debug!("Proxy disabled, skipping {}", request.request_path);
                self.metrics.record_skip_disabled();
                return FetchOutcome::Skipped(SkipReason::ProxyDisabled);
            }
        };

        let origin_path = match origin_resolver::resolve(&relative_path, config, self.store.as_ref()).await {
            OriginDecision::UseAsIs(path) | OriginDecision::UseOriginalAndDefer(path) => path,
            OriginDecision::AlreadyResolvable => {
                self.metrics.record_skip_resolvable();
                return FetchOutcome::Skipped(SkipReason::AlreadyResolvable);
            }
        };
        request.origin_path = Some(origin_path.clone());

        let remote_dir = config.remote_dir();

        if config.hotlink {
            let location = hotlink_location(&origin_url, remote_dir, &origin_path, &request.query);
            debug!("Hotlinking {} to {}", request.request_path, location);
            self.metrics.record_hotlink();
            return FetchOutcome::HotlinkRedirect(location);
        }

        let (result, role) = self
            .coordinator
            .fetch_with_role(&origin_url, remote_dir, &origin_path)
            .await;

        match result {
            Ok(_) => {
                self.metrics.record_local_redirect();
                FetchOutcome::LocalRedirect(local_location(&request.request_path, &request.query))
            }
            Err(reason) => {
                if role == FetchRole::Leader {
                    self.failure_log.fetch_failed(&FetchFailure {
                        origin: origin_url.clone(),
                        remote_dir: remote_dir.to_string(),
                        relative_path: origin_path.clone(),
                        url: origin_file_url(&origin_url, remote_dir, &origin_path),
                        reason: reason.clone(),
                    });
                } else {
                    debug!(
                        "Shared fetch for {} failed: {}",
                        origin_path, reason
                    );
                }
                self.metrics.record_failed_decision();
                FetchOutcome::Failed(reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure_log::RecordingFailureLog;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubOrigin {
        calls: AtomicUsize,
        response: std::result::Result<Bytes, FetchError>,
    }

    #[async_trait]
    impl OriginClient for StubOrigin {
        async fn get(&self, _url: &str) -> std::result::Result<Bytes, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response.clone()
        }
    }

    struct Fixture {
        engine: DecisionEngine,
        origin: Arc<StubOrigin>,
        store: Arc<MemoryStore>,
        log: Arc<RecordingFailureLog>,
    }

    fn fixture(response: std::result::Result<Bytes, FetchError>) -> Fixture {
        let origin = Arc::new(StubOrigin {
            calls: AtomicUsize::new(0),
            response,
        });
        let store = Arc::new(MemoryStore::new());
        let log = Arc::new(RecordingFailureLog::new());
        let engine = DecisionEngine::new(
            Arc::clone(&origin) as Arc<dyn OriginClient>,
            Arc::clone(&store) as Arc<dyn LocalStore>,
        )
        .with_failure_log(Arc::clone(&log) as Arc<dyn FailureLog>);
        Fixture {
            engine,
            origin,
            store,
            log,
        }
    }

    fn config() -> ProxyConfig {
        ProxyConfig::new("files", "example.com").unwrap()
    }

    fn query(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_skip_outside_namespace() {
        let f = fixture(Ok(Bytes::from_static(b"x")));
        let outcome = f.engine.decide("/node/1", Vec::new(), &config()).await;
        assert_eq!(outcome, FetchOutcome::Skipped(SkipReason::NotInNamespace));
        assert_eq!(f.origin.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_skip_without_origin() {
        let f = fixture(Ok(Bytes::from_static(b"x")));
        let config = ProxyConfig {
            file_public_path: "files".to_string(),
            ..Default::default()
        };
        let outcome = f.engine.decide("/files/a.png", Vec::new(), &config).await;
        assert_eq!(outcome, FetchOutcome::Skipped(SkipReason::ProxyDisabled));
    }

    #[tokio::test]
    async fn test_skip_resolvable_derivative() {
        let f = fixture(Ok(Bytes::from_static(b"x")));
        f.store.insert("photo.jpg", b"jpeg".to_vec());
        let outcome = f
            .engine
            .decide("/files/styles/thumbnail/photo.jpg", Vec::new(), &config())
            .await;
        assert_eq!(outcome, FetchOutcome::Skipped(SkipReason::AlreadyResolvable));
        assert_eq!(f.origin.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hotlink_redirect() {
        let f = fixture(Ok(Bytes::from_static(b"x")));
        let mut config = config();
        config.hotlink = true;

        let outcome = f
            .engine
            .decide("/files/a.png", query(&[("x", "1")]), &config)
            .await;

        assert_eq!(
            outcome,
            FetchOutcome::HotlinkRedirect("http://example.com/files/a.png?x=1".to_string())
        );
        assert_eq!(f.store.write_count(), 0);
        assert_eq!(f.origin.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hotlink_derivative_points_at_original() {
        let f = fixture(Ok(Bytes::from_static(b"x")));
        let mut config = config();
        config.hotlink = true;
        config.origin_dir = Some("sites/prod/files".to_string());

        let outcome = f
            .engine
            .decide("/files/styles/thumbnail/photo.jpg", Vec::new(), &config)
            .await;

        assert_eq!(
            outcome.location(),
            Some("http://example.com/sites/prod/files/photo.jpg")
        );
    }

    #[tokio::test]
    async fn test_fetch_then_local_redirect() {
        let f = fixture(Ok(Bytes::from_static(b"png-bytes")));

        let outcome = f
            .engine
            .decide(
                "/files/a.png",
                query(&[("x", "1"), ("destination", "https://evil.example")]),
                &config(),
            )
            .await;

        assert_eq!(outcome, FetchOutcome::LocalRedirect("/files/a.png?x=1".to_string()));
        assert_eq!(f.store.get("a.png"), Some(Bytes::from_static(b"png-bytes")));
        assert!(f.log.entries().is_empty());
    }

    #[tokio::test]
    async fn test_derivative_fetches_original() {
        let f = fixture(Ok(Bytes::from_static(b"jpeg")));

        let mut request = FetchRequest::new("/files/styles/thumbnail/photo.jpg", Vec::new());
        let outcome = f.engine.decide_request(&mut request, &config()).await;

        assert_eq!(
            outcome,
            FetchOutcome::LocalRedirect("/files/styles/thumbnail/photo.jpg".to_string())
        );
        assert_eq!(request.relative_path.as_deref(), Some("styles/thumbnail/photo.jpg"));
        assert_eq!(request.origin_path.as_deref(), Some("photo.jpg"));
        assert!(f.store.get("photo.jpg").is_some());
        assert!(f.store.get("styles/thumbnail/photo.jpg").is_none());
    }

    #[tokio::test]
    async fn test_failure_logged_once() {
        let f = fixture(Err(FetchError::UpstreamError { status: 500 }));

        let outcome = f.engine.decide("/files/a.png", Vec::new(), &config()).await;

        assert_eq!(outcome, FetchOutcome::Failed(FetchError::UpstreamError { status: 500 }));
        let entries = f.log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].origin, "http://example.com");
        assert_eq!(entries[0].remote_dir, "files");
        assert_eq!(entries[0].relative_path, "a.png");
        assert_eq!(entries[0].url, "http://example.com/files/a.png");
        assert_eq!(f.store.write_count(), 0);
        assert_eq!(f.engine.metrics().get_stats().failed_decisions, 1);
    }

    #[tokio::test]
    async fn test_existing_file_is_not_refetched() {
        let f = fixture(Ok(Bytes::from_static(b"new")));
        f.store.insert("a.png", b"old".to_vec());

        let outcome = f.engine.decide("/files/a.png", Vec::new(), &config()).await;

        assert_eq!(outcome, FetchOutcome::LocalRedirect("/files/a.png".to_string()));
        assert_eq!(f.origin.calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.store.get("a.png"), Some(Bytes::from_static(b"old")));
    }

    #[test]
    fn test_outcome_helpers() {
        assert!(FetchOutcome::Skipped(SkipReason::ProxyDisabled).is_skipped());
        assert_eq!(FetchOutcome::Skipped(SkipReason::ProxyDisabled).location(), None);
        assert_eq!(
            FetchOutcome::LocalRedirect("/files/a.png".to_string()).location(),
            Some("/files/a.png")
        );
        assert_eq!(
            FetchOutcome::Failed(FetchError::UpstreamError { status: 404 }).location(),
            None
        );
    }
}
