//! Sink for fetch failure events

use crate::error::FetchError;
use std::sync::Mutex;
use tracing::error;

/// One failed fetch, with enough detail to diagnose it without the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub origin: String,
    pub remote_dir: String,
    pub relative_path: String,
    pub url: String,
    pub reason: FetchError,
}

/// Receiver of fetch failure events
///
/// Implementations must not block: the call happens on the request path.
pub trait FailureLog: Send + Sync {
    fn fetch_failed(&self, failure: &FetchFailure);
}

/// Writes failures as structured `tracing` error events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFailureLog;

impl FailureLog for TracingFailureLog {
    fn fetch_failed(&self, failure: &FetchFailure) {
        error!(
            origin = %failure.origin,
            remote_dir = %failure.remote_dir,
            relative_path = %failure.relative_path,
            url = %failure.url,
            reason = failure.reason.kind(),
            status = ?failure.reason.upstream_status(),
            "Stage file proxy failed to retrieve file: {}",
            failure.reason
        );
    }
}

/// Keeps failures in memory, for tests
#[derive(Debug, Default)]
pub struct RecordingFailureLog {
    entries: Mutex<Vec<FetchFailure>>,
}

impl RecordingFailureLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Failures recorded so far
    pub fn entries(&self) -> Vec<FetchFailure> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

impl FailureLog for RecordingFailureLog {
    fn fetch_failed(&self, failure: &FetchFailure) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(failure.clone());
        }
    }
}
