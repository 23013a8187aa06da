//! De-duplicated fetching of origin files into the local store
//!
//! Every relative path has at most one fetch in flight. The first request
//! for a missing file spawns the fetch and registers a shared handle to it;
//! requests that arrive while it runs await the same handle and observe the
//! same outcome. The spawned task removes its registry entry when it
//! settles, so a later request after a failure starts a fresh attempt.

use crate::error::FetchError;
use crate::metrics::ProxyMetrics;
use crate::origin_client::OriginClient;
use crate::store::LocalStore;
use crate::url_builder::origin_file_url;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, info};

/// Outcome of one fetch attempt, shared by every waiter
pub type FetchResult = std::result::Result<FetchSuccess, FetchError>;

type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

type Registry = Arc<Mutex<HashMap<String, InFlight>>>;

struct InFlight {
    id: u64,
    fetch: SharedFetch,
}

/// A file that is now present in the local store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSuccess {
    /// Origin URL the file was (or would have been) fetched from
    pub url: String,
    /// Bytes received from the origin (0 if nothing was fetched)
    pub bytes: u64,
    /// The file was already local when the attempt started
    pub already_local: bool,
}

/// How a caller took part in a fetch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchRole {
    /// The caller started the attempt
    Leader,
    /// The caller joined an attempt already in flight
    Joined,
}

/// Coordinates origin fetches and their atomic publication
pub struct FetchCoordinator {
    origin: Arc<dyn OriginClient>,
    store: Arc<dyn LocalStore>,
    metrics: Arc<ProxyMetrics>,
    in_flight: Registry,
    next_id: AtomicU64,
}

impl FetchCoordinator {
    /// Create a coordinator over an origin client and a local store
    pub fn new(
        origin: Arc<dyn OriginClient>,
        store: Arc<dyn LocalStore>,
        metrics: Arc<ProxyMetrics>,
    ) -> Self {
        FetchCoordinator {
            origin,
            store,
            metrics,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Fetch `{origin_url}/{remote_dir}/{relative_path}` into the local
    /// store at `relative_path`
    ///
    /// Concurrent calls for the same `relative_path` share one attempt.
    /// Must be called from within a tokio runtime.
    pub async fn fetch(&self, origin_url: &str, remote_dir: &str, relative_path: &str) -> FetchResult {
        self.fetch_with_role(origin_url, remote_dir, relative_path)
            .await
            .0
    }

    /// Like [`fetch`](Self::fetch), also reporting whether this caller
    /// started the attempt or joined one in flight
    pub async fn fetch_with_role(
        &self,
        origin_url: &str,
        remote_dir: &str,
        relative_path: &str,
    ) -> (FetchResult, FetchRole) {
        let (fetch, joined) = {
            let mut in_flight = lock(&self.in_flight);
            let existing = in_flight.get(relative_path).map(|entry| entry.fetch.clone());
            match existing {
                Some(fetch) => (fetch, true),
                None => {
                    let url = origin_file_url(origin_url, remote_dir, relative_path);
                    let fetch = self.spawn_fetch(&mut in_flight, url, relative_path);
                    (fetch, false)
                }
            }
        };

        let role = if joined {
            debug!("Joining in-flight fetch for {}", relative_path);
            self.metrics.record_deduplicated_wait();
            FetchRole::Joined
        } else {
            FetchRole::Leader
        };

        (fetch.await, role)
    }

    /// Number of relative paths with a fetch currently in flight
    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Start a fetch task and register it
    ///
    /// Called with the registry lock held, so the task cannot deregister
    /// itself before it has been registered.
    fn spawn_fetch(
        &self,
        in_flight: &mut HashMap<String, InFlight>,
        url: String,
        relative_path: &str,
    ) -> SharedFetch {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let origin = Arc::clone(&self.origin);
        let store = Arc::clone(&self.store);
        let metrics = Arc::clone(&self.metrics);
        let registry = Arc::clone(&self.in_flight);
        let key = relative_path.to_string();
        let relative_path = relative_path.to_string();

        let handle = tokio::spawn(async move {
            let result = run_fetch(&*origin, &*store, &metrics, url, &relative_path).await;

            let mut in_flight = lock(&registry);
            if in_flight.get(&relative_path).map(|entry| entry.id) == Some(id) {
                in_flight.remove(&relative_path);
            }
            result
        });

        let fetch = async move {
            handle.await.unwrap_or_else(|e| {
                Err(FetchError::LocalWriteError(format!("Fetch task failed: {}", e)))
            })
        }
        .boxed()
        .shared();

        in_flight.insert(key, InFlight { id, fetch: fetch.clone() });
        fetch
    }
}

/// One attempt: re-check the store, retrieve, publish
async fn run_fetch(
    origin: &dyn OriginClient,
    store: &dyn LocalStore,
    metrics: &ProxyMetrics,
    url: String,
    relative_path: &str,
) -> FetchResult {
    // A request may arrive just after a previous attempt published the file.
    if store.exists(relative_path).await {
        debug!("{} appeared locally, skipping origin fetch", relative_path);
        metrics.record_already_local();
        return Ok(FetchSuccess {
            url,
            bytes: 0,
            already_local: true,
        });
    }

    let started = Instant::now();
    let attempt = async {
        let body = origin.get(&url).await?;
        let len = body.len() as u64;
        store.write(relative_path, body).await?;
        Ok::<u64, FetchError>(len)
    }
    .await;
    let elapsed = started.elapsed();

    match attempt {
        Ok(bytes) => {
            metrics.record_origin_fetch(true, bytes, elapsed);
            info!(
                "Fetched {} from {} ({} bytes in {:?})",
                relative_path, url, bytes, elapsed
            );
            Ok(FetchSuccess {
                url,
                bytes,
                already_local: false,
            })
        }
        Err(e) => {
            metrics.record_origin_fetch(false, 0, elapsed);
            Err(e)
        }
    }
}

fn lock(registry: &Mutex<HashMap<String, InFlight>>) -> MutexGuard<'_, HashMap<String, InFlight>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}
