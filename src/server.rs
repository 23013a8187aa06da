//! Local file server with the stage file proxy in front of missing files
//!
//! Files that exist under the document root are served directly. Anything
//! else goes through the [`DecisionEngine`], whose outcome becomes a
//! redirect or a not found.

use crate::config::{ConfigChanges, ProxyConfig};
use crate::decision_engine::{DecisionEngine, FetchOutcome};
use crate::error::{ProxyError, Result};
use crate::origin_client::{HttpOriginClient, OriginClient};
use crate::path_classifier::is_safe_relative;
use crate::store::{FsStore, LocalStore};
use crate::url_builder::{decode_path, parse_query};
use bytes::Bytes;
use http::header::{HeaderValue, ALLOW, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use http::{Method, Request, Response, StatusCode, Uri};
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// HTTP front end for the document root
pub struct FileServer {
    config: RwLock<Arc<ProxyConfig>>,
    engine: DecisionEngine,
}

impl FileServer {
    /// Build a server that fetches from the configured origin over HTTP
    pub fn new(config: ProxyConfig) -> Result<Self> {
        let origin = Arc::new(HttpOriginClient::from_config(&config)?);
        Ok(Self::with_origin(config, origin))
    }

    /// Build a server around a custom origin client
    pub fn with_origin(config: ProxyConfig, origin: Arc<dyn OriginClient>) -> Self {
        let store: Arc<dyn LocalStore> = Arc::new(FsStore::new(config.files_root()));
        Self::with_engine(config, DecisionEngine::new(origin, store))
    }

    /// Build a server around a prepared engine
    pub fn with_engine(config: ProxyConfig, engine: DecisionEngine) -> Self {
        FileServer {
            config: RwLock::new(Arc::new(config)),
            engine,
        }
    }

    /// Current configuration snapshot
    pub fn config(&self) -> Arc<ProxyConfig> {
        Arc::clone(&self.config.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    /// Apply a new configuration
    ///
    /// Settings that need a restart are rejected and the running
    /// configuration stays untouched. Decisions already running keep the
    /// snapshot they started with.
    pub fn apply_config(&self, new_config: &ProxyConfig) -> Result<ConfigChanges> {
        let mut guard = self.config.write().unwrap_or_else(PoisonError::into_inner);
        let mut updated = ProxyConfig::clone(&guard);
        let changes = updated.update_from(new_config)?;

        if changes.requires_restart() {
            warn!(
                "Configuration changes need a restart, keeping current configuration: {:?}",
                changes.summary()
            );
            return Err(ProxyError::ConfigError(format!(
                "changes require a restart: {}",
                changes.summary().join(", ")
            )));
        }

        if changes.has_changes() {
            info!("Configuration reloaded: {:?}", changes.summary());
            *guard = Arc::new(updated);
        } else {
            debug!("Configuration reloaded without changes");
        }

        Ok(changes)
    }

    /// Re-read the configuration file and apply it
    pub fn reload_config<P: AsRef<Path>>(&self, path: P) -> Result<ConfigChanges> {
        let new_config = ProxyConfig::from_file(path)?;
        self.apply_config(&new_config)
    }

    /// Bind the configured listen address and serve until the process exits
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let addr: SocketAddr = self.config().listen_address.parse().map_err(|e| {
            ProxyError::ConfigError(format!("Invalid listen_address: {}", e))
        })?;
        let listener = TcpListener::bind(addr).await?;
        info!("Stage file proxy listening on http://{}", addr);
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, _) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = Arc::clone(&self);

            tokio::task::spawn(async move {
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let server = Arc::clone(&server);
                    async move {
                        Ok::<_, Infallible>(server.handle(req.method(), req.uri()).await)
                    }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection: {:?}", err);
                }
            });
        }
    }

    /// Answer one request
    pub async fn handle(&self, method: &Method, uri: &Uri) -> Response<Full<Bytes>> {
        if method != Method::GET && method != Method::HEAD {
            let mut response = text_response(StatusCode::METHOD_NOT_ALLOWED, "405 Method Not Allowed");
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static("GET, HEAD"));
            return response;
        }

        let Some(path) = decode_path(uri.path()) else {
            return text_response(StatusCode::BAD_REQUEST, "400 Bad Request");
        };

        let config = self.config();

        if let Some(file) = local_file(&config, &path) {
            if let Ok(data) = tokio::fs::read(&file).await {
                debug!("Serving local file {}", path);
                return file_response(&file, Bytes::from(data), method == Method::HEAD);
            }
        }

        let outcome = self
            .engine
            .decide(&path, parse_query(uri.query()), &config)
            .await;

        match outcome {
            FetchOutcome::HotlinkRedirect(location) | FetchOutcome::LocalRedirect(location) => {
                redirect_response(&location)
            }
            FetchOutcome::Skipped(reason) => {
                debug!("No proxy action for {}: {:?}", path, reason);
                text_response(StatusCode::NOT_FOUND, "404 Not Found")
            }
            FetchOutcome::Failed(_) => text_response(StatusCode::NOT_FOUND, "404 Not Found"),
        }
    }
}

/// Location under the document root for a decoded request path
fn local_file(config: &ProxyConfig, path: &str) -> Option<PathBuf> {
    let relative = path.trim_matches('/');
    if !is_safe_relative(relative) {
        return None;
    }
    Some(Path::new(&config.document_root).join(relative))
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

fn file_response(file: &Path, data: Bytes, head: bool) -> Response<Full<Bytes>> {
    let len = data.len();
    let mut response = Response::new(Full::new(if head { Bytes::new() } else { data }));
    let mime = mime_guess::from_path(file).first_or_octet_stream();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    response
        .headers_mut()
        .insert(CONTENT_LENGTH, HeaderValue::from(len));
    response
}

fn redirect_response(location: &str) -> Response<Full<Bytes>> {
    match HeaderValue::from_str(location) {
        Ok(value) => {
            let mut response = Response::new(Full::new(Bytes::new()));
            *response.status_mut() = StatusCode::FOUND;
            response.headers_mut().insert(LOCATION, value);
            response
        }
        Err(e) => {
            error!("Invalid redirect location {:?}: {}", location, e);
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "500 Internal Server Error")
        }
    }
}
