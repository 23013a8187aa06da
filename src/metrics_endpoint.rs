//! Metrics HTTP Endpoint
//!
//! Exposes the proxy's counters in Prometheus text format on a separate
//! listener, next to a health check.

use crate::metrics::{MetricsSnapshot, ProxyMetrics};
use http::header::{HeaderValue, CONTENT_TYPE};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Metrics endpoint server
pub struct MetricsEndpoint {
    metrics: Arc<ProxyMetrics>,
    addr: SocketAddr,
}

impl MetricsEndpoint {
    /// Create a new metrics endpoint
    ///
    /// # Arguments
    /// * `metrics` - Shared metrics collector
    /// * `addr` - Address to bind the HTTP server to
    pub fn new(metrics: Arc<ProxyMetrics>, addr: SocketAddr) -> Self {
        Self { metrics, addr }
    }

    /// Bind the listener and serve until the process exits
    pub async fn start(self) -> crate::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("Metrics endpoint listening on http://{}", self.addr);
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(self, listener: TcpListener) -> crate::Result<()> {
        loop {
            let (stream, _) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let metrics = Arc::clone(&self.metrics);

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let metrics = Arc::clone(&metrics);
                    async move { handle_request(req, metrics).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving metrics connection: {:?}", err);
                }
            });
        }
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<ProxyMetrics>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    match req.uri().path() {
        "/metrics" => Ok(metrics_response(&metrics)),
        "/health" => Ok(health_response()),
        "/" => Ok(index_response()),
        _ => Ok(not_found_response()),
    }
}

fn response(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn metrics_response(metrics: &ProxyMetrics) -> Response<Full<Bytes>> {
    let body = format_prometheus_metrics(&metrics.get_stats());
    response(
        StatusCode::OK,
        "text/plain; version=0.0.4; charset=utf-8",
        body,
    )
}

fn push_metric(output: &mut String, name: &str, kind: &str, help: &str, value: impl std::fmt::Display) {
    let _ = writeln!(output, "# HELP stage_file_proxy_{} {}", name, help);
    let _ = writeln!(output, "# TYPE stage_file_proxy_{} {}", name, kind);
    let _ = writeln!(output, "stage_file_proxy_{} {}", name, value);
    output.push('\n');
}

/// Format a snapshot in Prometheus exposition format
pub fn format_prometheus_metrics(snapshot: &MetricsSnapshot) -> String {
    let mut output = String::new();

    // Decisions
    push_metric(
        &mut output,
        "decisions_total",
        "counter",
        "Total number of proxy decisions",
        snapshot.total_decisions,
    );

    let _ = writeln!(
        output,
        "# HELP stage_file_proxy_skipped_total Requests left to normal serving, by reason"
    );
    let _ = writeln!(output, "# TYPE stage_file_proxy_skipped_total counter");
    for (reason, value) in [
        ("not_in_namespace", snapshot.skipped_not_in_namespace),
        ("disabled", snapshot.skipped_disabled),
        ("resolvable", snapshot.skipped_resolvable),
    ] {
        let _ = writeln!(
            output,
            "stage_file_proxy_skipped_total{{reason=\"{}\"}} {}",
            reason, value
        );
    }
    output.push('\n');

    push_metric(
        &mut output,
        "hotlink_redirects_total",
        "counter",
        "Requests redirected to the origin",
        snapshot.hotlink_redirects,
    );
    push_metric(
        &mut output,
        "local_redirects_total",
        "counter",
        "Requests redirected locally after a fetch",
        snapshot.local_redirects,
    );
    push_metric(
        &mut output,
        "failed_decisions_total",
        "counter",
        "Requests answered with not found after a failed fetch",
        snapshot.failed_decisions,
    );

    // Origin fetches
    push_metric(
        &mut output,
        "origin_fetches_total",
        "counter",
        "Network retrievals from the origin",
        snapshot.origin_fetches,
    );
    push_metric(
        &mut output,
        "origin_fetch_failures_total",
        "counter",
        "Failed network retrievals from the origin",
        snapshot.failed_fetches,
    );
    push_metric(
        &mut output,
        "origin_fetch_failure_rate",
        "gauge",
        "Origin fetch failure rate percentage",
        format!("{:.2}", snapshot.fetch_failure_rate()),
    );
    push_metric(
        &mut output,
        "deduplicated_waits_total",
        "counter",
        "Requests that joined an in-flight fetch",
        snapshot.deduplicated_waits,
    );
    push_metric(
        &mut output,
        "already_local_total",
        "counter",
        "Fetches skipped because the file appeared locally",
        snapshot.already_local,
    );
    push_metric(
        &mut output,
        "bytes_from_origin_total",
        "counter",
        "Total bytes received from the origin",
        snapshot.bytes_from_origin,
    );
    push_metric(
        &mut output,
        "origin_fetch_duration_ms_avg",
        "gauge",
        "Average origin fetch duration in milliseconds",
        format!("{:.2}", snapshot.avg_fetch_duration_ms()),
    );

    output
}

fn health_response() -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "status": "healthy" }).to_string();
    response(StatusCode::OK, "application/json", body)
}

fn index_response() -> Response<Full<Bytes>> {
    let body = r#"<!DOCTYPE html>
<html>
<head>
    <title>Stage File Proxy Metrics</title>
</head>
<body>
    <h1>Stage File Proxy Metrics Endpoint</h1>
    <p><a href="/metrics">/metrics</a> - Prometheus format metrics</p>
    <p><a href="/health">/health</a> - Health check endpoint</p>
</body>
</html>"#;
    response(StatusCode::OK, "text/html; charset=utf-8", body)
}

fn not_found_response() -> Response<Full<Bytes>> {
    response(StatusCode::NOT_FOUND, "text/plain", "404 Not Found")
}
