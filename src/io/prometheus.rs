//! HTTP endpoint
//!
//! - `GET /metrics` - Prometheus text format
//! - `GET /health` - liveness
//! - `GET /status` - current display snapshot as JSON, 204 before the first passage
//! - `POST /capture` - manual capture trigger
//!
//! Uses hyper for the HTTP server.

use crate::domain::types::CaptureAck;
use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use crate::io::camera::CaptureGateway;
use crate::services::display::DisplayReader;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

const TEXT_PLAIN: &str = "text/plain; version=0.0.4; charset=utf-8";
const APPLICATION_JSON: &str = "application/json";

/// Everything the request handlers read from
pub struct HttpState {
    pub metrics: Arc<Metrics>,
    pub site_id: String,
    pub display: DisplayReader,
    pub camera: Option<Arc<dyn CaptureGateway>>,
}

enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, site: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_edge_metrics(&mut output, site_id, &summary);
    write_passage_metrics(&mut output, site_id, &summary);
    write_capture_metrics(&mut output, site_id, &summary);
    write_latency_metrics(&mut output, site_id, &summary);

    output
}

/// Pipeline metrics plus the live camera gauge
fn metrics_body(state: &HttpState) -> String {
    let mut output = format_prometheus_metrics(&state.metrics, &state.site_id);
    if let Some(camera) = &state.camera {
        write_metric(
            &mut output,
            "radar_capture_in_flight",
            "1 while a plate capture is running",
            MetricType::Gauge,
            &state.site_id,
            u64::from(camera.in_flight()),
        );
    }
    output
}

fn write_edge_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    let _ = writeln!(output, "# HELP radar_edges_total Active edges seen per sensor");
    let _ = writeln!(output, "# TYPE radar_edges_total counter");
    let _ = writeln!(output, "radar_edges_total{{site=\"{site}\",sensor=\"s1\"}} {}", summary.edges_s1_total);
    let _ = writeln!(output, "radar_edges_total{{site=\"{site}\",sensor=\"s2\"}} {}", summary.edges_s2_total);

    write_metric(
        output,
        "radar_edges_out_of_sequence_total",
        "Sensor-2 edges outside a passage",
        MetricType::Counter,
        site,
        summary.edges_out_of_sequence,
    );
    write_metric(
        output,
        "radar_edges_debounced_total",
        "Sensor-1 edges inside the debounce window",
        MetricType::Counter,
        site,
        summary.edges_debounced,
    );
}

fn write_passage_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "radar_passages_total",
        "Passages handed to the control loop",
        MetricType::Counter,
        site,
        summary.passages_completed,
    );
    write_metric(
        output,
        "radar_passages_dropped_total",
        "Passages dropped on a full queue",
        MetricType::Counter,
        site,
        summary.passages_dropped,
    );
    write_metric(
        output,
        "radar_passages_rejected_total",
        "Passages that could not be classified",
        MetricType::Counter,
        site,
        summary.passages_rejected,
    );

    let _ = writeln!(output, "# HELP radar_classified_total Classified passages by status");
    let _ = writeln!(output, "# TYPE radar_classified_total counter");
    for (status, val) in [
        ("normal", summary.status_normal),
        ("warning", summary.status_warning),
        ("infraction", summary.status_infraction),
    ] {
        let _ = writeln!(output, "radar_classified_total{{site=\"{site}\",status=\"{status}\"}} {val}");
    }

    write_metric(
        output,
        "radar_passage_queue_depth",
        "Current passage queue depth",
        MetricType::Gauge,
        site,
        summary.queue_depth,
    );
    write_metric(
        output,
        "radar_display_publishes_total",
        "Display snapshots published",
        MetricType::Counter,
        site,
        summary.display_publishes,
    );
}

fn write_capture_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "radar_captures_requested_total",
        "Plate captures requested",
        MetricType::Counter,
        site,
        summary.captures_requested,
    );
    write_metric(
        output,
        "radar_captures_busy_total",
        "Capture requests refused while another was in flight",
        MetricType::Counter,
        site,
        summary.captures_busy,
    );
    write_metric(
        output,
        "radar_captures_succeeded_total",
        "Captures that returned a plate",
        MetricType::Counter,
        site,
        summary.captures_succeeded,
    );
    write_metric(
        output,
        "radar_captures_failed_total",
        "Captures that returned an error",
        MetricType::Counter,
        site,
        summary.captures_failed,
    );
}

fn write_latency_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_histogram(
        output,
        "radar_process_latency_us",
        "Control loop passage processing latency in microseconds",
        site,
        &summary.lat_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.lat_avg_us,
    );
    write_metric(
        output,
        "radar_process_latency_p99_us",
        "99th percentile passage processing latency",
        MetricType::Gauge,
        site,
        summary.lat_p99_us,
    );
    write_metric(
        output,
        "radar_process_latency_max_us",
        "Maximum passage processing latency",
        MetricType::Gauge,
        site,
        summary.lat_max_us,
    );
}

fn response(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut res = Response::new(Full::new(body.into()));
    *res.status_mut() = status;
    res.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    res
}

fn manual_capture(state: &HttpState) -> Response<Full<Bytes>> {
    let Some(camera) = &state.camera else {
        return response(
            StatusCode::SERVICE_UNAVAILABLE,
            APPLICATION_JSON,
            r#"{"ok":false,"error":"camera_not_configured"}"#,
        );
    };

    state.metrics.record_capture_requested();
    match camera.request_capture() {
        CaptureAck::Accepted(request_id) => {
            info!(request_id = %request_id, "manual_capture_requested");
            response(
                StatusCode::ACCEPTED,
                APPLICATION_JSON,
                format!(r#"{{"ok":true,"request_id":"{}"}}"#, request_id),
            )
        }
        CaptureAck::Busy => {
            state.metrics.record_capture_busy();
            warn!("manual_capture_busy");
            response(StatusCode::CONFLICT, APPLICATION_JSON, r#"{"ok":false,"error":"busy"}"#)
        }
    }
}

fn route(method: &Method, path: &str, state: &HttpState) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, "/metrics") => response(StatusCode::OK, TEXT_PLAIN, metrics_body(state)),
        (&Method::GET, "/health") => response(StatusCode::OK, TEXT_PLAIN, "ok"),
        (&Method::GET, "/status") => match state.display.latest() {
            Some(snapshot) => match serde_json::to_vec(&snapshot) {
                Ok(json) => response(StatusCode::OK, APPLICATION_JSON, json),
                Err(e) => {
                    error!(error = %e, "status_serialize_failed");
                    response(StatusCode::INTERNAL_SERVER_ERROR, TEXT_PLAIN, "serialize error")
                }
            },
            None => response(StatusCode::NO_CONTENT, TEXT_PLAIN, ""),
        },
        (&Method::POST, "/capture") => manual_capture(state),
        _ => response(StatusCode::NOT_FOUND, TEXT_PLAIN, "Not Found"),
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<HttpState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    Ok(route(req.method(), req.uri().path(), &state))
}

/// Start the HTTP server; returns once shutdown is signalled
pub async fn start_http_server(
    port: u16,
    state: HttpState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let state = Arc::new(state);

    info!(port = %port, site = %state.site_id, "http_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                error!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("http_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
