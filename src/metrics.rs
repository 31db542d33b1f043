//! Prometheus metrics for the mixed-cpu plugin
//!
//! Metrics live in the default registry and are served in text format on
//! `GET /metrics` when a metrics address is configured.

use std::convert::Infallible;
use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};
use tokio::net::TcpListener;

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Runtime lifecycle
    // ─────────────────────────────────────────────────────────────────────────────

    /// Container lifecycle events handled, by operation and outcome.
    ///
    /// Labels:
    /// - operation: "create" or "update"
    /// - outcome: "skipped" (not opted in), "adjusted", or "error"
    pub static ref CONTAINER_ADJUSTMENTS_TOTAL: CounterVec = register_counter_vec!(
        "mixedcpus_container_adjustments_total",
        "Container lifecycle events handled by the mixed-cpu plugin",
        &["operation", "outcome"]
    ).expect("failed to register CONTAINER_ADJUSTMENTS_TOTAL metric");

    /// Time spent answering a lifecycle request.
    pub static ref LIFECYCLE_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "mixedcpus_lifecycle_request_duration_seconds",
        "Time spent answering runtime lifecycle requests",
        &["operation"],
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1]
    ).expect("failed to register LIFECYCLE_REQUEST_DURATION metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Device plugin
    // ─────────────────────────────────────────────────────────────────────────────

    /// Allocate calls answered (one per container in the request).
    pub static ref ALLOCATIONS_TOTAL: CounterVec = register_counter_vec!(
        "mixedcpus_allocations_total",
        "Mutual CPU device allocations answered",
        &["outcome"]
    ).expect("failed to register ALLOCATIONS_TOTAL metric");

    /// ListAndWatch streams currently held open by the kubelet.
    pub static ref LIST_AND_WATCH_STREAMS: Gauge = register_gauge!(
        "mixedcpus_list_and_watch_streams",
        "Open ListAndWatch streams"
    ).expect("failed to register LIST_AND_WATCH_STREAMS metric");

    /// Registration attempts against the kubelet.
    pub static ref REGISTRATIONS_TOTAL: CounterVec = register_counter_vec!(
        "mixedcpus_registrations_total",
        "Device plugin registration attempts with the kubelet",
        &["outcome"]
    ).expect("failed to register REGISTRATIONS_TOTAL metric");

    /// Size of the mutual pool, set once at startup.
    pub static ref MUTUAL_CPUS: Gauge = register_gauge!(
        "mixedcpus_mutual_cpus",
        "Number of CPUs in the mutual pool"
    ).expect("failed to register MUTUAL_CPUS metric");
}

/// Render every registered metric in the Prometheus text format
pub fn render() -> Vec<u8> {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "failed to encode metrics");
    }
    buffer
}

/// Serve `/metrics` on `addr` until the task is dropped
pub async fn serve(addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "metrics endpoint listening");

    loop {
        let (stream, _) = listener.accept().await?;
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle))
                .await
            {
                tracing::debug!(error = %e, "metrics connection closed with error");
            }
        });
    }
}

async fn handle(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => Response::builder()
            .header(hyper::header::CONTENT_TYPE, TextEncoder::new().format_type())
            .body(Full::new(Bytes::from(render()))),
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::new())),
    };
    // Builder only fails on invalid header values, and ours are static
    Ok(response.unwrap_or_else(|_| Response::new(Full::new(Bytes::new()))))
}
