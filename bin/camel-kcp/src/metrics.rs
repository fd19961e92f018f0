//! Reconcile metrics, exposed in the Prometheus text format

use anyhow::Result;
use http_body_util::Full;
use hyper::{body::Bytes, server::conn::http1, service::service_fn, Method, Request, Response, StatusCode};
use hyper_util::rt::tokio::TokioIo;
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Counters and latencies of every controller in the process
#[derive(Clone)]
pub struct ReconcileMetrics {
    /// Reconciles by controller and outcome
    pub reconcile_total: CounterVec,
    /// Reconcile duration in seconds
    pub reconcile_duration_seconds: HistogramVec,
    registry: Arc<Registry>,
}

impl ReconcileMetrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let reconcile_total = CounterVec::new(
            Opts::new("camel_kcp_reconcile_total", "Total reconciles by outcome"),
            &["controller", "outcome"],
        )?;
        let reconcile_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "camel_kcp_reconcile_duration_seconds",
                "Reconcile latency in seconds",
            ),
            &["controller"],
        )?;

        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(reconcile_duration_seconds.clone()))?;

        Ok(Self {
            reconcile_total,
            reconcile_duration_seconds,
            registry,
        })
    }

    pub fn record(&self, controller: &str, outcome: &str, elapsed: Duration) {
        self.reconcile_total
            .with_label_values(&[controller, outcome])
            .inc();
        self.reconcile_duration_seconds
            .with_label_values(&[controller])
            .observe(elapsed.as_secs_f64());
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Serves `GET /metrics` on `port` until `cancel` fires
pub async fn serve(metrics: ReconcileMetrics, port: u16, cancel: CancellationToken) -> Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = TcpListener::bind(&addr).await?;
    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, peer_addr) = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted?,
        };
        let io = TokioIo::new(stream);
        let metrics = metrics.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let metrics = metrics.clone();
                async move { handle_request(req, metrics) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Error serving metrics connection from {}: {}", peer_addr, e);
            }
        });
    }
}

fn handle_request<B>(req: Request<B>, metrics: ReconcileMetrics) -> Result<Response<Full<Bytes>>, http::Error> {
    if req.method() != Method::GET || req.uri().path() != "/metrics" {
        return Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found\n")));
    }

    match metrics.gather() {
        Ok(text) => Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "text/plain; version=0.0.4")
            .body(Full::new(Bytes::from(text))),
        Err(e) => Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Full::new(Bytes::from(format!("Failed to gather metrics: {}\n", e)))),
    }
}
