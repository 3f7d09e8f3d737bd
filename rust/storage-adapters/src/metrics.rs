use anyhow::{Context, Result};
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Encoder, Gauge, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;
use std::time::Instant;
use tokio::io::AsyncWriteExt;

// gRPC metrics
pub static GRPC_REQUESTS: OnceLock<CounterVec> = OnceLock::new(); // labels: method, code
pub static GRPC_REQUEST_DURATION: OnceLock<HistogramVec> = OnceLock::new(); // labels: method
pub static AUTH_REJECTIONS: OnceLock<Counter> = OnceLock::new();
pub static ADMISSION_OBSERVED: OnceLock<CounterVec> = OnceLock::new(); // labels: method

// Write-cache metrics
pub static CACHE_FLUSHES: OnceLock<CounterVec> = OnceLock::new(); // labels: outcome
pub static CACHE_DEPTH: OnceLock<Gauge> = OnceLock::new();

// Thread-safe initialization result
static INIT_RESULT: OnceLock<Result<()>> = OnceLock::new();

/// Records one finished RPC when dropped through `complete`.
#[derive(Debug)]
pub struct RequestTimer {
    start: Instant,
    method: &'static str,
}

impl RequestTimer {
    pub fn new(method: &'static str) -> Self {
        Self {
            start: Instant::now(),
            method,
        }
    }

    pub fn complete(self, code: tonic::Code) {
        let duration = self.start.elapsed().as_secs_f64();
        let code = format!("{code:?}");

        if let Some(requests) = GRPC_REQUESTS.get() {
            requests.with_label_values(&[self.method, code.as_str()]).inc();
        }
        if let Some(histogram) = GRPC_REQUEST_DURATION.get() {
            histogram.with_label_values(&[self.method]).observe(duration);
        }
    }
}

pub fn record_auth_rejection() {
    if let Some(c) = AUTH_REJECTIONS.get() {
        c.inc();
    }
}

pub fn record_admission(method: &'static str) {
    if let Some(c) = ADMISSION_OBSERVED.get() {
        c.with_label_values(&[method]).inc();
    }
}

pub fn record_flush(outcome: &str) {
    if let Some(c) = CACHE_FLUSHES.get() {
        c.with_label_values(&[outcome]).inc();
    }
}

pub fn set_cache_depth(depth: usize) {
    if let Some(g) = CACHE_DEPTH.get() {
        #[allow(clippy::cast_precision_loss, reason = "buffer depth is tiny")]
        g.set(depth as f64);
    }
}

pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    // If encoding fails, return empty metrics rather than panic
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

// Thread-safe metrics initialization; registration happens exactly once per process
pub fn init_metrics() -> Result<()> {
    match INIT_RESULT.get_or_init(init_metrics_internal) {
        Ok(()) => Ok(()),
        Err(e) => Err(anyhow::anyhow!("Metrics initialization failed: {}", e)),
    }
}

fn init_metrics_internal() -> Result<()> {
    let grpc_requests = register_counter_vec!(
        "adapter_grpc_requests_total",
        "Total gRPC requests handled by the adapter",
        &["method", "code"]
    )
    .context("Failed to register GRPC_REQUESTS metric")?;

    let grpc_request_duration = register_histogram_vec!(
        "adapter_grpc_request_duration_seconds",
        "gRPC request duration in seconds",
        &["method"]
    )
    .context("Failed to register GRPC_REQUEST_DURATION metric")?;

    let auth_rejections = register_counter!(
        "adapter_auth_rejections_total",
        "Calls rejected by the token authorizer"
    )
    .context("Failed to register AUTH_REJECTIONS metric")?;

    let admission_observed = register_counter_vec!(
        "adapter_admission_observed_total",
        "Calls seen by the admission tap before decoding",
        &["method"]
    )
    .context("Failed to register ADMISSION_OBSERVED metric")?;

    let cache_flushes = register_counter_vec!(
        "adapter_cache_flushes_total",
        "Write-cache flushes to the columnar store",
        &["outcome"]
    )
    .context("Failed to register CACHE_FLUSHES metric")?;

    let cache_depth = register_gauge!(
        "adapter_cache_depth",
        "Telemetry items currently buffered"
    )
    .context("Failed to register CACHE_DEPTH metric")?;

    GRPC_REQUESTS
        .set(grpc_requests)
        .map_err(|_| anyhow::anyhow!("Failed to set GRPC_REQUESTS"))?;
    GRPC_REQUEST_DURATION
        .set(grpc_request_duration)
        .map_err(|_| anyhow::anyhow!("Failed to set GRPC_REQUEST_DURATION"))?;
    AUTH_REJECTIONS
        .set(auth_rejections)
        .map_err(|_| anyhow::anyhow!("Failed to set AUTH_REJECTIONS"))?;
    ADMISSION_OBSERVED
        .set(admission_observed)
        .map_err(|_| anyhow::anyhow!("Failed to set ADMISSION_OBSERVED"))?;
    CACHE_FLUSHES
        .set(cache_flushes)
        .map_err(|_| anyhow::anyhow!("Failed to set CACHE_FLUSHES"))?;
    CACHE_DEPTH
        .set(cache_depth)
        .map_err(|_| anyhow::anyhow!("Failed to set CACHE_DEPTH"))?;

    Ok(())
}

// Start metrics server with proper error handling
pub async fn start_metrics_server(port: u16) -> Result<()> {
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    init_metrics().context("Failed to initialize metrics")?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind metrics server")?;

    tracing::info!("Metrics server listening on http://0.0.0.0:{}", port);

    loop {
        match listener.accept().await {
            Ok((mut stream, _)) => {
                tokio::spawn(async move {
                    let body = get_metrics();
                    let resp = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    if let Err(e) = stream.write_all(resp.as_bytes()).await {
                        tracing::error!("Metrics write error: {:?}", e);
                    }
                    let _ = stream.shutdown().await;
                });
            }
            Err(e) => {
                tracing::error!("Failed to accept connection: {:?}", e);
            }
        }
    }
}
