//! Log and span output for the adapter process.
//!
//! Console output is always on (plain, or JSON with `LOG_FORMAT=json`).
//! Optional sinks, each its own layer:
//! - a JSON file `<kind>-adapter.log` under `logs.dir`
//! - JSON lines shipped to a telemetry adapter (`logs.ship`)
//! - spans exported over OTLP when `OTEL_ENABLED=true`

use std::env;
use std::path::Path;
use std::time::Duration;

use opentelemetry::{global, trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::trace::{Tracer, TracerProvider};
use opentelemetry_sdk::Resource;
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};
use tokio::task::JoinHandle;
use tracing::level_filters::LevelFilter;
use tracing::{Level, Subscriber};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::Targets;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::client::{self, RoutingParams, TelemetryClient};
use crate::config::{AdapterKind, Config, LogShipConfig};
use crate::error::{AdapterError, AdapterResult};
use crate::shipping::LogShipper;

const DEFAULT_FILTER: &str = "chatroom_adapters=info,storage_adapter=info";
const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

fn env_flag(name: &str) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(false)
}

/// Keeps the file writer and log shipper alive; hold it until exit.
#[derive(Debug, Default)]
pub struct TracingGuard {
    _file: Option<WorkerGuard>,
    shipper: Option<(LogShipper, JoinHandle<()>)>,
}

impl TracingGuard {
    /// Log lines the shipper had to discard.
    pub fn dropped_lines(&self) -> u64 {
        self.shipper.as_ref().map_or(0, |(s, _)| s.dropped())
    }
}

/// Batch-exporting tracer, installed as the global provider.
fn otlp_tracer(kind: AdapterKind) -> AdapterResult<Tracer> {
    let service_name = env::var("OTEL_SERVICE_NAME")
        .unwrap_or_else(|_| format!("chatroom-{}-adapter", kind.as_str()));
    let endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| DEFAULT_OTLP_ENDPOINT.to_string());

    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(Duration::from_secs(3))
        .build()
        .map_err(|e| AdapterError::InternalError(format!("Failed to create OTLP exporter: {e}")))?;

    let provider = TracerProvider::builder()
        .with_resource(Resource::new(vec![
            KeyValue::new(SERVICE_NAME, service_name),
            KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
        ]))
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .build();
    global::set_tracer_provider(provider.clone());

    Ok(provider.tracer("chatroom-adapters"))
}

/// Non-blocking writer for `<dir>/<kind>-adapter.log`.
pub fn log_file(dir: &Path, kind: AdapterKind) -> AdapterResult<(NonBlocking, WorkerGuard)> {
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(format!("{}-adapter", kind.as_str()))
        .filename_suffix("log")
        .build(dir)
        .map_err(|e| {
            AdapterError::ConfigurationError(format!(
                "cannot open log file in {}: {e}",
                dir.display()
            ))
        })?;
    Ok(tracing_appender::non_blocking(appender))
}

/// JSON lines for the shipper. Only adapter events are shipped, and never the
/// shipper's own warnings, so a failing telemetry adapter cannot feed itself.
pub fn shipping_layer<S>(shipper: LogShipper) -> impl Layer<S> + Send + Sync + 'static
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let targets = Targets::new()
        .with_target("chatroom_adapters::shipping", LevelFilter::OFF)
        .with_target("chatroom_adapters", Level::INFO)
        .with_target("storage_adapter", Level::INFO);
    fmt::layer()
        .json()
        .with_ansi(false)
        .with_writer(shipper)
        .with_filter(targets)
}

fn ship_to(cfg: &Config, ship: &LogShipConfig) -> AdapterResult<(LogShipper, JoinHandle<()>)> {
    let channel = client::connect_lazy(&ship.url, &cfg.tls)?;
    let routing = RoutingParams::table(&ship.db, &ship.table);
    let telemetry = TelemetryClient::new(channel, &cfg.adapter.token, &routing)?;
    Ok(LogShipper::spawn(telemetry, ship.buffer))
}

/// Install the global subscriber. Fails if one is already installed.
///
/// Must run inside the Tokio runtime when log shipping is configured.
pub fn init_tracing(cfg: &Config) -> AdapterResult<TracingGuard> {
    let kind = cfg.adapter.kind;
    let tracer = if env_flag("OTEL_ENABLED") {
        Some(otlp_tracer(kind)?)
    } else {
        None
    };
    let otlp = tracer.is_some();
    let json = env::var("LOG_FORMAT").is_ok_and(|v| v == "json");

    let (file_writer, file_guard) = match &cfg.logs.dir {
        Some(dir) => {
            let (writer, guard) = log_file(dir, kind)?;
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };
    let shipper = cfg
        .logs
        .ship
        .as_ref()
        .map(|ship| ship_to(cfg, ship))
        .transpose()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()))
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .with(file_writer.map(|w| fmt::layer().json().with_ansi(false).with_writer(w)))
        .with(shipper.as_ref().map(|(s, _)| shipping_layer(s.clone())))
        .with(tracer.map(|t| tracing_opentelemetry::layer().with_tracer(t)))
        .try_init()
        .map_err(|e| AdapterError::InternalError(format!("Failed to install subscriber: {e}")))?;

    tracing::debug!(
        adapter = kind.as_str(),
        json,
        otlp,
        file = cfg.logs.dir.is_some(),
        shipped = shipper.is_some(),
        "tracing initialized"
    );
    Ok(TracingGuard {
        _file: file_guard,
        shipper,
    })
}

/// Flush pending spans before exit.
pub fn shutdown_tracing() {
    global::shutdown_tracer_provider();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_is_named_after_the_adapter() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, guard) = log_file(dir.path(), AdapterKind::Users).unwrap();
        let subscriber = tracing_subscriber::registry()
            .with(fmt::layer().json().with_ansi(false).with_writer(writer));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(login = "alice", "session stored");
        });
        // Dropping the guard flushes the background writer
        drop(guard);

        let text = std::fs::read_to_string(dir.path().join("users-adapter.log")).unwrap();
        assert!(text.contains("session stored"));
        assert!(text.contains("\"login\":\"alice\""));
    }

    #[test]
    fn test_unwritable_log_dir_is_a_configuration_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = log_file(&file.path().join("nested"), AdapterKind::Chat).unwrap_err();
        assert!(matches!(err, AdapterError::ConfigurationError(_)));
    }
}
