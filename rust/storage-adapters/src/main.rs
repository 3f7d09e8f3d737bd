use chatroom_adapters::tracing as trace_mod;

use anyhow::{Context, Result};
use tracing::info;

use chatroom_adapters::config::Config;
use chatroom_adapters::server;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load adapter configuration")?;

    let tracing_guard = match trace_mod::init_tracing(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize tracing: {e}");
            trace_mod::TracingGuard::default()
        }
    };

    info!(
        kind = config.adapter.kind.as_str(),
        "Starting chat room storage adapter"
    );

    if config.metrics.enabled {
        let metrics_port = config.metrics.port;
        tokio::spawn(async move {
            if let Err(e) = chatroom_adapters::metrics::start_metrics_server(metrics_port).await {
                tracing::error!("Failed to start metrics server: {}", e);
            }
        });
    }

    let listener = server::bind(&config).await?;
    let result = server::serve(&config, listener, shutdown_signal()).await;

    let dropped = tracing_guard.dropped_lines();
    if dropped > 0 {
        tracing::warn!(dropped, "log lines were not shipped");
    }
    trace_mod::shutdown_tracing();
    drop(tracing_guard);
    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received");
}
