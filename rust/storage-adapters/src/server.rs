//! Adapter process assembly: stores, pipeline, TLS, reflection and shutdown.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::{error, info, warn};

use crate::adapter::{
    ChatAdapter, ChatHistoryService, TelemetryAdapter, TelemetryService, UserStoreService,
    UsersAdapter,
};
use crate::admission::AdmissionLayer;
use crate::backend::columnar::ClickHouseSink;
use crate::backend::document::MongoDocumentStore;
use crate::backend::keyvalue::{RedisKeyValueStore, RedisPool};
use crate::backend::memory::{MemoryColumnarSink, MemoryDocumentStore, MemoryKeyValueStore};
use crate::backend::{ColumnarSink, DocumentStore, KeyValueStore};
use crate::cache::WriteCache;
use crate::config::{AdapterKind, BackendKind, Config};
use crate::credential::TokenAuthorizer;
use crate::error::AdapterResult;
use crate::pipeline::Pipeline;
use crate::proto::FILE_DESCRIPTOR_SET;
use crate::tls;

pub fn document_store(config: &Config) -> Arc<dyn DocumentStore> {
    match config.adapter.backend {
        BackendKind::Native => Arc::new(MongoDocumentStore::new(
            &config.mongo,
            config.connect_timeout(),
            config.operation_timeout(),
        )),
        BackendKind::Memory => Arc::new(MemoryDocumentStore::new()),
    }
}

pub fn key_value_store(config: &Config) -> AdapterResult<Arc<dyn KeyValueStore>> {
    Ok(match config.adapter.backend {
        BackendKind::Native => {
            let pool = RedisPool::new(&config.redis, config.connect_timeout())?;
            Arc::new(RedisKeyValueStore::new(pool, config.operation_timeout()))
        }
        BackendKind::Memory => Arc::new(MemoryKeyValueStore::new()),
    })
}

pub fn columnar_sink(config: &Config) -> Arc<dyn ColumnarSink> {
    match config.adapter.backend {
        BackendKind::Native => Arc::new(ClickHouseSink::new(
            &config.clickhouse,
            config.connect_timeout(),
            config.operation_timeout(),
        )),
        BackendKind::Memory => Arc::new(MemoryColumnarSink::new()),
    }
}

pub async fn bind(config: &Config) -> Result<TcpListener> {
    TcpListener::bind(&config.adapter.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.adapter.listen_addr))
}

/// Serve the adapter selected by `adapter.kind` until `shutdown` resolves.
///
/// The telemetry write-cache is flushed once after the listener stops.
pub async fn serve<F>(config: &Config, listener: TcpListener, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    let kind = config.adapter.kind;
    let pipeline = Pipeline::new(TokenAuthorizer::new(config.adapter.token.clone()));

    let mut builder = Server::builder();
    if config.tls.enabled {
        let tls_config = tls::server_tls(&config.tls).context("Failed to load TLS material")?;
        builder = builder
            .tls_config(tls_config)
            .context("Failed to configure TLS")?;
    } else {
        warn!("TLS disabled; client certificates are not verified");
    }

    let reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()
        .context("Failed to build reflection service")?;

    let router = builder.layer(AdmissionLayer).add_service(reflection);

    let mut cache: Option<Arc<WriteCache>> = None;
    let router = match kind {
        AdapterKind::Chat => {
            let adapter = ChatAdapter::new(document_store(config));
            router.add_service(ChatHistoryService::new(adapter, pipeline).into_service())
        }
        AdapterKind::Users => {
            let adapter = UsersAdapter::new(key_value_store(config)?);
            router.add_service(UserStoreService::new(adapter, pipeline).into_service())
        }
        AdapterKind::Telemetry => {
            let sink = columnar_sink(config);
            let write_cache = Arc::new(WriteCache::new(config.cache.capacity, Arc::clone(&sink)));
            cache = Some(Arc::clone(&write_cache));
            let adapter = TelemetryAdapter::new(write_cache, sink);
            router.add_service(TelemetryService::new(adapter, pipeline).into_service())
        }
    };

    let addr = listener.local_addr().context("Listener has no local address")?;
    info!(
        kind = kind.as_str(),
        backend = ?config.adapter.backend,
        tls = config.tls.enabled,
        "Storage adapter listening on {} with reflection enabled",
        addr
    );

    let served = router
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
        .await
        .context("gRPC server failed");

    if let Some(cache) = cache {
        if let Err(e) = cache.shutdown().await {
            error!("Buffered telemetry lost on shutdown: {}", e);
        }
    }

    served?;
    info!(kind = kind.as_str(), "Storage adapter stopped");
    Ok(())
}
