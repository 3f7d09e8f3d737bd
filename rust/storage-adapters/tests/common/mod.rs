//! Shared helpers: counting store doubles and request builders.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatroom_adapters::adapter::{
    ChatAdapter, ChatHistoryService, TelemetryAdapter, TelemetryService, UserStoreService,
    UsersAdapter,
};
use chatroom_adapters::backend::memory::{
    MemoryColumnarSink, MemoryDocumentStore, MemoryKeyValueStore,
};
use chatroom_adapters::backend::{
    ChatRecord, ColumnarSink, DocumentStore, KeyValueStore, LogRow, UserRecord,
};
use chatroom_adapters::cache::WriteCache;
use chatroom_adapters::config::{AdapterKind, BackendKind, Config};
use chatroom_adapters::credential::TokenAuthorizer;
use chatroom_adapters::error::{AdapterError, AdapterResult, APP_STATUS_KEY};
use chatroom_adapters::metadata::{
    CollectionRoute, TableRoute, Ttl, AUTHORIZATION, COLLECTION_NAME, DB_NAME, EXPIRATION_TIME,
    TABLE_NAME,
};
use chatroom_adapters::pipeline::Pipeline;
use chatroom_adapters::server;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tonic::{Request, Status};

pub const TOKEN: &str = "sometoken";

pub fn pipeline() -> Pipeline {
    Pipeline::new(TokenAuthorizer::new(TOKEN))
}

/// Request carrying `token` (if any) and the given metadata pairs.
pub fn request<T>(message: T, token: Option<&str>, pairs: &[(&'static str, &str)]) -> Request<T> {
    let mut req = Request::new(message);
    let md = req.metadata_mut();
    if let Some(token) = token {
        md.insert(AUTHORIZATION, token.parse().unwrap());
    }
    for (key, value) in pairs {
        md.append(*key, value.parse().unwrap());
    }
    req
}

/// Request with the right token and the given metadata pairs.
pub fn authed<T>(message: T, pairs: &[(&'static str, &str)]) -> Request<T> {
    request(message, Some(TOKEN), pairs)
}

pub const CHAT_ROUTE: &[(&str, &str)] = &[(DB_NAME, "test"), (COLLECTION_NAME, "messages")];
pub const USERS_ROUTE: &[(&str, &str)] = &[(DB_NAME, "chat"), (COLLECTION_NAME, "users")];
pub const LOGS_ROUTE: &[(&str, &str)] = &[(DB_NAME, "logs"), (TABLE_NAME, "access")];

pub fn ttl_route(secs: &str) -> Vec<(&'static str, &str)> {
    vec![(EXPIRATION_TIME, secs)]
}

pub fn app_status(status: &Status) -> Option<String> {
    status
        .metadata()
        .get(APP_STATUS_KEY)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[derive(Debug, Default)]
pub struct CountingDocumentStore {
    inner: MemoryDocumentStore,
    pub calls: AtomicUsize,
}

impl CountingDocumentStore {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for CountingDocumentStore {
    async fn insert(&self, route: &CollectionRoute, record: ChatRecord) -> AdapterResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.insert(route, record).await
    }

    async fn find_all(&self, route: &CollectionRoute) -> AdapterResult<Vec<ChatRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.find_all(route).await
    }
}

#[derive(Debug, Default)]
pub struct CountingKeyValueStore {
    pub inner: MemoryKeyValueStore,
    pub calls: AtomicUsize,
}

impl CountingKeyValueStore {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyValueStore for CountingKeyValueStore {
    async fn put_user(&self, route: &CollectionRoute, user: UserRecord) -> AdapterResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.put_user(route, user).await
    }

    async fn get_user(
        &self,
        route: &CollectionRoute,
        login: &str,
    ) -> AdapterResult<Option<UserRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get_user(route, login).await
    }

    async fn set_session(&self, session_id: &str, login: &str, ttl: Ttl) -> AdapterResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.set_session(session_id, login, ttl).await
    }

    async fn touch_session(&self, session_id: &str, ttl: Ttl) -> AdapterResult<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.touch_session(session_id, ttl).await
    }
}

/// Columnar sink counting batches, with a switch to make inserts fail.
#[derive(Debug, Default)]
pub struct CountingSink {
    inner: MemoryColumnarSink,
    pub batches: AtomicUsize,
    pub rows: AtomicUsize,
    pub failing: AtomicBool,
}

impl CountingSink {
    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    pub fn rows(&self) -> usize {
        self.rows.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ColumnarSink for CountingSink {
    async fn insert_batch(&self, route: &TableRoute, rows: &[LogRow]) -> AdapterResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AdapterError::BackendUnavailable(
                "clickhouse ping: connection refused".into(),
            ));
        }
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.rows.fetch_add(rows.len(), Ordering::SeqCst);
        self.inner.insert_batch(route, rows).await
    }

    async fn read_rows(&self, route: &TableRoute) -> AdapterResult<Vec<LogRow>> {
        self.inner.read_rows(route).await
    }
}

pub fn chat_service() -> (Arc<CountingDocumentStore>, ChatHistoryService) {
    let store = Arc::new(CountingDocumentStore::default());
    let adapter = ChatAdapter::new(Arc::clone(&store) as Arc<dyn DocumentStore>);
    (store, ChatHistoryService::new(adapter, pipeline()))
}

pub fn users_service() -> (Arc<CountingKeyValueStore>, UserStoreService) {
    let store = Arc::new(CountingKeyValueStore::default());
    let adapter = UsersAdapter::new(Arc::clone(&store) as Arc<dyn KeyValueStore>);
    (store, UserStoreService::new(adapter, pipeline()))
}

pub fn telemetry_service(capacity: usize) -> (Arc<CountingSink>, Arc<WriteCache>, TelemetryService) {
    let sink = Arc::new(CountingSink::default());
    let sink_dyn = Arc::clone(&sink) as Arc<dyn ColumnarSink>;
    let cache = Arc::new(WriteCache::new(capacity, Arc::clone(&sink_dyn)));
    let adapter = TelemetryAdapter::new(Arc::clone(&cache), sink_dyn);
    (sink, cache, TelemetryService::new(adapter, pipeline()))
}

/// Memory-backed adapter on an ephemeral loopback port, TLS off.
pub fn memory_config(kind: AdapterKind) -> Config {
    let mut cfg = Config::default();
    cfg.adapter.kind = kind;
    cfg.adapter.backend = BackendKind::Memory;
    cfg.adapter.listen_addr = "127.0.0.1:0".to_string();
    cfg.adapter.token = TOKEN.to_string();
    cfg.tls.enabled = false;
    cfg
}

/// A `server::serve` task bound to loopback.
pub struct LoopbackServer {
    pub addr: SocketAddr,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl LoopbackServer {
    pub async fn start(cfg: Config) -> Self {
        let listener = server::bind(&cfg).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            server::serve(&cfg, listener, async {
                let _ = stopped.await;
            })
            .await
        });
        Self { addr, stop, handle }
    }

    /// Signal shutdown and wait for the final cache flush. Open channels
    /// must be dropped first or the graceful shutdown waits on them.
    pub async fn stop(self) {
        let _ = self.stop.send(());
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}
