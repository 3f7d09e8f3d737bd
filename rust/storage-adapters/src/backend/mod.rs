//! Store access behind narrow async traits.
//!
//! Each adapter talks to exactly one of these traits. The native
//! implementations wrap MongoDB ([`document`]), Redis ([`keyvalue`]) and
//! ClickHouse ([`columnar`]); [`memory`] keeps the same contracts in process
//! for development and tests.

pub mod columnar;
pub mod document;
pub mod keyvalue;
pub mod memory;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AdapterError, AdapterResult};
use crate::metadata::{CollectionRoute, TableRoute, Ttl};

/// One chat line as stored in the document store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub time: String,
    pub name: String,
    pub message: String,
}

/// A registered user, stored as a hash keyed by login.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserRecord {
    pub login: String,
    pub fname: String,
    pub lname: String,
    pub pass: Vec<u8>,
    pub role: String,
    pub last_active: String,
}

/// A telemetry line waiting in the write-cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryItem {
    pub route: TableRoute,
    pub row: LogRow,
}

/// Columnar row layout: `(log String, action_time DateTime)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, clickhouse::Row)]
pub struct LogRow {
    pub log: String,
    /// Unix seconds
    pub action_time: u32,
}

impl LogRow {
    /// Row stamped with the current wall-clock second.
    pub fn now(log: impl Into<String>) -> Self {
        let secs = chrono::Utc::now().timestamp();
        Self {
            log: log.into(),
            action_time: u32::try_from(secs).unwrap_or(u32::MAX),
        }
    }
}

/// Append-only document storage used by the chat history adapter.
#[async_trait]
pub trait DocumentStore: Send + Sync + std::fmt::Debug {
    async fn insert(&self, route: &CollectionRoute, record: ChatRecord) -> AdapterResult<()>;

    /// Every record in the collection, in insertion order.
    async fn find_all(&self, route: &CollectionRoute) -> AdapterResult<Vec<ChatRecord>>;
}

/// Users and sliding-TTL sessions.
#[async_trait]
pub trait KeyValueStore: Send + Sync + std::fmt::Debug {
    async fn put_user(&self, route: &CollectionRoute, user: UserRecord) -> AdapterResult<()>;

    async fn get_user(
        &self,
        route: &CollectionRoute,
        login: &str,
    ) -> AdapterResult<Option<UserRecord>>;

    /// Store `session_id -> login`, expiring `ttl` from now, in one operation.
    async fn set_session(&self, session_id: &str, login: &str, ttl: Ttl) -> AdapterResult<()>;

    /// Look up a session and, when present, push its expiry to `ttl` from now.
    async fn touch_session(&self, session_id: &str, ttl: Ttl) -> AdapterResult<Option<String>>;
}

/// Destination for flushed telemetry batches.
#[async_trait]
pub trait ColumnarSink: Send + Sync + std::fmt::Debug {
    /// Create the database and table if needed, then insert `rows` as one batch.
    async fn insert_batch(&self, route: &TableRoute, rows: &[LogRow]) -> AdapterResult<()>;

    /// Rows already persisted in `route`, ordered by `action_time`.
    async fn read_rows(&self, route: &TableRoute) -> AdapterResult<Vec<LogRow>>;
}

/// Bound a backend step; elapsed deadlines surface as [`AdapterError::BackendUnavailable`].
pub(crate) async fn bounded<T, F>(what: &str, limit: Duration, fut: F) -> AdapterResult<T>
where
    F: Future<Output = AdapterResult<T>>,
{
    tokio::time::timeout(limit, fut).await.map_err(|elapsed| {
        AdapterError::BackendUnavailable(format!(
            "{what} timed out after {}s ({elapsed})",
            limit.as_secs()
        ))
    })?
}

/// Users live under `db:collection:login`.
pub(crate) fn user_key(route: &CollectionRoute, login: &str) -> String {
    format!("{}:{}:{}", route.db, route.collection, login)
}

/// Reclassify a driver failure that happened while reading.
pub(crate) fn read_failure(err: AdapterError) -> AdapterError {
    match err {
        AdapterError::BackendWrite(msg) => AdapterError::BackendRead(msg),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_bounded_times_out() {
        let err = bounded("ping", Duration::from_secs(10), async {
            tokio::time::sleep(Duration::from_secs(11)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, AdapterError::BackendUnavailable(_)));
        assert!(err.to_string().contains("ping timed out after 10s"));
    }

    #[tokio::test]
    async fn test_bounded_passes_result_through() {
        let value = bounded("read", Duration::from_secs(1), async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_log_row_now_is_recent() {
        let row = LogRow::now("GET /");
        assert_eq!(row.log, "GET /");
        assert!(row.action_time > 1_600_000_000);
    }
}
