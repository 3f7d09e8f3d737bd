//! Process-local stores with the same contracts as the native ones.
//!
//! Session expiry uses `tokio::time::Instant`, so tests can drive TTLs with
//! a paused clock.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{
    user_key, ChatRecord, ColumnarSink, DocumentStore, KeyValueStore, LogRow, UserRecord,
};
use crate::error::{AdapterError, AdapterResult};
use crate::metadata::{CollectionRoute, TableRoute, Ttl, EXPIRATION_TIME};

#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: Mutex<HashMap<(String, String), Vec<ChatRecord>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn collection_key(route: &CollectionRoute) -> (String, String) {
    (route.db.clone(), route.collection.clone())
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn insert(&self, route: &CollectionRoute, record: ChatRecord) -> AdapterResult<()> {
        self.collections
            .lock()
            .entry(collection_key(route))
            .or_default()
            .push(record);
        Ok(())
    }

    async fn find_all(&self, route: &CollectionRoute) -> AdapterResult<Vec<ChatRecord>> {
        Ok(self
            .collections
            .lock()
            .get(&collection_key(route))
            .cloned()
            .unwrap_or_default())
    }
}

fn expiry(from: Instant, ttl: Ttl) -> AdapterResult<Instant> {
    from.checked_add(ttl.as_duration())
        .ok_or_else(|| AdapterError::invalid(EXPIRATION_TIME, "expiry is out of range"))
}

#[derive(Debug)]
struct Session {
    login: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    users: Mutex<HashMap<String, UserRecord>>,
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sessions not yet expired.
    pub fn live_sessions(&self) -> usize {
        let now = Instant::now();
        self.sessions
            .lock()
            .values()
            .filter(|s| s.expires_at > now)
            .count()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn put_user(&self, route: &CollectionRoute, user: UserRecord) -> AdapterResult<()> {
        self.users.lock().insert(user_key(route, &user.login), user);
        Ok(())
    }

    async fn get_user(
        &self,
        route: &CollectionRoute,
        login: &str,
    ) -> AdapterResult<Option<UserRecord>> {
        Ok(self.users.lock().get(&user_key(route, login)).cloned())
    }

    async fn set_session(&self, session_id: &str, login: &str, ttl: Ttl) -> AdapterResult<()> {
        let expires_at = expiry(Instant::now(), ttl)?;
        self.sessions.lock().insert(
            session_id.to_string(),
            Session {
                login: login.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn touch_session(&self, session_id: &str, ttl: Ttl) -> AdapterResult<Option<String>> {
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get_mut(session_id) else {
            return Ok(None);
        };
        if session.expires_at > now {
            session.expires_at = expiry(now, ttl)?;
            return Ok(Some(session.login.clone()));
        }
        sessions.remove(session_id);
        Ok(None)
    }
}

#[derive(Debug, Default)]
pub struct MemoryColumnarSink {
    tables: Mutex<HashMap<String, Vec<LogRow>>>,
}

impl MemoryColumnarSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ColumnarSink for MemoryColumnarSink {
    async fn insert_batch(&self, route: &TableRoute, rows: &[LogRow]) -> AdapterResult<()> {
        self.tables
            .lock()
            .entry(route.qualified())
            .or_default()
            .extend_from_slice(rows);
        Ok(())
    }

    async fn read_rows(&self, route: &TableRoute) -> AdapterResult<Vec<LogRow>> {
        let mut rows = self
            .tables
            .lock()
            .get(&route.qualified())
            .cloned()
            .unwrap_or_default();
        rows.sort_by_key(|r| r.action_time);
        Ok(rows)
    }
}
