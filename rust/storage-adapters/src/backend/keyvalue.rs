//! Redis-backed users and sessions with a small idle-connection pool.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, warn};

use super::{bounded, read_failure, user_key, KeyValueStore, UserRecord};
use crate::config::RedisConfig;
use crate::error::{AdapterError, AdapterResult};
use crate::metadata::{CollectionRoute, Ttl};

struct IdleConnection {
    conn: MultiplexedConnection,
    since: Instant,
}

/// Keeps up to `max_idle` connections for reuse.
///
/// Connections idle longer than `idle_check` are pinged before being handed
/// out; a failed ping drops the connection and a fresh one is dialed.
pub struct RedisPool {
    client: redis::Client,
    idle: Mutex<VecDeque<IdleConnection>>,
    max_idle: usize,
    idle_check: Duration,
    connect_timeout: Duration,
}

impl std::fmt::Debug for RedisPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisPool")
            .field("idle", &self.idle.lock().len())
            .field("max_idle", &self.max_idle)
            .field("idle_check", &self.idle_check)
            .finish_non_exhaustive()
    }
}

impl RedisPool {
    pub fn new(cfg: &RedisConfig, connect_timeout: Duration) -> AdapterResult<Arc<Self>> {
        let client = redis::Client::open(cfg.url.as_str()).map_err(|e| {
            AdapterError::ConfigurationError(format!("invalid redis url '{}': {e}", cfg.url))
        })?;
        Ok(Arc::new(Self {
            client,
            idle: Mutex::new(VecDeque::with_capacity(cfg.max_idle)),
            max_idle: cfg.max_idle,
            idle_check: cfg.idle_check(),
            connect_timeout,
        }))
    }

    /// Borrow a connection; it returns to the pool when the guard drops.
    pub async fn get(self: &Arc<Self>) -> AdapterResult<PooledConnection> {
        loop {
            let candidate = self.idle.lock().pop_back();
            let Some(idle) = candidate else { break };

            let mut conn = idle.conn;
            if idle.since.elapsed() < self.idle_check {
                return Ok(self.wrap(conn));
            }
            let ping = bounded("redis ping", self.connect_timeout, async {
                redis::cmd("PING")
                    .query_async::<String>(&mut conn)
                    .await
                    .map_err(AdapterError::from)
            })
            .await;
            match ping {
                Ok(_) => return Ok(self.wrap(conn)),
                Err(e) => warn!("Dropping stale redis connection: {}", e),
            }
        }

        let conn = bounded("redis connect", self.connect_timeout, async {
            self.client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| AdapterError::BackendUnavailable(format!("redis: {e}")))
        })
        .await?;
        Ok(self.wrap(conn))
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    fn wrap(self: &Arc<Self>, conn: MultiplexedConnection) -> PooledConnection {
        PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(self),
        }
    }

    fn release(&self, conn: MultiplexedConnection) {
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push_back(IdleConnection {
                conn,
                since: Instant::now(),
            });
        }
    }
}

/// RAII guard over a pooled connection.
pub struct PooledConnection {
    conn: Option<MultiplexedConnection>,
    pool: Arc<RedisPool>,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("live", &self.conn.is_some())
            .finish_non_exhaustive()
    }
}

impl PooledConnection {
    fn conn(&mut self) -> AdapterResult<&mut MultiplexedConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| AdapterError::InternalError("pooled connection already released".into()))
    }

    /// Drop the connection instead of returning it, after a failed command.
    fn discard(mut self) {
        self.conn = None;
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedisKeyValueStore {
    pool: Arc<RedisPool>,
    operation_timeout: Duration,
}

impl RedisKeyValueStore {
    pub fn new(pool: Arc<RedisPool>, operation_timeout: Duration) -> Self {
        Self {
            pool,
            operation_timeout,
        }
    }

    /// Run `op` on a pooled connection; failed connections are not reused.
    async fn with_conn<T, F>(&self, what: &str, op: F) -> AdapterResult<T>
    where
        T: Send,
        F: for<'c> FnOnce(
                &'c mut MultiplexedConnection,
            ) -> futures::future::BoxFuture<'c, redis::RedisResult<T>>
            + Send,
    {
        let mut guard = self.pool.get().await?;
        let conn = guard.conn()?;
        let result = bounded(what, self.operation_timeout, async {
            op(conn).await.map_err(AdapterError::from)
        })
        .await;
        if result.is_err() {
            guard.discard();
        }
        result
    }
}

fn user_fields(user: &UserRecord) -> Vec<(&'static str, Vec<u8>)> {
    vec![
        ("login", user.login.as_bytes().to_vec()),
        ("fname", user.fname.as_bytes().to_vec()),
        ("lname", user.lname.as_bytes().to_vec()),
        ("pass", user.pass.clone()),
        ("role", user.role.as_bytes().to_vec()),
        ("last_active", user.last_active.as_bytes().to_vec()),
    ]
}

fn user_from_fields(mut fields: HashMap<String, Vec<u8>>) -> Option<UserRecord> {
    let mut text = |key: &str| {
        fields
            .remove(key)
            .map(|v| String::from_utf8_lossy(&v).into_owned())
            .unwrap_or_default()
    };
    let login = text("login");
    if login.is_empty() {
        return None;
    }
    let fname = text("fname");
    let lname = text("lname");
    let role = text("role");
    let last_active = text("last_active");
    Some(UserRecord {
        login,
        fname,
        lname,
        pass: fields.remove("pass").unwrap_or_default(),
        role,
        last_active,
    })
}

#[async_trait]
impl KeyValueStore for RedisKeyValueStore {
    async fn put_user(&self, route: &CollectionRoute, user: UserRecord) -> AdapterResult<()> {
        let key = user_key(route, &user.login);
        let fields = user_fields(&user);
        self.with_conn::<(), _>("redis hset", move |conn| {
            Box::pin(async move { conn.hset_multiple(&key, fields.as_slice()).await })
        })
        .await?;
        debug!(login = %user.login, "user stored");
        Ok(())
    }

    async fn get_user(
        &self,
        route: &CollectionRoute,
        login: &str,
    ) -> AdapterResult<Option<UserRecord>> {
        let key = user_key(route, login);
        let fields = self
            .with_conn::<HashMap<String, Vec<u8>>, _>("redis hgetall", move |conn| {
                Box::pin(async move { conn.hgetall(&key).await })
            })
            .await
            .map_err(read_failure)?;
        Ok(user_from_fields(fields))
    }

    async fn set_session(&self, session_id: &str, login: &str, ttl: Ttl) -> AdapterResult<()> {
        let (key, value) = (session_id.to_string(), login.to_string());
        self.with_conn::<(), _>("redis set ex", move |conn| {
            Box::pin(async move { conn.set_ex(&key, &value, ttl.secs()).await })
        })
        .await
    }

    async fn touch_session(&self, session_id: &str, ttl: Ttl) -> AdapterResult<Option<String>> {
        let key = session_id.to_string();
        let secs = i64::try_from(ttl.secs()).unwrap_or(i64::MAX);
        let (login, _refreshed) = self
            .with_conn::<(Option<String>, bool), _>("redis get expire", move |conn| {
                Box::pin(async move {
                    redis::pipe()
                        .atomic()
                        .get(&key)
                        .expire(&key, secs)
                        .query_async(conn)
                        .await
                })
            })
            .await
            .map_err(read_failure)?;
        Ok(login)
    }
}
