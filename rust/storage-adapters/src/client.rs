//! Typed clients for the web tier.
//!
//! Every client dials over mutual TLS (unless disabled in config) and stamps
//! the bearer token and its routing parameters onto each call.

use std::time::Duration;

use tonic::service::interceptor::InterceptedService;
use tonic::transport::{Channel, Endpoint};

use crate::backend::UserRecord;
use crate::config::TlsConfig;
use crate::credential::BearerCredential;
use crate::error::{AdapterError, AdapterResult};
use crate::metadata::{COLLECTION_NAME, DB_NAME, EXPIRATION_TIME, TABLE_NAME};
use crate::proto::chat_history_client::ChatHistoryClient as ChatHistoryStub;
use crate::proto::telemetry_client::TelemetryClient as TelemetryStub;
use crate::proto::user_store_client::UserStoreClient as UserStoreStub;
use crate::proto::{
    ChatMessage, ChatReadRequest, ChatWriteRequest, LogRecord, SessionReadRequest,
    SessionWriteRequest, TelemetryReadRequest, TelemetryWriteRequest, UserReadRequest,
    UserWriteRequest,
};

type Authed = InterceptedService<Channel, BearerCredential>;

/// Routing metadata a client attaches to every call.
#[derive(Debug, Clone, Default)]
pub struct RoutingParams {
    pub db: String,
    pub collection: Option<String>,
    pub table: Option<String>,
    /// Session TTL in seconds
    pub expiration_secs: Option<u64>,
}

impl RoutingParams {
    pub fn collection(db: &str, collection: &str) -> Self {
        Self {
            db: db.to_string(),
            collection: Some(collection.to_string()),
            ..Self::default()
        }
    }

    pub fn table(db: &str, table: &str) -> Self {
        Self {
            db: db.to_string(),
            table: Some(table.to_string()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_expiration(mut self, secs: u64) -> Self {
        self.expiration_secs = Some(secs);
        self
    }

    fn credential(&self, token: &str) -> AdapterResult<BearerCredential> {
        let mut cred = BearerCredential::new(token)?.with_routing(DB_NAME, &self.db)?;
        if let Some(collection) = &self.collection {
            cred = cred.with_routing(COLLECTION_NAME, collection)?;
        }
        if let Some(table) = &self.table {
            cred = cred.with_routing(TABLE_NAME, table)?;
        }
        if let Some(secs) = self.expiration_secs {
            cred = cred.with_routing(EXPIRATION_TIME, &secs.to_string())?;
        }
        Ok(cred)
    }
}

/// Open a channel to an adapter at `url` (`https://host:port`).
pub async fn connect(url: &str, tls: &TlsConfig, timeout: Duration) -> AdapterResult<Channel> {
    let mut endpoint = Endpoint::from_shared(url.to_string())
        .map_err(|e| AdapterError::ConfigurationError(format!("invalid adapter url '{url}': {e}")))?
        .connect_timeout(timeout);
    if tls.enabled {
        endpoint = endpoint.tls_config(crate::tls::client_tls(tls)?)?;
    }
    Ok(endpoint.connect().await?)
}

/// Like [`connect`], but the connection is made on first use.
pub fn connect_lazy(url: &str, tls: &TlsConfig) -> AdapterResult<Channel> {
    let mut endpoint = Endpoint::from_shared(url.to_string())
        .map_err(|e| AdapterError::ConfigurationError(format!("invalid adapter url '{url}': {e}")))?;
    if tls.enabled {
        endpoint = endpoint.tls_config(crate::tls::client_tls(tls)?)?;
    }
    Ok(endpoint.connect_lazy())
}

#[derive(Debug, Clone)]
pub struct ChatHistoryClient {
    inner: ChatHistoryStub<Authed>,
}

impl ChatHistoryClient {
    pub fn new(channel: Channel, token: &str, routing: &RoutingParams) -> AdapterResult<Self> {
        Ok(Self {
            inner: ChatHistoryStub::with_interceptor(channel, routing.credential(token)?),
        })
    }

    pub async fn write(&mut self, time: &str, name: &str, message: &str) -> AdapterResult<()> {
        self.inner
            .write(ChatWriteRequest {
                time: time.to_string(),
                name: name.to_string(),
                message: message.to_string(),
            })
            .await?;
        Ok(())
    }

    pub async fn read(&mut self, time: &str, number: i32) -> AdapterResult<Vec<ChatMessage>> {
        let reply = self
            .inner
            .read(ChatReadRequest {
                time: time.to_string(),
                number,
            })
            .await?;
        Ok(reply.into_inner().results)
    }
}

#[derive(Debug, Clone)]
pub struct UserStoreClient {
    inner: UserStoreStub<Authed>,
}

impl UserStoreClient {
    pub fn new(channel: Channel, token: &str, routing: &RoutingParams) -> AdapterResult<Self> {
        Ok(Self {
            inner: UserStoreStub::with_interceptor(channel, routing.credential(token)?),
        })
    }

    pub async fn write(&mut self, user: UserRecord) -> AdapterResult<()> {
        self.inner
            .write(UserWriteRequest {
                login: user.login,
                fname: user.fname,
                lname: user.lname,
                pass: user.pass,
                role: user.role,
                last_active: user.last_active,
            })
            .await?;
        Ok(())
    }

    pub async fn read(&mut self, login: &str) -> AdapterResult<Option<UserRecord>> {
        let reply = self
            .inner
            .read(UserReadRequest {
                login: login.to_string(),
            })
            .await?
            .into_inner();
        Ok(reply.results.into_iter().next().map(|u| UserRecord {
            login: u.login,
            fname: u.fname,
            lname: u.lname,
            pass: u.pass,
            role: u.role,
            last_active: u.last_active,
        }))
    }

    pub async fn add_session(&mut self, session_id: &str, login: &str) -> AdapterResult<()> {
        self.inner
            .session_write(SessionWriteRequest {
                session_id: session_id.to_string(),
                login: login.to_string(),
            })
            .await?;
        Ok(())
    }

    /// `None` when the session is unknown or has expired.
    pub async fn get_session(&mut self, session_id: &str) -> AdapterResult<Option<String>> {
        let reply = self
            .inner
            .session_read(SessionReadRequest {
                session_id: session_id.to_string(),
            })
            .await?
            .into_inner();
        Ok(reply.found.then_some(reply.login))
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryClient {
    inner: TelemetryStub<Authed>,
}

impl TelemetryClient {
    pub fn new(channel: Channel, token: &str, routing: &RoutingParams) -> AdapterResult<Self> {
        Ok(Self {
            inner: TelemetryStub::with_interceptor(channel, routing.credential(token)?),
        })
    }

    pub async fn write(&mut self, log: &str) -> AdapterResult<()> {
        self.inner
            .write(TelemetryWriteRequest {
                log: log.to_string(),
            })
            .await?;
        Ok(())
    }

    pub async fn read(&mut self, number: i32) -> AdapterResult<Vec<LogRecord>> {
        let reply = self
            .inner
            .read(TelemetryReadRequest { number })
            .await?
            .into_inner();
        Ok(reply.results)
    }
}
