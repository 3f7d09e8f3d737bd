//! Users and sessions over the key-value store.

use std::sync::Arc;

use async_trait::async_trait;
use tonic::{Request, Response, Status};
use tracing::debug;

use super::{write_ok, StorageAdapter, OK_DESCRIPTION};
use crate::backend::{KeyValueStore, UserRecord};
use crate::error::{AdapterError, AdapterResult};
use crate::metadata::CallContext;
use crate::pipeline::Pipeline;
use crate::proto::user_store_server::{UserStore, UserStoreServer};
use crate::proto::{
    SessionReadRequest, SessionReadResponse, SessionWriteRequest, UserInfo, UserReadRequest,
    UserReadResponse, UserWriteRequest, WriteResponse,
};

#[derive(Debug, Clone)]
pub struct UsersAdapter {
    store: Arc<dyn KeyValueStore>,
}

impl UsersAdapter {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

fn require(field: &'static str, value: &str) -> AdapterResult<()> {
    if value.is_empty() {
        return Err(AdapterError::invalid_field(field, "must not be empty"));
    }
    Ok(())
}

impl From<UserWriteRequest> for UserRecord {
    fn from(req: UserWriteRequest) -> Self {
        Self {
            login: req.login,
            fname: req.fname,
            lname: req.lname,
            pass: req.pass,
            role: req.role,
            last_active: req.last_active,
        }
    }
}

impl From<UserRecord> for UserInfo {
    fn from(user: UserRecord) -> Self {
        Self {
            login: user.login,
            fname: user.fname,
            lname: user.lname,
            pass: user.pass,
            role: user.role,
            last_active: user.last_active,
        }
    }
}

#[async_trait]
impl StorageAdapter for UsersAdapter {
    type WriteRequest = UserWriteRequest;
    type ReadRequest = UserReadRequest;
    type ReadResponse = UserReadResponse;

    const STORE: &'static str = "users";

    async fn write(&self, ctx: CallContext, req: UserWriteRequest) -> AdapterResult<WriteResponse> {
        let route = ctx.collection_route()?;
        require("login", &req.login)?;
        let mut user = UserRecord::from(req);
        if user.last_active.is_empty() {
            user.last_active = chrono::Utc::now().to_rfc3339();
        }
        self.store.put_user(&route, user).await?;
        Ok(write_ok())
    }

    /// Unknown logins produce an empty result, not an error.
    async fn read(&self, ctx: CallContext, req: UserReadRequest) -> AdapterResult<UserReadResponse> {
        let route = ctx.collection_route()?;
        let user = self.store.get_user(&route, &req.login).await?;
        Ok(UserReadResponse {
            status: 0,
            description: OK_DESCRIPTION.to_string(),
            results: user.into_iter().map(UserInfo::from).collect(),
        })
    }

    async fn session_write(
        &self,
        ctx: CallContext,
        req: SessionWriteRequest,
    ) -> AdapterResult<WriteResponse> {
        let ttl = ctx.ttl()?;
        require("session_id", &req.session_id)?;
        self.store
            .set_session(&req.session_id, &req.login, ttl)
            .await?;
        Ok(write_ok())
    }

    async fn session_read(
        &self,
        ctx: CallContext,
        req: SessionReadRequest,
    ) -> AdapterResult<SessionReadResponse> {
        let ttl = ctx.ttl()?;
        let login = self.store.touch_session(&req.session_id, ttl).await?;
        if login.is_none() {
            debug!(session_id = %req.session_id, "session not found or expired");
        }
        Ok(SessionReadResponse {
            status: 0,
            description: OK_DESCRIPTION.to_string(),
            found: login.is_some(),
            login: login.unwrap_or_default(),
        })
    }
}

/// gRPC face of [`UsersAdapter`].
#[derive(Debug, Clone)]
pub struct UserStoreService {
    adapter: UsersAdapter,
    pipeline: Pipeline,
}

impl UserStoreService {
    pub fn new(adapter: UsersAdapter, pipeline: Pipeline) -> Self {
        Self { adapter, pipeline }
    }

    pub fn into_service(self) -> UserStoreServer<Self> {
        UserStoreServer::new(self)
    }
}

#[tonic::async_trait]
impl UserStore for UserStoreService {
    async fn write(
        &self,
        request: Request<UserWriteRequest>,
    ) -> Result<Response<WriteResponse>, Status> {
        self.pipeline
            .unary("UserStore/Write", request, |ctx, msg| {
                self.adapter.write(ctx, msg)
            })
            .await
    }

    async fn read(
        &self,
        request: Request<UserReadRequest>,
    ) -> Result<Response<UserReadResponse>, Status> {
        self.pipeline
            .unary("UserStore/Read", request, |ctx, msg| {
                self.adapter.read(ctx, msg)
            })
            .await
    }

    async fn session_write(
        &self,
        request: Request<SessionWriteRequest>,
    ) -> Result<Response<WriteResponse>, Status> {
        self.pipeline
            .unary("UserStore/SessionWrite", request, |ctx, msg| {
                self.adapter.session_write(ctx, msg)
            })
            .await
    }

    async fn session_read(
        &self,
        request: Request<SessionReadRequest>,
    ) -> Result<Response<SessionReadResponse>, Status> {
        self.pipeline
            .unary("UserStore/SessionRead", request, |ctx, msg| {
                self.adapter.session_read(ctx, msg)
            })
            .await
    }
}
