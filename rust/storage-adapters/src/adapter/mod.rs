//! Capability adapters: the fixed operation set implemented per store.
//!
//! Each adapter implements [`StorageAdapter`] against one backend trait and
//! is exposed through its own generated gRPC service, every method of which
//! runs through the shared [`Pipeline`](crate::pipeline::Pipeline).

pub mod chat;
pub mod telemetry;
pub mod users;

use async_trait::async_trait;

use crate::error::{AdapterError, AdapterResult};
use crate::metadata::CallContext;
use crate::pipeline::Loggable;
use crate::proto::{
    ChatReadRequest, ChatReadResponse, ChatWriteRequest, SessionReadRequest, SessionReadResponse,
    SessionWriteRequest, TelemetryReadRequest, TelemetryReadResponse, TelemetryWriteRequest,
    UserInfo, UserReadRequest, UserReadResponse, UserWriteRequest, WriteResponse,
};

pub use chat::{ChatAdapter, ChatHistoryService};
pub use telemetry::{TelemetryAdapter, TelemetryService};
pub use users::{UserStoreService, UsersAdapter};

/// Description sent with every successful reply.
pub const OK_DESCRIPTION: &str = "Ok";

pub(crate) fn write_ok() -> WriteResponse {
    WriteResponse {
        status: 0,
        description: OK_DESCRIPTION.to_string(),
    }
}

/// Operations every store offers, plus the session pair only the
/// key-value store implements.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    type WriteRequest: Send + 'static;
    type ReadRequest: Send + 'static;
    type ReadResponse: Send + 'static;

    /// Store name used in logs and errors.
    const STORE: &'static str;

    async fn write(&self, ctx: CallContext, req: Self::WriteRequest)
        -> AdapterResult<WriteResponse>;

    async fn read(
        &self,
        ctx: CallContext,
        req: Self::ReadRequest,
    ) -> AdapterResult<Self::ReadResponse>;

    async fn session_write(
        &self,
        _ctx: CallContext,
        _req: SessionWriteRequest,
    ) -> AdapterResult<WriteResponse> {
        Err(AdapterError::Unsupported {
            operation: "SessionWrite",
            store: Self::STORE,
        })
    }

    async fn session_read(
        &self,
        _ctx: CallContext,
        _req: SessionReadRequest,
    ) -> AdapterResult<SessionReadResponse> {
        Err(AdapterError::Unsupported {
            operation: "SessionRead",
            store: Self::STORE,
        })
    }
}

impl Loggable for WriteResponse {}
impl Loggable for ChatWriteRequest {}
impl Loggable for ChatReadRequest {}
impl Loggable for UserReadRequest {}
impl Loggable for SessionWriteRequest {}
impl Loggable for SessionReadRequest {}
impl Loggable for SessionReadResponse {}
impl Loggable for TelemetryWriteRequest {}
impl Loggable for TelemetryReadRequest {}

impl Loggable for ChatReadResponse {
    fn log_repr(&self) -> String {
        format!(
            "ChatReadResponse {{ status: {}, description: {:?}, results: {} messages }}",
            self.status,
            self.description,
            self.results.len()
        )
    }
}

impl Loggable for TelemetryReadResponse {
    fn log_repr(&self) -> String {
        format!(
            "TelemetryReadResponse {{ status: {}, description: {:?}, results: {} rows }}",
            self.status,
            self.description,
            self.results.len()
        )
    }
}

// Password hashes never reach the log
impl Loggable for UserWriteRequest {
    fn log_repr(&self) -> String {
        format!(
            "UserWriteRequest {{ login: {:?}, fname: {:?}, lname: {:?}, pass: <redacted>, role: {:?}, last_active: {:?} }}",
            self.login, self.fname, self.lname, self.role, self.last_active
        )
    }
}

fn user_info_repr(info: &UserInfo) -> String {
    format!(
        "UserInfo {{ login: {:?}, role: {:?}, last_active: {:?}, pass: <redacted> }}",
        info.login, info.role, info.last_active
    )
}

impl Loggable for UserReadResponse {
    fn log_repr(&self) -> String {
        let results: Vec<String> = self.results.iter().map(user_info_repr).collect();
        format!(
            "UserReadResponse {{ status: {}, description: {:?}, results: [{}] }}",
            self.status,
            self.description,
            results.join(", ")
        )
    }
}
