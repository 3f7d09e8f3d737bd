use thiserror::Error;
use tonic::{Code, Status};

/// Metadata key carrying the application status code on failed calls.
pub const APP_STATUS_KEY: &str = "app-status";

/// Core error type for the storage adapters
#[derive(Error, Debug)]
pub enum AdapterError {
    /// Client input errors (missing, duplicated or malformed routing metadata)
    #[error("{key} is not supplied")]
    MissingMetadata { key: String },

    #[error("{key} is invalid: {reason}")]
    InvalidMetadata { key: String, reason: String },

    /// A request message field failed validation
    #[error("request field {field} {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// Authorization errors
    #[error("{0}")]
    Unauthenticated(String),

    /// Backend connect/ping failures and timeouts
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Backend insert/commit failures
    #[error("Backend write failed: {0}")]
    BackendWrite(String),

    /// Backend read failures
    #[error("Backend read failed: {0}")]
    BackendRead(String),

    /// Write-cache invariants
    #[error("Cache overflowed: {len} items buffered, capacity {capacity}")]
    CacheOverflow { len: usize, capacity: usize },

    #[error("Cache error: nothing to flush")]
    EmptyFlush,

    /// Operation not offered by this store
    #[error("{operation} is not supported by the {store} adapter")]
    Unsupported {
        operation: &'static str,
        store: &'static str,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Recovered handler panics and other faults
    #[error("Internal error: {0}")]
    InternalError(String),

    /// Failure reported by a remote adapter, seen from the client side
    #[error("Adapter call failed: {}", .0.message())]
    Rpc(#[from] Status),
}

/// Result type alias for adapter operations
pub type AdapterResult<T> = Result<T, AdapterError>;

impl AdapterError {
    pub fn missing(key: impl Into<String>) -> Self {
        AdapterError::MissingMetadata { key: key.into() }
    }

    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        AdapterError::InvalidMetadata {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        AdapterError::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    /// Transport-level code surfaced to the caller.
    pub fn code(&self) -> Code {
        match self {
            AdapterError::MissingMetadata { .. }
            | AdapterError::InvalidMetadata { .. }
            | AdapterError::InvalidField { .. } => Code::NotFound,
            AdapterError::Unauthenticated(_) => Code::Unauthenticated,
            AdapterError::Unsupported { .. } => Code::Unimplemented,
            AdapterError::Rpc(status) => status.code(),
            AdapterError::BackendUnavailable(_)
            | AdapterError::BackendWrite(_)
            | AdapterError::BackendRead(_)
            | AdapterError::CacheOverflow { .. }
            | AdapterError::EmptyFlush
            | AdapterError::ConfigurationError(_)
            | AdapterError::InternalError(_) => Code::Internal,
        }
    }

    /// Application status code carried next to the transport code.
    pub fn app_status(&self) -> i32 {
        match self.code() {
            Code::NotFound => 404,
            Code::Unauthenticated => 401,
            Code::Unimplemented => 501,
            _ => 500,
        }
    }

    /// True for errors caused by the caller rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AdapterError::MissingMetadata { .. }
                | AdapterError::InvalidMetadata { .. }
                | AdapterError::InvalidField { .. }
                | AdapterError::Unauthenticated(_)
        )
    }
}

impl From<AdapterError> for Status {
    fn from(err: AdapterError) -> Self {
        if let AdapterError::Rpc(status) = err {
            return status;
        }
        let mut status = Status::new(err.code(), err.to_string());
        status
            .metadata_mut()
            .insert(APP_STATUS_KEY, err.app_status().into());
        status
    }
}

// Conversion implementations for backend driver errors
impl From<redis::RedisError> for AdapterError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_timeout() || err.is_connection_dropped() {
            AdapterError::BackendUnavailable(format!("redis: {err}"))
        } else {
            AdapterError::BackendWrite(format!("redis: {err}"))
        }
    }
}

impl From<mongodb::error::Error> for AdapterError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind;
        match *err.kind {
            ErrorKind::ServerSelection { .. } | ErrorKind::Io(_) | ErrorKind::DnsResolve { .. } => {
                AdapterError::BackendUnavailable(format!("mongo: {err}"))
            }
            _ => AdapterError::BackendWrite(format!("mongo: {err}")),
        }
    }
}

impl From<clickhouse::error::Error> for AdapterError {
    fn from(err: clickhouse::error::Error) -> Self {
        match err {
            clickhouse::error::Error::Network(_) | clickhouse::error::Error::TimedOut => {
                AdapterError::BackendUnavailable(format!("clickhouse: {err}"))
            }
            other => AdapterError::BackendWrite(format!("clickhouse: {other}")),
        }
    }
}

impl From<tonic::transport::Error> for AdapterError {
    fn from(err: tonic::transport::Error) -> Self {
        AdapterError::BackendUnavailable(format!("transport: {err}"))
    }
}

impl From<std::io::Error> for AdapterError {
    fn from(err: std::io::Error) -> Self {
        AdapterError::InternalError(err.to_string())
    }
}
