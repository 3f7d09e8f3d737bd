//! Shared-secret bearer token: attached by clients on every call, checked by servers.

use tonic::metadata::{Ascii, MetadataKey, MetadataMap, MetadataValue};
use tonic::service::Interceptor;
use tonic::{Request, Status};

use crate::error::{AdapterError, AdapterResult};
use crate::metadata::AUTHORIZATION;

/// Client-side per-call credential.
///
/// Installed with `*Client::with_interceptor`, it stamps the bearer token and
/// the fixed routing parameters onto every outgoing request.
#[derive(Debug, Clone)]
pub struct BearerCredential {
    token: MetadataValue<Ascii>,
    routing: Vec<(MetadataKey<Ascii>, MetadataValue<Ascii>)>,
}

impl BearerCredential {
    pub fn new(token: &str) -> AdapterResult<Self> {
        Ok(Self {
            token: ascii_value(AUTHORIZATION, token)?,
            routing: Vec::new(),
        })
    }

    /// Attach a routing parameter (`dbname`, `tablename`, ...) to every call.
    ///
    /// Keys are normalized to lower case; binary (`-bin`) keys are refused.
    pub fn with_routing(mut self, key: &str, value: &str) -> AdapterResult<Self> {
        let name = MetadataKey::<Ascii>::from_bytes(key.as_bytes()).map_err(|e| {
            AdapterError::ConfigurationError(format!("invalid metadata key '{key}': {e}"))
        })?;
        self.routing.push((name, ascii_value(key, value)?));
        Ok(self)
    }
}

impl Interceptor for BearerCredential {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let metadata = request.metadata_mut();
        metadata.insert(AUTHORIZATION, self.token.clone());
        for (key, value) in &self.routing {
            metadata.insert(key.clone(), value.clone());
        }
        Ok(request)
    }
}

fn ascii_value(key: &str, value: &str) -> AdapterResult<MetadataValue<Ascii>> {
    value
        .parse()
        .map_err(|e| AdapterError::ConfigurationError(format!("invalid {key} value: {e}")))
}

/// Server-side token check.
#[derive(Clone)]
pub struct TokenAuthorizer {
    secret: String,
}

impl std::fmt::Debug for TokenAuthorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthorizer")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl TokenAuthorizer {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Passes only when exactly one `authorization` value equals the secret.
    pub fn authorize(&self, metadata: &MetadataMap) -> AdapterResult<()> {
        let mut tokens = metadata.get_all(AUTHORIZATION).iter();
        let (Some(token), None) = (tokens.next(), tokens.next()) else {
            return Err(AdapterError::Unauthenticated(
                "Authorization token is not supplied".to_string(),
            ));
        };
        match token.to_str() {
            Ok(token) if token == self.secret => Ok(()),
            _ => Err(AdapterError::Unauthenticated("Wrong token".to_string())),
        }
    }
}
