//! Per-call pipeline shared by every adapter method.
//!
//! The logger is outermost: it times the call and records the request and the
//! reply or error whatever happened inside. Within it the token authorizer
//! runs, and only then the handler, guarded against panics.

use std::any::Any;
use std::fmt::Debug;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures::FutureExt;
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status};
use tracing::{error, info, info_span, warn, Instrument};

use crate::credential::TokenAuthorizer;
use crate::error::{AdapterError, AdapterResult};
use crate::metadata::CallContext;
use crate::metrics::{self, RequestTimer};

/// How a message is rendered into the call log.
///
/// The default is the `Debug` form; messages carrying secrets override it.
pub trait Loggable: Debug {
    fn log_repr(&self) -> String {
        format!("{self:?}")
    }
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    authorizer: TokenAuthorizer,
}

impl Pipeline {
    pub fn new(authorizer: TokenAuthorizer) -> Self {
        Self { authorizer }
    }

    /// Run one unary call through logging, authorization and the panic guard.
    pub async fn unary<Req, Resp, F, Fut>(
        &self,
        method: &'static str,
        request: Request<Req>,
        handler: F,
    ) -> Result<Response<Resp>, Status>
    where
        Req: Loggable,
        Resp: Loggable,
        F: FnOnce(CallContext, Req) -> Fut,
        Fut: Future<Output = AdapterResult<Resp>>,
    {
        let timer = RequestTimer::new(method);
        let start = Instant::now();
        let (metadata, _extensions, message) = request.into_parts();
        let rendered = message.log_repr();

        let outcome = self
            .authorized(method, &metadata, message, handler)
            .instrument(info_span!("rpc", method))
            .await;

        #[allow(clippy::cast_possible_truncation, reason = "call latency fits in u64 millis")]
        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &outcome {
            Ok(reply) => info!(
                method,
                request = %rendered,
                reply = %reply.log_repr(),
                elapsed_ms,
                "call handled"
            ),
            Err(e) if e.is_client_error() => warn!(
                method,
                request = %rendered,
                code = ?e.code(),
                elapsed_ms,
                "call rejected: {}", e
            ),
            Err(e) => error!(
                method,
                request = %rendered,
                code = ?e.code(),
                elapsed_ms,
                "call failed: {}", e
            ),
        }

        match outcome {
            Ok(reply) => {
                timer.complete(tonic::Code::Ok);
                Ok(Response::new(reply))
            }
            Err(e) => {
                timer.complete(e.code());
                Err(e.into())
            }
        }
    }

    async fn authorized<Req, Resp, F, Fut>(
        &self,
        method: &'static str,
        metadata: &MetadataMap,
        message: Req,
        handler: F,
    ) -> AdapterResult<Resp>
    where
        F: FnOnce(CallContext, Req) -> Fut,
        Fut: Future<Output = AdapterResult<Resp>>,
    {
        if let Err(e) = self.authorizer.authorize(metadata) {
            metrics::record_auth_rejection();
            return Err(e);
        }

        let ctx = CallContext::from_metadata(metadata);
        let guarded = AssertUnwindSafe(async move { handler(ctx, message).await }).catch_unwind();
        match guarded.await {
            Ok(result) => result,
            Err(panic) => {
                let reason = panic_reason(panic.as_ref());
                error!(method, "handler panicked: {}", reason);
                Err(AdapterError::InternalError(format!("{method} panicked: {reason}")))
            }
        }
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{AUTHORIZATION, DB_NAME};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tonic::Code;

    #[derive(Debug)]
    struct Ping(&'static str);
    impl Loggable for Ping {}

    fn pipeline() -> Pipeline {
        Pipeline::new(TokenAuthorizer::new("sometoken"))
    }

    fn request(token: Option<&str>) -> Request<Ping> {
        let mut req = Request::new(Ping("hello"));
        if let Some(token) = token {
            req.metadata_mut()
                .insert(AUTHORIZATION, token.parse().unwrap());
        }
        req.metadata_mut().insert(DB_NAME, "test".parse().unwrap());
        req
    }

    #[tokio::test]
    async fn test_authorized_call_reaches_handler_with_context() {
        let reply = pipeline()
            .unary("Test/Ping", request(Some("sometoken")), |ctx, msg| async move {
                assert_eq!(ctx.single(DB_NAME).unwrap(), "test");
                Ok::<_, AdapterError>(msg)
            })
            .await
            .unwrap();
        assert_eq!(reply.into_inner().0, "hello");
    }

    #[tokio::test]
    async fn test_rejected_call_never_runs_handler() {
        let calls = AtomicUsize::new(0);
        for token in [None, Some("wrong")] {
            let status = pipeline()
                .unary("Test/Ping", request(token), |_, msg| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move { Ok::<_, AdapterError>(msg) }
                })
                .await
                .unwrap_err();
            assert_eq!(status.code(), Code::Unauthenticated);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panicking_handler_becomes_internal() {
        let status = pipeline()
            .unary("Test/Ping", request(Some("sometoken")), |_, _msg| async move {
                if true {
                    panic!("boom");
                }
                Ok::<_, AdapterError>(Ping("unreachable"))
            })
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Internal);
        assert!(status.message().contains("boom"));
    }

    #[tokio::test]
    async fn test_handler_errors_keep_their_code() {
        let status = pipeline()
            .unary("Test/Ping", request(Some("sometoken")), |_, _msg| async move {
                Err::<Ping, _>(AdapterError::missing("tablename"))
            })
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(status.message(), "tablename is not supplied");
    }
}
