//! Admission tap at the transport boundary.
//!
//! Sees every HTTP/2 request before tonic decodes the message. It only
//! observes: each call is logged and counted, then handed on unchanged.
//! The metric label is drawn from a fixed set so that arbitrary paths sent
//! by a peer cannot grow the series count.

use std::task::{Context, Poll};

use http::Request;
use tracing::debug;

use crate::metrics;

/// Every method path the adapter process can route.
pub const KNOWN_PATHS: &[&str] = &[
    "/chatroom.storage.ChatHistory/Write",
    "/chatroom.storage.ChatHistory/Read",
    "/chatroom.storage.UserStore/Write",
    "/chatroom.storage.UserStore/Read",
    "/chatroom.storage.UserStore/SessionWrite",
    "/chatroom.storage.UserStore/SessionRead",
    "/chatroom.storage.Telemetry/Write",
    "/chatroom.storage.Telemetry/Read",
    "/grpc.reflection.v1.ServerReflection/ServerReflectionInfo",
];

/// Label for a request path; anything outside [`KNOWN_PATHS`] is `unknown`.
pub fn method_label(path: &str) -> &'static str {
    KNOWN_PATHS
        .iter()
        .find(|known| **known == path)
        .copied()
        .unwrap_or("unknown")
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AdmissionLayer;

impl<S> tower::Layer<S> for AdmissionLayer {
    type Service = AdmissionTap<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionTap { inner }
    }
}

#[derive(Debug, Clone)]
pub struct AdmissionTap<S> {
    inner: S,
}

impl<S, B> tower::Service<Request<B>> for AdmissionTap<S>
where
    S: tower::Service<Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        let path = request.uri().path();
        debug!(path, "call admitted");
        metrics::record_admission(method_label(path));
        self.inner.call(request)
    }
}
