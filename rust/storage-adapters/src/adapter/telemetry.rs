//! Telemetry over the columnar sink, batched through the write-cache.

use std::sync::Arc;

use async_trait::async_trait;
use tonic::{Request, Response, Status};

use super::{write_ok, StorageAdapter, OK_DESCRIPTION};
use crate::backend::{ColumnarSink, LogRow, TelemetryItem};
use crate::cache::WriteCache;
use crate::error::AdapterResult;
use crate::metadata::CallContext;
use crate::pipeline::Pipeline;
use crate::proto::telemetry_server::{Telemetry, TelemetryServer};
use crate::proto::{
    LogRecord, TelemetryReadRequest, TelemetryReadResponse, TelemetryWriteRequest, WriteResponse,
};

#[derive(Debug, Clone)]
pub struct TelemetryAdapter {
    cache: Arc<WriteCache>,
    sink: Arc<dyn ColumnarSink>,
}

impl TelemetryAdapter {
    pub fn new(cache: Arc<WriteCache>, sink: Arc<dyn ColumnarSink>) -> Self {
        Self { cache, sink }
    }

    pub fn cache(&self) -> &Arc<WriteCache> {
        &self.cache
    }
}

#[async_trait]
impl StorageAdapter for TelemetryAdapter {
    type WriteRequest = TelemetryWriteRequest;
    type ReadRequest = TelemetryReadRequest;
    type ReadResponse = TelemetryReadResponse;

    const STORE: &'static str = "telemetry";

    async fn write(
        &self,
        ctx: CallContext,
        req: TelemetryWriteRequest,
    ) -> AdapterResult<WriteResponse> {
        let route = ctx.table_route()?;
        let item = TelemetryItem {
            route,
            row: LogRow::now(req.log),
        };
        self.cache.write(item).await?;
        Ok(write_ok())
    }

    /// Only flushed rows are visible; buffered ones appear after the next flush.
    async fn read(
        &self,
        ctx: CallContext,
        _req: TelemetryReadRequest,
    ) -> AdapterResult<TelemetryReadResponse> {
        let route = ctx.table_route()?;
        let results = self
            .sink
            .read_rows(&route)
            .await?
            .into_iter()
            .map(|row| LogRecord {
                log: row.log,
                action_time: i64::from(row.action_time),
            })
            .collect();
        Ok(TelemetryReadResponse {
            status: 0,
            description: OK_DESCRIPTION.to_string(),
            results,
        })
    }
}

/// gRPC face of [`TelemetryAdapter`].
#[derive(Debug, Clone)]
pub struct TelemetryService {
    adapter: TelemetryAdapter,
    pipeline: Pipeline,
}

impl TelemetryService {
    pub fn new(adapter: TelemetryAdapter, pipeline: Pipeline) -> Self {
        Self { adapter, pipeline }
    }

    pub fn into_service(self) -> TelemetryServer<Self> {
        TelemetryServer::new(self)
    }
}

#[tonic::async_trait]
impl Telemetry for TelemetryService {
    async fn write(
        &self,
        request: Request<TelemetryWriteRequest>,
    ) -> Result<Response<WriteResponse>, Status> {
        self.pipeline
            .unary("Telemetry/Write", request, |ctx, msg| {
                self.adapter.write(ctx, msg)
            })
            .await
    }

    async fn read(
        &self,
        request: Request<TelemetryReadRequest>,
    ) -> Result<Response<TelemetryReadResponse>, Status> {
        self.pipeline
            .unary("Telemetry/Read", request, |ctx, msg| {
                self.adapter.read(ctx, msg)
            })
            .await
    }
}
