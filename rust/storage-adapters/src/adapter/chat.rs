//! Chat history over the document store.

use std::sync::Arc;

use async_trait::async_trait;
use tonic::{Request, Response, Status};

use super::{write_ok, StorageAdapter, OK_DESCRIPTION};
use crate::backend::{ChatRecord, DocumentStore};
use crate::error::AdapterResult;
use crate::metadata::CallContext;
use crate::pipeline::Pipeline;
use crate::proto::chat_history_server::{ChatHistory, ChatHistoryServer};
use crate::proto::{ChatMessage, ChatReadRequest, ChatReadResponse, ChatWriteRequest, WriteResponse};

#[derive(Debug, Clone)]
pub struct ChatAdapter {
    store: Arc<dyn DocumentStore>,
}

impl ChatAdapter {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StorageAdapter for ChatAdapter {
    type WriteRequest = ChatWriteRequest;
    type ReadRequest = ChatReadRequest;
    type ReadResponse = ChatReadResponse;

    const STORE: &'static str = "chat";

    async fn write(&self, ctx: CallContext, req: ChatWriteRequest) -> AdapterResult<WriteResponse> {
        let route = ctx.collection_route()?;
        let record = ChatRecord {
            time: req.time,
            name: req.name,
            message: req.message,
        };
        self.store.insert(&route, record).await?;
        Ok(write_ok())
    }

    /// Returns the whole collection; `number` is only a hint.
    async fn read(&self, ctx: CallContext, _req: ChatReadRequest) -> AdapterResult<ChatReadResponse> {
        let route = ctx.collection_route()?;
        let results = self
            .store
            .find_all(&route)
            .await?
            .into_iter()
            .map(|r| ChatMessage {
                time: r.time,
                name: r.name,
                message: r.message,
            })
            .collect();
        Ok(ChatReadResponse {
            status: 0,
            description: OK_DESCRIPTION.to_string(),
            results,
        })
    }
}

/// gRPC face of [`ChatAdapter`].
#[derive(Debug, Clone)]
pub struct ChatHistoryService {
    adapter: ChatAdapter,
    pipeline: Pipeline,
}

impl ChatHistoryService {
    pub fn new(adapter: ChatAdapter, pipeline: Pipeline) -> Self {
        Self { adapter, pipeline }
    }

    pub fn into_service(self) -> ChatHistoryServer<Self> {
        ChatHistoryServer::new(self)
    }
}

#[tonic::async_trait]
impl ChatHistory for ChatHistoryService {
    async fn write(
        &self,
        request: Request<ChatWriteRequest>,
    ) -> Result<Response<WriteResponse>, Status> {
        self.pipeline
            .unary("ChatHistory/Write", request, |ctx, msg| {
                self.adapter.write(ctx, msg)
            })
            .await
    }

    async fn read(
        &self,
        request: Request<ChatReadRequest>,
    ) -> Result<Response<ChatReadResponse>, Status> {
        self.pipeline
            .unary("ChatHistory/Read", request, |ctx, msg| {
                self.adapter.read(ctx, msg)
            })
            .await
    }
}
