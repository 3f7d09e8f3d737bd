//! MongoDB document store for chat history.
//!
//! A fresh client is opened per call, pinged, used and shut down again.

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};
use tracing::debug;

use super::{bounded, ChatRecord, DocumentStore};
use crate::config::MongoConfig;
use crate::error::{AdapterError, AdapterResult};
use crate::metadata::CollectionRoute;

#[derive(Debug, Clone)]
pub struct MongoDocumentStore {
    url: String,
    connect_timeout: Duration,
    operation_timeout: Duration,
}

impl MongoDocumentStore {
    pub fn new(cfg: &MongoConfig, connect_timeout: Duration, operation_timeout: Duration) -> Self {
        Self {
            url: cfg.url.clone(),
            connect_timeout,
            operation_timeout,
        }
    }

    async fn connect(&self) -> AdapterResult<Client> {
        bounded("mongo connect", self.connect_timeout, async {
            let mut options = ClientOptions::parse(&self.url).await?;
            options.connect_timeout = Some(self.connect_timeout);
            options.server_selection_timeout = Some(self.connect_timeout);
            let client = Client::with_options(options)?;
            client
                .database("admin")
                .run_command(doc! { "ping": 1 })
                .await
                .map_err(|e| AdapterError::BackendUnavailable(format!("mongo ping: {e}")))?;
            Ok::<_, AdapterError>(client)
        })
        .await
    }

    fn collection(client: &Client, route: &CollectionRoute) -> Collection<ChatRecord> {
        client
            .database(&route.db)
            .collection::<ChatRecord>(&route.collection)
    }
}

#[async_trait]
impl DocumentStore for MongoDocumentStore {
    async fn insert(&self, route: &CollectionRoute, record: ChatRecord) -> AdapterResult<()> {
        let client = self.connect().await?;
        let result = bounded("mongo insert", self.operation_timeout, async {
            Self::collection(&client, route).insert_one(record).await?;
            Ok::<_, AdapterError>(())
        })
        .await;
        client.shutdown().await;
        if result.is_ok() {
            debug!(db = %route.db, collection = %route.collection, "chat record inserted");
        }
        result
    }

    async fn find_all(&self, route: &CollectionRoute) -> AdapterResult<Vec<ChatRecord>> {
        let client = self.connect().await?;
        let result = bounded("mongo find", self.operation_timeout, async {
            let cursor = Self::collection(&client, route)
                .find(doc! {})
                .sort(doc! { "_id": 1 })
                .await
                .map_err(|e| AdapterError::BackendRead(format!("mongo: {e}")))?;
            cursor
                .try_collect::<Vec<_>>()
                .await
                .map_err(|e| AdapterError::BackendRead(format!("mongo: {e}")))
        })
        .await;
        client.shutdown().await;
        result
    }
}
