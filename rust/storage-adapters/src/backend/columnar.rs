//! ClickHouse sink for flushed telemetry.

use std::time::Duration;

use async_trait::async_trait;
use clickhouse::{Client, Row};
use serde::Deserialize;
use tracing::{debug, info};

use super::{bounded, read_failure, ColumnarSink, LogRow};
use crate::config::ClickHouseConfig;
use crate::error::{AdapterError, AdapterResult};
use crate::metadata::TableRoute;

/// Single-column answer of `EXISTS TABLE`.
#[derive(Debug, Row, Deserialize)]
struct TableExists {
    result: u8,
}

// Names were validated as identifiers when the route was built
fn create_database_sql(route: &TableRoute) -> String {
    format!("CREATE DATABASE IF NOT EXISTS {}", route.db)
}

fn create_table_sql(route: &TableRoute) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (log String, action_time DateTime) engine=Memory",
        route.qualified()
    )
}

fn exists_sql(route: &TableRoute) -> String {
    format!("EXISTS TABLE {}", route.qualified())
}

fn select_sql(route: &TableRoute) -> String {
    format!("SELECT ?fields FROM {} ORDER BY action_time", route.qualified())
}

#[derive(Debug, Clone)]
pub struct ClickHouseSink {
    cfg: ClickHouseConfig,
    connect_timeout: Duration,
    operation_timeout: Duration,
}

impl ClickHouseSink {
    pub fn new(cfg: &ClickHouseConfig, connect_timeout: Duration, operation_timeout: Duration) -> Self {
        Self {
            cfg: cfg.clone(),
            connect_timeout,
            operation_timeout,
        }
    }

    /// The HTTP client is cheap to build, so every flush starts from a new one.
    async fn connect(&self) -> AdapterResult<Client> {
        let mut client = Client::default().with_url(&self.cfg.url);
        if let Some(user) = &self.cfg.user {
            client = client.with_user(user);
        }
        if let Some(password) = &self.cfg.password {
            client = client.with_password(password);
        }
        bounded("clickhouse ping", self.connect_timeout, async {
            client
                .query("SELECT 1")
                .execute()
                .await
                .map_err(|e| AdapterError::BackendUnavailable(format!("clickhouse ping: {e}")))
        })
        .await?;
        Ok(client)
    }

    async fn ensure_table(&self, client: &Client, route: &TableRoute) -> AdapterResult<()> {
        let create_db = create_database_sql(route);
        let create_table = create_table_sql(route);
        bounded("clickhouse ddl", self.operation_timeout, async {
            client.query(&create_db).execute().await?;
            client.query(&create_table).execute().await?;
            Ok::<_, AdapterError>(())
        })
        .await
    }

    /// Checks without creating anything; reads never run DDL.
    async fn table_exists(&self, client: &Client, route: &TableRoute) -> AdapterResult<bool> {
        let sql = exists_sql(route);
        let answer = bounded("clickhouse exists", self.operation_timeout, async {
            client
                .query(&sql)
                .fetch_one::<TableExists>()
                .await
                .map_err(AdapterError::from)
        })
        .await
        .map_err(read_failure)?;
        Ok(answer.result != 0)
    }
}

#[async_trait]
impl ColumnarSink for ClickHouseSink {
    async fn insert_batch(&self, route: &TableRoute, rows: &[LogRow]) -> AdapterResult<()> {
        let client = self.connect().await?;
        self.ensure_table(&client, route).await?;

        bounded("clickhouse insert", self.operation_timeout, async {
            let mut insert = client.insert::<LogRow>(&route.qualified())?;
            for row in rows {
                insert.write(row).await?;
            }
            insert.end().await?;
            Ok::<_, AdapterError>(())
        })
        .await?;

        info!(table = %route.qualified(), rows = rows.len(), "telemetry batch committed");
        Ok(())
    }

    async fn read_rows(&self, route: &TableRoute) -> AdapterResult<Vec<LogRow>> {
        let client = self.connect().await?;
        if !self.table_exists(&client, route).await? {
            debug!(table = %route.qualified(), "telemetry table absent, nothing to read");
            return Ok(Vec::new());
        }

        let sql = select_sql(route);
        let rows = bounded("clickhouse select", self.operation_timeout, async {
            client
                .query(&sql)
                .fetch_all::<LogRow>()
                .await
                .map_err(AdapterError::from)
        })
        .await
        .map_err(read_failure)?;
        debug!(table = %route.qualified(), rows = rows.len(), "telemetry rows read");
        Ok(rows)
    }
}
