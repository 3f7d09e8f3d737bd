//! Bounded batching write-cache in front of the columnar sink.
//!
//! Appends and flushes take the exclusive side of the lock, so at most one
//! flush is ever in flight and no append can interleave with it. A write that
//! finds the buffer full flushes first and then appends its own item.

use std::cmp::Ordering;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::backend::{ColumnarSink, LogRow, TelemetryItem};
use crate::error::{AdapterError, AdapterResult};
use crate::metadata::TableRoute;
use crate::metrics;

pub struct WriteCache {
    buffer: RwLock<Vec<TelemetryItem>>,
    capacity: usize,
    sink: Arc<dyn ColumnarSink>,
}

impl std::fmt::Debug for WriteCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteCache")
            .field("capacity", &self.capacity)
            .field("sink", &self.sink)
            .finish_non_exhaustive()
    }
}

impl WriteCache {
    pub fn new(capacity: usize, sink: Arc<dyn ColumnarSink>) -> Self {
        Self {
            buffer: RwLock::new(Vec::with_capacity(capacity)),
            capacity,
            sink,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn len(&self) -> usize {
        self.buffer.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.buffer.read().await.is_empty()
    }

    /// Copy of the buffered items, oldest first.
    pub async fn snapshot(&self) -> Vec<TelemetryItem> {
        self.buffer.read().await.clone()
    }

    /// Buffer one item, flushing first when the buffer is full.
    ///
    /// If that flush fails the buffer keeps its contents and `item` is not
    /// stored; the caller has to submit it again.
    pub async fn write(&self, item: TelemetryItem) -> AdapterResult<()> {
        let mut buffer = self.buffer.write().await;
        match buffer.len().cmp(&self.capacity) {
            Ordering::Less => {}
            Ordering::Equal => {
                self.flush_locked(&mut buffer).await?;
            }
            Ordering::Greater => {
                error!(
                    len = buffer.len(),
                    capacity = self.capacity,
                    "write-cache holds more items than its capacity"
                );
                return Err(AdapterError::CacheOverflow {
                    len: buffer.len(),
                    capacity: self.capacity,
                });
            }
        }
        buffer.push(item);
        metrics::set_cache_depth(buffer.len());
        Ok(())
    }

    /// Flush everything buffered; returns the number of rows committed.
    pub async fn flush(&self) -> AdapterResult<usize> {
        let mut buffer = self.buffer.write().await;
        self.flush_locked(&mut buffer).await
    }

    /// Final flush on shutdown. An empty buffer is logged, not reported.
    pub async fn shutdown(&self) -> AdapterResult<()> {
        match self.flush().await {
            Ok(rows) => {
                info!(rows, "write-cache flushed on shutdown");
                Ok(())
            }
            Err(AdapterError::EmptyFlush) => {
                warn!("write-cache empty on shutdown, nothing flushed");
                Ok(())
            }
            Err(e) => {
                error!("write-cache shutdown flush failed: {}", e);
                Err(e)
            }
        }
    }

    async fn flush_locked(&self, buffer: &mut Vec<TelemetryItem>) -> AdapterResult<usize> {
        if buffer.is_empty() {
            return Err(AdapterError::EmptyFlush);
        }

        let mut committed = 0;
        let mut done: Vec<TableRoute> = Vec::new();
        for (route, rows) in group_by_route(buffer) {
            if let Err(e) = self.sink.insert_batch(&route, &rows).await {
                // Destinations already committed leave the buffer so a retry cannot duplicate them
                buffer.retain(|item| !done.contains(&item.route));
                metrics::record_flush("failure");
                metrics::set_cache_depth(buffer.len());
                error!(table = %route.qualified(), "write-cache flush failed: {}", e);
                return Err(e);
            }
            committed += rows.len();
            done.push(route);
        }

        buffer.clear();
        metrics::record_flush("success");
        metrics::set_cache_depth(0);
        info!(rows = committed, "write-cache flushed");
        Ok(committed)
    }
}

/// Rows grouped by destination, destinations in order of first arrival.
fn group_by_route(items: &[TelemetryItem]) -> Vec<(TableRoute, Vec<LogRow>)> {
    let mut groups: Vec<(TableRoute, Vec<LogRow>)> = Vec::new();
    for item in items {
        match groups.iter_mut().find(|(route, _)| *route == item.route) {
            Some((_, rows)) => rows.push(item.row.clone()),
            None => groups.push((item.route.clone(), vec![item.row.clone()])),
        }
    }
    groups
}
