//! Telemetry batching through the service, as callers see it.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use chatroom_adapters::adapter::TelemetryService;
use chatroom_adapters::proto::telemetry_server::Telemetry;
use chatroom_adapters::proto::{TelemetryReadRequest, TelemetryWriteRequest};
use common::*;
use tonic::{Code, Status};

async fn write(service: &TelemetryService, log: &str) -> Result<(), Status> {
    service
        .write(authed(TelemetryWriteRequest { log: log.into() }, LOGS_ROUTE))
        .await
        .map(|_| ())
}

async fn read_logs(service: &TelemetryService) -> Vec<String> {
    service
        .read(authed(TelemetryReadRequest { number: 0 }, LOGS_ROUTE))
        .await
        .unwrap()
        .into_inner()
        .results
        .into_iter()
        .map(|r| r.log)
        .collect()
}

#[tokio::test]
async fn test_capacity_writes_stay_buffered() {
    let (sink, cache, service) = telemetry_service(20);
    for n in 0..20 {
        write(&service, &format!("line {n}")).await.unwrap();
    }
    assert_eq!(sink.batches(), 0);
    assert_eq!(cache.len().await, 20);
    // Nothing is readable before the flush
    assert!(read_logs(&service).await.is_empty());
}

#[tokio::test]
async fn test_write_past_capacity_flushes_once_and_keeps_new_item() {
    let (sink, cache, service) = telemetry_service(20);
    for n in 0..21 {
        write(&service, &format!("line {n}")).await.unwrap();
    }
    assert_eq!(sink.batches(), 1);
    assert_eq!(sink.rows(), 20);

    let buffered = cache.snapshot().await;
    assert_eq!(buffered.len(), 1);
    assert_eq!(buffered[0].row.log, "line 20");

    let flushed = read_logs(&service).await;
    assert_eq!(flushed.len(), 20);
    assert!(flushed.contains(&"line 0".to_string()));
}

#[tokio::test]
async fn test_failed_flush_is_internal_and_loses_nothing_buffered() {
    let (sink, cache, service) = telemetry_service(3);
    for n in 0..3 {
        write(&service, &format!("line {n}")).await.unwrap();
    }

    sink.set_failing(true);
    let status = write(&service, "line 3").await.unwrap_err();
    assert_eq!(status.code(), Code::Internal);
    assert_eq!(app_status(&status).as_deref(), Some("500"));
    assert_eq!(cache.len().await, 3);

    // The caller resubmits once the store is back
    sink.set_failing(false);
    write(&service, "line 3").await.unwrap();
    assert_eq!(sink.rows(), 3);
    let buffered = cache.snapshot().await;
    assert_eq!(buffered.len(), 1);
    assert_eq!(buffered[0].row.log, "line 3");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writes_flush_exactly_once() {
    let (sink, cache, service) = telemetry_service(20);
    let service = Arc::new(service);

    let handles: Vec<_> = (0..25)
        .map(|n| {
            let service = Arc::clone(&service);
            tokio::spawn(async move { write(&service, &format!("line {n}")).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(sink.batches(), 1);
    assert_eq!(cache.len().await, 5);

    let flushed: HashSet<String> = read_logs(&service).await.into_iter().collect();
    let buffered: HashSet<String> = cache
        .snapshot()
        .await
        .into_iter()
        .map(|item| item.row.log)
        .collect();
    assert_eq!(flushed.len(), 20);
    assert!(flushed.is_disjoint(&buffered));
    assert_eq!(flushed.len() + buffered.len(), 25);
}

#[tokio::test]
async fn test_shutdown_flushes_remainder() {
    let (sink, cache, service) = telemetry_service(20);
    for n in 0..7 {
        write(&service, &format!("line {n}")).await.unwrap();
    }
    cache.shutdown().await.unwrap();
    assert_eq!(sink.batches(), 1);
    assert_eq!(read_logs(&service).await.len(), 7);

    // A second shutdown finds nothing to flush and is still fine
    cache.shutdown().await.unwrap();
    assert_eq!(sink.batches(), 1);
}
