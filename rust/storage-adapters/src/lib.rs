//! Storage adapters for the chat room: chat history on MongoDB, users and
//! sessions on Redis, telemetry on ClickHouse, each served over mutual-TLS gRPC.

pub mod adapter;
pub mod admission;
pub mod backend;
pub mod cache;
pub mod client;
pub mod config;
pub mod credential;
pub mod error;
pub mod metadata;
pub mod metrics;
pub mod pipeline;
pub mod proto;
pub mod server;
pub mod shipping;
pub mod tls;
pub mod tracing;
