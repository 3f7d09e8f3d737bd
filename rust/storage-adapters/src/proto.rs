//! Generated gRPC types for the storage adapters.

#![allow(clippy::pedantic, reason = "generated code")]

tonic::include_proto!("chatroom.storage");

/// Encoded descriptors served through reflection.
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("storage_descriptor");
