//! gRPC transport for tstorage.
//!
//! Implements the `TStorage` service defined in proto/tstorage.proto:
//! - SayHello: liveness check
//! - InsertRow: unary insert
//! - InsertRows: client-streaming insert
//! - Select: server-streaming range query

pub mod proto {
    //! Generated protobuf types and service traits.
    tonic::include_proto!("tstorage.v1");
}

pub mod convert;
pub mod server;
pub mod service;
pub mod storage_backend;

pub use server::{GrpcServer, GrpcServerError};
pub use service::TStorageService;
pub use storage_backend::{EngineBackend, StorageBackend};
