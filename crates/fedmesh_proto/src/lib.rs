//! Wire contract for the fedmesh network.
//!
//! Combiner <-> Worker traffic runs over gRPC. The message structs here are
//! hand-maintained prost derives and the client stubs are written against
//! `tonic::client::Grpc` directly, so the crate builds without a protoc
//! toolchain. Service paths live in [`client`].
//!
//! Model artifacts move as chunked, status-terminated streams:
//!
//! - Upload: `IN_PROGRESS` frames of at most [`CHUNK_SIZE`] bytes, closed by
//!   a single `OK` frame with empty data.
//! - Download: `IN_PROGRESS` frames are concatenated until the first
//!   terminal frame (`OK` completes, `FAILED` aborts).
//!
//! The discovery control plane speaks JSON over HTTP; its body types are in
//! [`discovery`].

pub mod chunk;
pub mod client;
pub mod discovery;
pub mod error;
pub mod messages;

pub use chunk::{upload_frames, ChunkAssembler, ChunkProgress, CHUNK_SIZE};
pub use client::{CombinerClient, ConnectorClient, ModelServiceClient};
pub use discovery::{AssignRequest, Assignment, ChecksumResponse};
pub use error::ProtocolError;
pub use messages::{
    Ack, ClientAvailableMessage, Heartbeat, LogLevel, ModelRequest, ModelResponse, ModelStatus,
    ModelUpdate, ModelValidation, Peer, Role, StatusMessage, StatusType, TaskRequest,
};
