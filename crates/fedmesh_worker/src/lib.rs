//! Fedmesh Worker
//!
//! Long-lived federated-training client. The worker asks the discovery
//! service for a combiner assignment, opens an authenticated gRPC channel,
//! and services the tasks that combiner pushes: model updates (local
//! training) and model validation / inference. Compute happens out of
//! process, through entry points declared by a downloaded compute package.
//!
//! Module map, roughly one per subsystem:
//!
//! - [`config`] — immutable worker configuration and identity
//! - [`discovery`] — assignment negotiation with the control plane
//! - [`package`] / [`dispatch`] — compute-package acquisition and the
//!   entry-point dispatcher
//! - [`transport`] — combiner channel, artifact transfer, capability traits
//! - [`subscriber`] / [`queue`] / [`pipeline`] — request streams feeding
//!   the serial task pipeline
//! - [`heartbeat`] / [`state`] / [`worker`] — liveness, shared flags, and
//!   the supervisor loop

pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod heartbeat;
pub mod helper;
pub mod package;
pub mod pipeline;
pub mod queue;
pub mod state;
pub mod status;
pub mod subscriber;
pub mod transport;
pub mod worker;

pub use config::{ClientIdentity, WorkerConfig};
pub use worker::{FatalError, Worker};
