//! Stream Subscribers
//!
//! Two long-lived server-streaming subscriptions drain combiner-pushed
//! requests into the task queue: model-update requests (when the worker is
//! a trainer) and model-validation requests (when it is a validator).
//! Transport errors back off for a fixed delay and resubscribe; a cleared
//! `attached` flag ends the subscriber at its next loop head.

use crate::config::ClientIdentity;
use crate::queue::{TaskEnvelope, TaskSender};
use crate::state::WorkerFlags;
use crate::status::{request_summary, StatusReporter};
use crate::transport::CombinerChannel;
use fedmesh_proto::{LogLevel, Role, StatusType, TaskRequest};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Backoff after a failed or closed subscription stream.
pub const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

/// How often a blocked stream read rechecks the attached flag.
const STREAM_POLL_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Copy)]
enum StreamKind {
    Update,
    Validation,
}

pub async fn run_update_subscriber(
    transport: CombinerChannel,
    identity: ClientIdentity,
    flags: Arc<WorkerFlags>,
    queue: TaskSender,
    status: StatusReporter,
) {
    run_subscriber(StreamKind::Update, transport, identity, flags, queue, status).await
}

pub async fn run_validation_subscriber(
    transport: CombinerChannel,
    identity: ClientIdentity,
    flags: Arc<WorkerFlags>,
    queue: TaskSender,
    status: StatusReporter,
) {
    run_subscriber(
        StreamKind::Validation,
        transport,
        identity,
        flags,
        queue,
        status,
    )
    .await
}

async fn run_subscriber(
    kind: StreamKind,
    transport: CombinerChannel,
    identity: ClientIdentity,
    flags: Arc<WorkerFlags>,
    queue: TaskSender,
    status: StatusReporter,
) {
    let label = match kind {
        StreamKind::Update => "model update",
        StreamKind::Validation => "model validation",
    };

    loop {
        if !flags.attached() {
            return;
        }

        let subscription = match kind {
            StreamKind::Update => transport.update_request_stream(&identity).await,
            StreamKind::Validation => transport.validation_request_stream(&identity).await,
        };

        match subscription {
            Ok(mut stream) => {
                info!("subscribed to {label} requests");
                loop {
                    if !flags.attached() {
                        return;
                    }
                    match tokio::time::timeout(STREAM_POLL_TIMEOUT, stream.message()).await {
                        Err(_) => continue,
                        Ok(Ok(Some(request))) => {
                            if !enqueue(kind, request, &queue, &status).await {
                                return;
                            }
                        }
                        Ok(Ok(None)) => {
                            warn!("{label} request stream closed by combiner");
                            break;
                        }
                        Ok(Err(err)) => {
                            warn!("{label} request stream failed: {err}");
                            break;
                        }
                    }
                }
            }
            Err(err) => {
                warn!("could not subscribe to {label} requests: {err}");
            }
        }

        if !flags.attached() {
            return;
        }
        tokio::time::sleep(RESUBSCRIBE_DELAY).await;
    }
}

/// Returns false when the pipeline side of the queue is gone.
async fn enqueue(
    kind: StreamKind,
    request: TaskRequest,
    queue: &TaskSender,
    status: &StatusReporter,
) -> bool {
    let envelope = match kind {
        StreamKind::Update => {
            // only the combiner itself may request training
            if request.sender.as_ref().map(|peer| peer.role()) != Some(Role::Combiner) {
                return true;
            }
            status
                .report(
                    "Received model update request.",
                    LogLevel::Audit,
                    Some(StatusType::ModelUpdateRequest),
                    Some(request_summary(&request)),
                )
                .await;
            TaskEnvelope::Train(request)
        }
        StreamKind::Validation => {
            status
                .report(
                    "Received model validation request.",
                    LogLevel::Audit,
                    Some(StatusType::ModelValidationRequest),
                    Some(request_summary(&request)),
                )
                .await;
            TaskEnvelope::Validate(request)
        }
    };

    if queue.send(envelope).is_err() {
        warn!("task queue is closed, stopping subscriber");
        return false;
    }
    true
}
