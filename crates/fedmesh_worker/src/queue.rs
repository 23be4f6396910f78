//! Task Queue
//!
//! Multi-producer, single-consumer FIFO between the stream subscribers and
//! the task pipeline. The pipeline polls with a short timeout so it can
//! observe detach between tasks.

use fedmesh_proto::TaskRequest;
use std::time::Duration;
use tokio::sync::mpsc;

/// Pipeline poll timeout on an empty queue.
pub const QUEUE_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// One unit of work received from the combiner.
#[derive(Debug, Clone)]
pub enum TaskEnvelope {
    Train(TaskRequest),
    Validate(TaskRequest),
}

impl TaskEnvelope {
    pub fn request(&self) -> &TaskRequest {
        match self {
            TaskEnvelope::Train(request) | TaskEnvelope::Validate(request) => request,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TaskEnvelope::Train(_) => "train",
            TaskEnvelope::Validate(request) if request.is_inference => "infer",
            TaskEnvelope::Validate(_) => "validate",
        }
    }
}

pub type TaskSender = mpsc::UnboundedSender<TaskEnvelope>;
pub type TaskReceiver = mpsc::UnboundedReceiver<TaskEnvelope>;

pub fn task_queue() -> (TaskSender, TaskReceiver) {
    mpsc::unbounded_channel()
}
