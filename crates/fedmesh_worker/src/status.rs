//! Status reporting towards the combiner.
//!
//! Every report is appended to the bounded in-memory status log and then
//! forwarded via `SendStatus`. Delivery failures are logged and dropped;
//! status traffic must never take a task down.

use crate::config::ClientIdentity;
use crate::transport::CombinerApi;
use chrono::Utc;
use fedmesh_logging::StatusLog;
use fedmesh_proto::{LogLevel, StatusMessage, StatusType, TaskRequest};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct StatusReporter {
    api: Arc<dyn CombinerApi>,
    identity: ClientIdentity,
    log: StatusLog,
}

impl StatusReporter {
    pub fn new(api: Arc<dyn CombinerApi>, identity: ClientIdentity, log: StatusLog) -> Self {
        Self { api, identity, log }
    }

    pub async fn report(
        &self,
        message: &str,
        log_level: LogLevel,
        status_type: Option<StatusType>,
        data: Option<String>,
    ) {
        let timestamp = Utc::now().to_rfc3339();
        self.log.push(format!(
            "{timestamp} {} LOG LEVEL {log_level:?} MESSAGE {message}",
            self.identity.name
        ));

        let status = StatusMessage {
            sender: Some(self.identity.as_peer()),
            timestamp,
            log_level: log_level as i32,
            status: message.to_string(),
            status_type: status_type.unwrap_or(StatusType::Log) as i32,
            data: data.unwrap_or_default(),
        };

        if let Err(err) = self.api.send_status(status).await {
            debug!("status delivery failed: {err}");
        }
    }
}

/// Compact JSON summary of a task request, carried in the status `data`
/// field.
pub fn request_summary(request: &TaskRequest) -> String {
    serde_json::json!({
        "model_id": request.model_id,
        "correlation_id": request.correlation_id,
        "sender": request.sender.as_ref().map(|peer| peer.name.clone()),
    })
    .to_string()
}
