//! Task Pipeline
//!
//! Single consumer over the task queue; exactly one task is in flight at a
//! time. A task fetches the global model, stages it on disk, runs the
//! matching dispatcher entry point, streams the result back and publishes
//! it. Any failure is reported as a WARNING status and dropped; the
//! combiner is expected to re-request. The pipeline state returns to idle
//! after every task, regardless of outcome.

use crate::config::ClientIdentity;
use crate::dispatch::Dispatcher;
use crate::helper::Helper;
use crate::queue::{TaskEnvelope, TaskReceiver, QUEUE_POLL_TIMEOUT};
use crate::state::{WorkerFlags, WorkerState};
use crate::status::{request_summary, StatusReporter};
use crate::transport::{CombinerApi, ModelStore};
use anyhow::{Context, Result};
use chrono::Utc;
use fedmesh_proto::{LogLevel, ModelUpdate, ModelValidation, StatusType, TaskRequest};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

pub struct TaskPipeline {
    identity: ClientIdentity,
    models: Arc<dyn ModelStore>,
    api: Arc<dyn CombinerApi>,
    status: StatusReporter,
    dispatcher: Option<Arc<Dispatcher>>,
    helper: Helper,
    flags: Arc<WorkerFlags>,
}

impl TaskPipeline {
    pub fn new(
        identity: ClientIdentity,
        models: Arc<dyn ModelStore>,
        api: Arc<dyn CombinerApi>,
        status: StatusReporter,
        dispatcher: Option<Arc<Dispatcher>>,
        helper: Helper,
        flags: Arc<WorkerFlags>,
    ) -> Self {
        Self {
            identity,
            models,
            api,
            status,
            dispatcher,
            helper,
            flags,
        }
    }

    /// Consume the task queue until detach or queue close.
    pub async fn run(self, mut queue: TaskReceiver) {
        loop {
            if !self.flags.attached() {
                return;
            }
            match tokio::time::timeout(QUEUE_POLL_TIMEOUT, queue.recv()).await {
                Err(_) => continue,
                Ok(None) => return,
                Ok(Some(envelope)) => self.process(envelope).await,
            }
        }
    }

    pub async fn process(&self, envelope: TaskEnvelope) {
        info!(
            "processing {} task for model_id {}",
            envelope.kind(),
            envelope.request().model_id
        );
        match envelope {
            TaskEnvelope::Train(request) => self.process_training(request).await,
            TaskEnvelope::Validate(request) => self.process_validation(request).await,
        }
    }

    fn dispatcher(&self) -> Result<&Dispatcher> {
        self.dispatcher
            .as_deref()
            .context("no compute package dispatcher available")
    }

    async fn process_training(&self, request: TaskRequest) {
        self.status
            .report(
                &format!(
                    "Starting processing of training request for model_id {}",
                    request.model_id
                ),
                LogLevel::Info,
                None,
                None,
            )
            .await;
        self.flags.set_state(WorkerState::Training);
        let started = Instant::now();

        match self.run_training(&request).await {
            Ok((updated_model_id, mut meta)) => {
                meta.insert(
                    "processing_time".to_string(),
                    json!(started.elapsed().as_secs_f64()),
                );
                meta.insert("config".to_string(), json!(request.data));

                let update = ModelUpdate {
                    sender: Some(self.identity.as_peer()),
                    receiver: request.sender.clone(),
                    model_id: request.model_id.clone(),
                    model_update_id: updated_model_id,
                    timestamp: Utc::now().to_rfc3339(),
                    correlation_id: request.correlation_id.clone(),
                    meta: Value::Object(meta).to_string(),
                };

                match self.api.send_model_update(update).await {
                    Ok(()) => {
                        self.status
                            .report(
                                "Model update completed.",
                                LogLevel::Audit,
                                Some(StatusType::ModelUpdate),
                                Some(request_summary(&request)),
                            )
                            .await;
                    }
                    Err(err) => {
                        warn!("failed to publish model update: {err}");
                        self.status
                            .report(
                                &format!(
                                    "Worker {} failed to publish model update.",
                                    self.identity.name
                                ),
                                LogLevel::Warning,
                                None,
                                Some(request_summary(&request)),
                            )
                            .await;
                    }
                }
            }
            Err(err) => {
                warn!("could not process training request: {err:#}");
                let meta = json!({"status": "failed", "error": format!("{err:#}")});
                self.status
                    .report(
                        &format!(
                            "Worker {} failed to complete model update.",
                            self.identity.name
                        ),
                        LogLevel::Warning,
                        None,
                        Some(meta.to_string()),
                    )
                    .await;
            }
        }

        self.flags.set_state(WorkerState::Idle);
    }

    async fn run_training(&self, request: &TaskRequest) -> Result<(String, Map<String, Value>)> {
        let mut meta = Map::new();

        let tic = Instant::now();
        let model = self
            .models
            .fetch_model(&request.model_id)
            .await
            .with_context(|| format!("Failed to fetch model {}", request.model_id))?;
        meta.insert("fetch_model".to_string(), json!(tic.elapsed().as_secs_f64()));

        let inpath = self.helper.tmp_path()?;
        tokio::fs::write(&inpath, &model)
            .await
            .with_context(|| format!("Failed to stage model input at {}", inpath.display()))?;
        let outpath = self.helper.tmp_path()?;

        let tic = Instant::now();
        self.dispatcher()?
            .run_cmd("train", [&inpath, &outpath])
            .await?;
        meta.insert(
            "exec_training".to_string(),
            json!(tic.elapsed().as_secs_f64()),
        );

        let tic = Instant::now();
        let out_model = tokio::fs::read(&outpath)
            .await
            .with_context(|| format!("Failed to read model output at {}", outpath.display()))?;
        let updated_model_id = Uuid::new_v4().to_string();
        self.models.push_model(&updated_model_id, out_model).await?;
        meta.insert(
            "upload_model".to_string(),
            json!(tic.elapsed().as_secs_f64()),
        );

        let sidecar = sidecar_path(&outpath);
        let raw = tokio::fs::read_to_string(&sidecar)
            .await
            .with_context(|| format!("Failed to read training metadata at {}", sidecar.display()))?;
        let training_metadata: Value =
            serde_json::from_str(&raw).context("Failed to parse training metadata")?;
        meta.insert("training_metadata".to_string(), training_metadata);

        for path in [&inpath, &outpath, &sidecar] {
            tokio::fs::remove_file(path)
                .await
                .with_context(|| format!("Failed to unlink {}", path.display()))?;
        }

        Ok((updated_model_id, meta))
    }

    async fn process_validation(&self, request: TaskRequest) {
        let entry = if request.is_inference {
            "infer"
        } else {
            "validate"
        };
        self.status
            .report(
                &format!("Processing {entry} request for model_id {}", request.model_id),
                LogLevel::Info,
                None,
                None,
            )
            .await;
        self.flags.set_state(WorkerState::Validating);

        match self.run_validation(&request, entry).await {
            Ok(metrics) => {
                let validation = ModelValidation {
                    sender: Some(self.identity.as_peer()),
                    receiver: request.sender.clone(),
                    model_id: request.model_id.clone(),
                    data: metrics,
                    timestamp: Utc::now().to_rfc3339(),
                    correlation_id: request.correlation_id.clone(),
                };

                match self.api.send_model_validation(validation).await {
                    Ok(()) => {
                        let status_type = if request.is_inference {
                            StatusType::Inference
                        } else {
                            StatusType::ModelValidation
                        };
                        self.status
                            .report(
                                "Model validation completed.",
                                LogLevel::Audit,
                                Some(status_type),
                                Some(request_summary(&request)),
                            )
                            .await;
                    }
                    Err(err) => {
                        warn!("failed to publish model validation: {err}");
                        self.status
                            .report(
                                &format!(
                                    "Worker {} failed to publish model validation.",
                                    self.identity.name
                                ),
                                LogLevel::Warning,
                                None,
                                Some(request_summary(&request)),
                            )
                            .await;
                    }
                }
            }
            Err(err) => {
                warn!("could not process {entry} request: {err:#}");
                self.status
                    .report(
                        &format!(
                            "Worker {} failed to complete model validation.",
                            self.identity.name
                        ),
                        LogLevel::Warning,
                        None,
                        Some(request_summary(&request)),
                    )
                    .await;
            }
        }

        self.flags.set_state(WorkerState::Idle);
    }

    /// Returns the serialized metrics map produced by the entry point.
    async fn run_validation(&self, request: &TaskRequest, entry: &str) -> Result<String> {
        let model = self
            .models
            .fetch_model(&request.model_id)
            .await
            .with_context(|| format!("Failed to fetch model {}", request.model_id))?;

        let inpath = self.helper.tmp_path()?;
        tokio::fs::write(&inpath, &model)
            .await
            .with_context(|| format!("Failed to stage model input at {}", inpath.display()))?;
        let outpath = self.helper.tmp_path()?;

        self.dispatcher()?
            .run_cmd(entry, [&inpath, &outpath])
            .await?;

        let raw = tokio::fs::read_to_string(&outpath)
            .await
            .with_context(|| format!("Failed to read metrics at {}", outpath.display()))?;
        let metrics: Value = serde_json::from_str(&raw).context("Failed to parse metrics")?;

        for path in [&inpath, &outpath] {
            tokio::fs::remove_file(path)
                .await
                .with_context(|| format!("Failed to unlink {}", path.display()))?;
        }

        Ok(metrics.to_string())
    }
}

/// Path of the metadata sidecar a training entry point writes next to its
/// output artifact.
pub fn sidecar_path(outpath: &Path) -> PathBuf {
    let mut os = outpath.as_os_str().to_os_string();
    os.push("-metadata");
    PathBuf::from(os)
}
