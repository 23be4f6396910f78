//! Supervisor
//!
//! Top-level state machine for the worker: negotiate an assignment, open
//! the combiner channel, spawn the daemons (heartbeat, subscribers,
//! pipeline), then tick once a second watching the shared flags. A cleared
//! `attached` flag triggers a full reattach with a fresh set of daemons; a
//! set `error_state` flag ends the process.

use crate::config::{ClientIdentity, WorkerConfig};
use crate::discovery::{assign_with_retry, AssignError, DiscoveryClient, ASSIGN_RETRY_DELAY};
use crate::dispatch::Dispatcher;
use crate::heartbeat::run_heartbeat_monitor;
use crate::helper::{Helper, MissingHelperType};
use crate::package::{
    stage_local_package, PackageRuntime, PACKAGE_DOWNLOAD_TRIES, PACKAGE_RETRY_DELAY,
};
use crate::pipeline::TaskPipeline;
use crate::queue::task_queue;
use crate::state::{WorkerFlags, WorkerState};
use crate::status::StatusReporter;
use crate::subscriber::{run_update_subscriber, run_validation_subscriber};
use crate::transport::{CombinerApi, CombinerChannel, ControlApi, ModelStore};
use anyhow::Context;
use fedmesh_logging::StatusLog;
use fedmesh_proto::Assignment;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Supervisor loop cadence.
const SUPERVISOR_TICK: Duration = Duration::from_secs(1);

/// Ticks between "worker active" log lines.
const ACTIVE_LINE_TICKS: u32 = 5;

/// Conditions that terminate the worker process.
#[derive(Error, Debug)]
pub enum FatalError {
    #[error(transparent)]
    Assignment(#[from] AssignError),

    #[error("compute package failed validation, worker closing")]
    PackageValidation,

    #[error(transparent)]
    Helper(#[from] MissingHelperType),

    #[error("worker entered fatal error state")]
    ErrorState,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub struct Worker {
    config: WorkerConfig,
    identity: ClientIdentity,
    run_path: PathBuf,
    discovery: DiscoveryClient,
    dispatcher: Option<Arc<Dispatcher>>,
    helper: Option<Helper>,
    status_log: StatusLog,
    flags: Arc<WorkerFlags>,
    transport: Option<CombinerChannel>,
    assignment: Option<Assignment>,
}

impl Worker {
    pub fn new(config: WorkerConfig, run_path: PathBuf) -> Result<Self, FatalError> {
        let identity = ClientIdentity::from_config(&config).map_err(anyhow::Error::from)?;
        let discovery = DiscoveryClient::new(&config, &identity)?;
        Ok(Self {
            config,
            identity,
            run_path,
            discovery,
            dispatcher: None,
            helper: None,
            status_log: StatusLog::new(),
            flags: Arc::new(WorkerFlags::new()),
            transport: None,
            assignment: None,
        })
    }

    pub fn flags(&self) -> Arc<WorkerFlags> {
        Arc::clone(&self.flags)
    }

    pub fn status_log(&self) -> &StatusLog {
        &self.status_log
    }

    /// Join the network: attach, materialize the dispatcher and helper,
    /// spawn the daemons.
    pub async fn startup(&mut self) -> Result<(), FatalError> {
        self.attach().await?;
        self.initialize_dispatcher().await?;
        self.initialize_helper()?;
        self.subscribe()?;
        self.flags.set_state(WorkerState::Idle);
        Ok(())
    }

    /// Ask discovery for a combiner and open the channel. No-op while
    /// already attached.
    async fn attach(&mut self) -> Result<(), FatalError> {
        if self.flags.attached() {
            info!("worker is already attached");
            return Ok(());
        }

        // one assignment at a time: the old channel goes before a new one
        self.transport = None;

        let assignment = assign_with_retry(&self.discovery, ASSIGN_RETRY_DELAY).await?;
        let transport =
            CombinerChannel::connect(&assignment, &self.config).map_err(anyhow::Error::from)?;
        info!(
            "worker {} connected {} to {}",
            self.identity.name,
            if transport.is_secure() { "SECURED" } else { "INSECURE" },
            transport.endpoint()
        );
        if let Some(package) = assignment.package.as_deref() {
            info!("using {package} compute package");
        }

        self.assignment = Some(assignment);
        self.transport = Some(transport);
        self.flags.set_attached();
        Ok(())
    }

    /// Close the channel and clear the attached flag. Idempotent.
    fn detach(&mut self) {
        if !self.flags.detach() {
            info!("worker is not attached");
        }
        self.transport = None;
    }

    async fn initialize_dispatcher(&mut self) -> Result<(), FatalError> {
        if self.config.remote_compute_context {
            let mut runtime = PackageRuntime::new(self.run_path.clone());
            let downloaded = runtime
                .download(&self.discovery, PACKAGE_DOWNLOAD_TRIES, PACKAGE_RETRY_DELAY)
                .await;
            if !downloaded {
                warn!("no compute package available; any incoming task will fail");
                return Ok(());
            }

            match self.config.checksum.as_deref() {
                None => {
                    warn!(
                        "skipping checksum validation of the compute package, \
                         make sure you trust the package source"
                    );
                }
                Some(expected) => {
                    if !runtime.validate(expected)? {
                        self.flags.set_error_state();
                        return Err(FatalError::PackageValidation);
                    }
                }
            }

            runtime.unpack()?;
            self.dispatcher = Some(Arc::new(runtime.dispatcher()?));
        } else {
            let source = std::env::current_dir()
                .context("Failed to resolve current directory")?
                .join("client");
            self.dispatcher = Some(Arc::new(stage_local_package(&source, &self.run_path)?));
        }

        if let Some(dispatcher) = &self.dispatcher {
            if dispatcher.has_entry_point("startup") {
                info!("running dispatcher entry point: startup");
                dispatcher
                    .run_cmd("startup", [] as [&str; 0])
                    .await
                    .context("startup entry point failed")?;
            }
        }
        Ok(())
    }

    fn initialize_helper(&mut self) -> Result<(), FatalError> {
        let helper_type = self
            .assignment
            .as_ref()
            .and_then(|assignment| assignment.helper_type.as_deref());
        let helper = Helper::from_assignment(helper_type)?;
        info!("using '{}' helper for artifact staging", helper.kind());
        self.helper = Some(helper);
        Ok(())
    }

    /// Spawn a fresh set of daemons against the current channel.
    fn subscribe(&mut self) -> Result<(), FatalError> {
        let transport = self
            .transport
            .clone()
            .context("cannot subscribe without an open combiner channel")?;
        let helper = self
            .helper
            .clone()
            .context("cannot subscribe without an artifact helper")?;

        let api: Arc<dyn CombinerApi> = Arc::new(transport.clone());
        let control: Arc<dyn ControlApi> = Arc::new(transport.clone());
        let models: Arc<dyn ModelStore> = Arc::new(transport.clone());
        let status = StatusReporter::new(
            Arc::clone(&api),
            self.identity.clone(),
            self.status_log.clone(),
        );

        self.flags.set_attached();
        let (task_tx, task_rx) = task_queue();

        tokio::spawn(run_heartbeat_monitor(
            control,
            self.identity.clone(),
            Arc::clone(&self.flags),
            Duration::from_secs(self.config.heartbeat_interval.max(1)),
            self.config.reconnect_after_missed_heartbeat,
        ));

        if self.config.trainer {
            tokio::spawn(run_update_subscriber(
                transport.clone(),
                self.identity.clone(),
                Arc::clone(&self.flags),
                task_tx.clone(),
                status.clone(),
            ));
        }
        if self.config.validator {
            tokio::spawn(run_validation_subscriber(
                transport,
                self.identity.clone(),
                Arc::clone(&self.flags),
                task_tx,
                status.clone(),
            ));
        }

        let pipeline = TaskPipeline::new(
            self.identity.clone(),
            models,
            api,
            status,
            self.dispatcher.clone(),
            helper,
            Arc::clone(&self.flags),
        );
        tokio::spawn(pipeline.run(task_rx));

        Ok(())
    }

    /// Supervisor loop: tick every second until interrupt or fatal state.
    pub async fn run(&mut self) -> Result<(), FatalError> {
        let mut ticks = 0u32;
        let mut previous = self.flags.state();
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupt received, shutting down");
                    self.detach();
                    return Ok(());
                }
                _ = tokio::time::sleep(SUPERVISOR_TICK) => {}
            }

            ticks += 1;
            let state = self.flags.state();
            if state != previous {
                info!("worker in {state} state");
                previous = state;
            }
            if ticks > ACTIVE_LINE_TICKS {
                info!("worker active");
                ticks = 0;
            }

            if self.flags.error_state() {
                self.detach();
                return Err(FatalError::ErrorState);
            }

            if !self.flags.attached() {
                warn!("detached from combiner, reattaching");
                self.transport = None;
                self.attach().await?;
                self.subscribe()?;
            }
        }
    }
}
