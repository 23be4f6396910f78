//! Fedmesh Worker binary
//!
//! Usage:
//!     fedmesh-worker --discover-host controller.example.com --token <token>

use clap::Parser;
use fedmesh_logging::LogConfig;
use fedmesh_worker::discovery::AssignError;
use fedmesh_worker::{FatalError, Worker, WorkerConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

const EXIT_FATAL: u8 = 1;
const EXIT_UNAUTHORIZED: u8 = 3;
const EXIT_UNMATCHED_CONFIG: u8 = 4;
const EXIT_PACKAGE_VALIDATION: u8 = 5;
const EXIT_MISSING_HELPER: u8 = 6;

#[derive(Parser, Debug)]
#[command(name = "fedmesh-worker", about = "Federated training worker for the fedmesh network")]
struct Args {
    /// Discovery service host
    #[arg(long, default_value = "localhost")]
    discover_host: String,

    /// Discovery service port
    #[arg(long, default_value_t = 8092)]
    discover_port: u16,

    /// Bearer token for the control plane and combiner
    #[arg(long, env = "FEDMESH_AUTH_TOKEN")]
    token: Option<String>,

    /// Worker name (generated if not provided)
    #[arg(long)]
    name: Option<String>,

    /// Stable client id (generated if not provided)
    #[arg(long)]
    client_id: Option<String>,

    /// Ask discovery to assign this combiner
    #[arg(long)]
    preferred_combiner: Option<String>,

    /// Use https towards the discovery service
    #[arg(long)]
    force_ssl: bool,

    /// Use TLS towards the combiner
    #[arg(long)]
    secure: bool,

    /// Verify TLS certificates
    #[arg(long)]
    verify: bool,

    /// Do not subscribe to model update requests
    #[arg(long)]
    no_trainer: bool,

    /// Do not subscribe to model validation requests
    #[arg(long)]
    no_validator: bool,

    /// Use the local client/ directory instead of a remote compute package
    #[arg(long)]
    local_package: bool,

    /// Expected sha256 digest of the compute package; mismatch is fatal
    #[arg(long)]
    checksum: Option<String>,

    /// Seconds between heartbeats
    #[arg(long, default_value_t = 2)]
    heartbeat_interval: u64,

    /// Consecutive heartbeat failures tolerated before reconnecting
    #[arg(long, default_value_t = 30)]
    reconnect_after_missed_heartbeat: u32,

    /// Mirror log output to this file
    #[arg(long)]
    logfile: Option<PathBuf>,

    /// Verbose console logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run_worker(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

async fn run_worker(args: Args) -> Result<(), FatalError> {
    fedmesh_logging::init_logging(LogConfig {
        app_name: "fedmesh-worker",
        verbose: args.verbose,
        logfile: args.logfile.as_deref(),
    })?;

    let name = args.name.unwrap_or_else(|| {
        format!(
            "worker-{}",
            uuid::Uuid::new_v4()
                .to_string()
                .split('-')
                .next()
                .unwrap_or("0")
        )
    });
    let client_id = args
        .client_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let config = WorkerConfig {
        name: name.clone(),
        client_id,
        discover_host: args.discover_host.clone(),
        discover_port: args.discover_port,
        token: args.token,
        preferred_combiner: args.preferred_combiner,
        force_ssl: args.force_ssl,
        secure: args.secure,
        verify: args.verify,
        trainer: !args.no_trainer,
        validator: !args.no_validator,
        remote_compute_context: !args.local_package,
        checksum: args.checksum,
        heartbeat_interval: args.heartbeat_interval,
        reconnect_after_missed_heartbeat: args.reconnect_after_missed_heartbeat,
        logfile: args.logfile,
    };

    // every run gets its own directory under the current working directory
    let dirname = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
    let run_path = std::env::current_dir()
        .map_err(|err| anyhow::anyhow!("Failed to resolve current directory: {err}"))?
        .join(dirname);
    std::fs::create_dir_all(&run_path)
        .map_err(|err| anyhow::anyhow!("Failed to create run directory: {err}"))?;

    info!("starting fedmesh worker");
    info!("  name: {name}");
    info!("  discovery: {}:{}", args.discover_host, args.discover_port);
    info!("  run directory: {}", run_path.display());

    let mut worker = Worker::new(config, run_path)?;
    worker.startup().await?;
    worker.run().await
}

fn exit_code(err: &FatalError) -> u8 {
    match err {
        FatalError::Assignment(AssignError::Unauthorized(_)) => EXIT_UNAUTHORIZED,
        FatalError::Assignment(AssignError::UnmatchedConfig(_)) => EXIT_UNMATCHED_CONFIG,
        FatalError::PackageValidation => EXIT_PACKAGE_VALIDATION,
        FatalError::Helper(_) => EXIT_MISSING_HELPER,
        FatalError::ErrorState | FatalError::Other(_) => EXIT_FATAL,
    }
}
