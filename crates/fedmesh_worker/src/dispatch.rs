//! Dispatcher
//!
//! Binds compute-package entry-point names to external commands and runs
//! them as subprocesses in the run directory. Binding is late: a name is
//! resolved at invocation time, so a package may carry any set of entry
//! points beyond the required `train` and `validate`.

use serde::Deserialize;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("no such entry point: {0}")]
    MissingEntryPoint(String),

    #[error("entry point '{0}' has an empty command")]
    EmptyCommand(String),

    #[error("entry point '{name}' exited with {status}")]
    Failed { name: String, status: ExitStatus },

    #[error("failed to spawn entry point '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// One executable entry point of a compute package.
#[derive(Debug, Clone, Deserialize)]
pub struct EntryPoint {
    pub command: String,
}

/// The `entry_points` map of a compute-package manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    pub entry_points: HashMap<String, EntryPoint>,
}

/// Runs named entry points as subprocesses in the run directory.
#[derive(Debug)]
pub struct Dispatcher {
    config: DispatchConfig,
    run_path: PathBuf,
}

impl Dispatcher {
    pub fn new(config: DispatchConfig, run_path: impl Into<PathBuf>) -> Self {
        Self {
            config,
            run_path: run_path.into(),
        }
    }

    pub fn run_path(&self) -> &Path {
        &self.run_path
    }

    pub fn has_entry_point(&self, name: &str) -> bool {
        self.config.entry_points.contains_key(name)
    }

    /// Run the named entry point with `args` appended to its command and
    /// wait for it to finish. Non-zero exit is an error.
    pub async fn run_cmd<I, S>(&self, name: &str, args: I) -> Result<(), DispatchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let entry = self
            .config
            .entry_points
            .get(name)
            .ok_or_else(|| DispatchError::MissingEntryPoint(name.to_string()))?;

        let mut parts = entry.command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| DispatchError::EmptyCommand(name.to_string()))?;

        info!("dispatching entry point '{name}': {}", entry.command);
        let status = tokio::process::Command::new(program)
            .args(parts)
            .args(args)
            .current_dir(&self.run_path)
            .status()
            .await
            .map_err(|source| DispatchError::Spawn {
                name: name.to_string(),
                source,
            })?;

        if !status.success() {
            return Err(DispatchError::Failed {
                name: name.to_string(),
                status,
            });
        }

        debug!("entry point '{name}' completed");
        Ok(())
    }
}
