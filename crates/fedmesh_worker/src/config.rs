//! Worker configuration and identity (plain data, immutable after
//! construction).

use fedmesh_proto::{Peer, Role};
use regex::Regex;
use std::path::PathBuf;
use thiserror::Error;

/// Characters allowed in a worker name.
const VALID_NAME_PATTERN: &str = "^[A-Za-z0-9_-]*$";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unallowed character in worker name '{0}', allowed: a-z, A-Z, 0-9, _, -")]
    InvalidName(String),
}

/// Everything the worker needs to join the network. Constructed once by the
/// binary and passed by capability to the subsystems that need it.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub name: String,
    pub client_id: String,
    pub discover_host: String,
    pub discover_port: u16,
    pub token: Option<String>,
    pub preferred_combiner: Option<String>,
    pub force_ssl: bool,
    pub secure: bool,
    pub verify: bool,
    pub trainer: bool,
    pub validator: bool,
    pub remote_compute_context: bool,
    pub checksum: Option<String>,
    /// Seconds between heartbeats.
    pub heartbeat_interval: u64,
    /// Consecutive heartbeat failures tolerated before detaching.
    pub reconnect_after_missed_heartbeat: u32,
    pub logfile: Option<PathBuf>,
}

/// Validated `(name, client_id, role=WORKER)` tuple.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub name: String,
    pub client_id: String,
}

impl ClientIdentity {
    pub fn new(name: &str, client_id: &str) -> Result<Self, ConfigError> {
        let pattern = Regex::new(VALID_NAME_PATTERN).expect("valid name pattern");
        if !pattern.is_match(name) {
            return Err(ConfigError::InvalidName(name.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            client_id: client_id.to_string(),
        })
    }

    pub fn from_config(config: &WorkerConfig) -> Result<Self, ConfigError> {
        Self::new(&config.name, &config.client_id)
    }

    pub fn as_peer(&self) -> Peer {
        Peer::new(&self.name, Role::Worker)
    }
}
