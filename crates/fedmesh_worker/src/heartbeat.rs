//! Heartbeat Monitor
//!
//! Signals liveness to the combiner at a fixed cadence. Failures are
//! counted; crossing the configured threshold detaches the worker, which
//! the supervisor observes and answers with a reattach. Detach here never
//! terminates the process.

use crate::config::ClientIdentity;
use crate::state::WorkerFlags;
use crate::transport::ControlApi;
use fedmesh_proto::Heartbeat;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub async fn run_heartbeat_monitor(
    api: Arc<dyn ControlApi>,
    identity: ClientIdentity,
    flags: Arc<WorkerFlags>,
    interval: Duration,
    missed_threshold: u32,
) {
    loop {
        let heartbeat = Heartbeat {
            sender: Some(identity.as_peer()),
        };

        match api.send_heartbeat(heartbeat).await {
            Ok(()) => {
                flags.heartbeat_ok();
                debug!("heartbeat acknowledged");
            }
            Err(err) => {
                let missed = flags.heartbeat_missed();
                warn!("heartbeat failed ({missed} consecutive): {err}");
                if missed > missed_threshold && flags.detach() {
                    warn!("missed heartbeat threshold crossed, detaching from combiner");
                }
            }
        }

        tokio::time::sleep(interval).await;
        if !flags.attached() {
            return;
        }
    }
}
