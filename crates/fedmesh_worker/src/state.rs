//! Worker state and the shared flags the daemons coordinate through.
//!
//! Writes are infrequent and each flag has a single logical writer; readers
//! tolerate a stale value for one loop tick, so relaxed atomics are enough.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

/// Task-pipeline state. At most one task is in flight, so this is a single
/// value, not a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Idle = 0,
    Training = 1,
    Validating = 2,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Idle => "IDLE",
            WorkerState::Training => "TRAINING",
            WorkerState::Validating => "VALIDATING",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => WorkerState::Training,
            2 => WorkerState::Validating,
            _ => WorkerState::Idle,
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flags shared between the supervisor, heartbeat monitor, subscribers and
/// pipeline. `attached` doubles as the cancellation primitive: daemons
/// observe it at their next loop head and exit.
#[derive(Debug)]
pub struct WorkerFlags {
    attached: AtomicBool,
    error_state: AtomicBool,
    missed_heartbeats: AtomicU32,
    state: AtomicU8,
}

impl WorkerFlags {
    pub fn new() -> Self {
        Self {
            attached: AtomicBool::new(false),
            error_state: AtomicBool::new(false),
            missed_heartbeats: AtomicU32::new(0),
            state: AtomicU8::new(WorkerState::Idle as u8),
        }
    }

    pub fn attached(&self) -> bool {
        self.attached.load(Ordering::Relaxed)
    }

    pub fn set_attached(&self) {
        self.attached.store(true, Ordering::Relaxed);
    }

    /// Flip `attached` off. Returns true only for the caller that actually
    /// performed the detach; redundant calls are no-ops.
    pub fn detach(&self) -> bool {
        self.attached.swap(false, Ordering::Relaxed)
    }

    pub fn error_state(&self) -> bool {
        self.error_state.load(Ordering::Relaxed)
    }

    pub fn set_error_state(&self) {
        self.error_state.store(true, Ordering::Relaxed);
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    pub fn missed_heartbeats(&self) -> u32 {
        self.missed_heartbeats.load(Ordering::Relaxed)
    }

    /// A heartbeat went through; the consecutive-failure count restarts.
    pub fn heartbeat_ok(&self) {
        self.missed_heartbeats.store(0, Ordering::Relaxed);
    }

    /// A heartbeat failed; returns the new consecutive-failure count.
    pub fn heartbeat_missed(&self) -> u32 {
        self.missed_heartbeats.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl Default for WorkerFlags {
    fn default() -> Self {
        Self::new()
    }
}
