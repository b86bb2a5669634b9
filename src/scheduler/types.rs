//! Scheduler type definitions.
//!
//! This module contains error types, state enums, and command types for the scheduler.

use crate::storage::StorageError;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors that can occur in the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Channel error.
    #[error("channel error: {0}")]
    ChannelError(String),

    /// The dispatch task ended abnormally.
    #[error("scheduler task failed: {0}")]
    TaskFailed(String),
}

/// State of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Waiting for the initialization barrier.
    Starting,
    /// Claiming and dispatching jobs.
    Running,
    /// No longer claiming; waiting for in-flight workers.
    Draining,
    /// Scheduler is stopped.
    Stopped,
}

/// Why the dispatch loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerExit {
    /// `exit_when_idle` was set and nothing was due or in flight.
    Idle,
    /// Shut down through the handle.
    Shutdown,
}

impl SchedulerExit {
    /// Process exit code for the host.
    pub fn exit_code(&self) -> i32 {
        match self {
            SchedulerExit::Idle | SchedulerExit::Shutdown => 0,
        }
    }
}

/// Commands that can be sent to the scheduler.
pub(crate) enum SchedulerCommand {
    /// Stop claiming, drain workers, then respond.
    Shutdown { response: oneshot::Sender<()> },
}
