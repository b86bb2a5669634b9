//! Scheduler for job dispatch.
//!
//! This module provides the dispatch loop that claims due jobs and runs
//! them under a parallelism cap, the barrier it waits on at startup, and the
//! handle used to stop it.

mod barrier;
mod engine;
mod handle;
mod types;

pub use barrier::{DEFAULT_BARRIER_TIMEOUT, InitializationBarrier};
pub use engine::{DEFAULT_ERROR_BACKOFF, DEFAULT_POLL_INTERVAL, Scheduler, adaptive_delay};
pub use handle::SchedulerHandle;
pub use types::{SchedulerError, SchedulerExit, SchedulerState};
