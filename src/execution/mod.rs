//! Job execution.
//!
//! This module provides the worker that runs a claimed job and the
//! diagnostic context it runs under.

pub mod context;
mod executor;

pub use context::DiagnosticContext;
pub use executor::{ExecutionError, JobExecutor, JobOutcome};
