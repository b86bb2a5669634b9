//! Core domain types: identifiers, schedules, jobs, and execution records.

pub mod duration;
pub mod job;
pub mod schedule;
pub mod types;
