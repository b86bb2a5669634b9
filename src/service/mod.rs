//! Service layer: the administrative facade over the store and the startup
//! wiring that ties registry, reconciler and dispatch loop together.

pub mod bootstrap;
mod job_service;

pub use bootstrap::{RunningService, ServiceError, open_storage, start};
pub use job_service::JobService;
