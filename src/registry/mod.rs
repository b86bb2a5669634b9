//! Declared work units and their reconciliation into the job store.
//!
//! The host registers each parameterless work unit under a `(bean, method)`
//! name together with its [`ScheduledJob`] declaration. At startup the
//! [`Reconciler`] makes the store agree with those declarations.

mod declaration;
mod job_registry;
mod reconciler;
mod work_unit;

pub use declaration::{Declaration, ScheduledJob, validate_all};
pub use job_registry::JobRegistry;
pub use reconciler::{
    JOBS_ENABLED_PREFIX, RECONCILER_BEAN, RECONCILER_METHOD, ReconcileReport, Reconciler,
    reconciler_job_name,
};
pub use work_unit::{FnWorkUnit, WorkUnit, WorkUnitResolver, work_unit_fn};

use thiserror::Error;

use crate::core::schedule::ScheduleError;
use crate::storage::StorageError;

/// Errors raised while validating or reconciling declarations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Two work units were declared under the same name.
    #[error("job '{0}' is declared more than once")]
    DuplicateJob(String),

    /// More than one of `cron`, `delay` and `rate` was set.
    #[error("job '{0}' declares more than one of cron, delay and rate")]
    ConflictingSchedules(String),

    /// The declared schedule cannot be evaluated.
    #[error("invalid schedule for job '{job}': {source}")]
    InvalidSchedule {
        job: String,
        #[source]
        source: ScheduleError,
    },

    /// A required configuration property is absent.
    #[error("missing required property '{0}'")]
    MissingProperty(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
