//! Per-run diagnostic context.
//!
//! While a job runs, its execution id and display name are attached to every
//! log record through a `job` span with the fields `jobId` and `jobName`, and
//! are readable from inside the work unit through [`current`].

use std::fmt::Display;
use std::future::Future;

use tracing::Instrument;

/// Identifiers of the run the current task belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticContext {
    pub job_id: String,
    pub job_name: String,
}

tokio::task_local! {
    static CONTEXT: DiagnosticContext;
}

/// Run `body` with the diagnostic context installed.
///
/// The context is removed when `body` completes, fails or unwinds.
pub async fn apply_and_run<F>(
    job_id: impl Display,
    job_name: impl Into<String>,
    body: F,
) -> F::Output
where
    F: Future,
{
    let context = DiagnosticContext {
        job_id: job_id.to_string(),
        job_name: job_name.into(),
    };
    let span = tracing::info_span!("job", jobId = %context.job_id, jobName = %context.job_name);
    CONTEXT.scope(context, body.instrument(span)).await
}

/// The context of the run executing on this task, if any.
pub fn current() -> Option<DiagnosticContext> {
    CONTEXT.try_with(Clone::clone).ok()
}
