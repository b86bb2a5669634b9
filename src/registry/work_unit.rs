//! The callable side of a declared job.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

use crate::core::types::JobName;

/// A parameterless unit of work run on a job's schedule.
///
/// # Example
///
/// ```ignore
/// use jobsched::WorkUnit;
/// use async_trait::async_trait;
///
/// struct SendReminders;
///
/// #[async_trait]
/// impl WorkUnit for SendReminders {
///     async fn run(&self) -> anyhow::Result<()> {
///         // ...
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait WorkUnit: Send + Sync {
    /// Run once. An error marks the run as failed.
    async fn run(&self) -> anyhow::Result<()>;
}

#[async_trait]
impl<T: WorkUnit + ?Sized> WorkUnit for Arc<T> {
    async fn run(&self) -> anyhow::Result<()> {
        (**self).run().await
    }
}

/// Work unit backed by an async closure.
pub struct FnWorkUnit<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> WorkUnit for FnWorkUnit<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn run(&self) -> anyhow::Result<()> {
        (self.f)().await
    }
}

/// Wrap an async closure as a work unit.
pub fn work_unit_fn<F, Fut>(f: F) -> FnWorkUnit<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    FnWorkUnit { f }
}

/// Look up the work unit declared under a name.
pub trait WorkUnitResolver: Send + Sync {
    fn resolve(&self, name: &JobName) -> Option<Arc<dyn WorkUnit>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_closure_work_unit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let unit = work_unit_fn(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        unit.run().await.unwrap();
        unit.run().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shared_work_unit_delegates() {
        let unit: Arc<dyn WorkUnit> =
            Arc::new(work_unit_fn(|| async { Err(anyhow::anyhow!("nope")) }));
        let shared = Arc::new(unit);

        let err = shared.run().await.unwrap_err();
        assert_eq!(err.to_string(), "nope");
    }
}
