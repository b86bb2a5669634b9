//! Host-supplied table of declared work units.

use std::sync::Arc;

use super::RegistryError;
use super::declaration::{self, Declaration, ScheduledJob};
use super::work_unit::{WorkUnit, WorkUnitResolver};
use crate::core::types::JobName;

struct Entry {
    declaration: Declaration,
    work_unit: Arc<dyn WorkUnit>,
}

/// Declared work units, in registration order.
#[derive(Default)]
pub struct JobRegistry {
    entries: Vec<Entry>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `bean.method` with the given schedule.
    pub fn register(
        &mut self,
        bean: impl Into<String>,
        method: impl Into<String>,
        scheduled: ScheduledJob,
        work_unit: impl WorkUnit + 'static,
    ) -> &mut Self {
        self.entries.push(Entry {
            declaration: Declaration::new(JobName::new(bean, method), scheduled),
            work_unit: Arc::new(work_unit),
        });
        self
    }

    /// Builder-style variant of [`register`](Self::register).
    pub fn with(
        mut self,
        bean: impl Into<String>,
        method: impl Into<String>,
        scheduled: ScheduledJob,
        work_unit: impl WorkUnit + 'static,
    ) -> Self {
        self.register(bean, method, scheduled, work_unit);
        self
    }

    pub fn declarations(&self) -> Vec<Declaration> {
        self.entries.iter().map(|e| e.declaration.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fail on the first duplicate name or invalid schedule.
    pub fn validate(&self) -> Result<(), RegistryError> {
        declaration::validate_all(&self.declarations())
    }
}

impl WorkUnitResolver for JobRegistry {
    fn resolve(&self, name: &JobName) -> Option<Arc<dyn WorkUnit>> {
        self.entries
            .iter()
            .find(|e| &e.declaration.name == name)
            .map(|e| Arc::clone(&e.work_unit))
    }
}
