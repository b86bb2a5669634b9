//! Core identifier types for the scheduler.
//!
//! These types provide type-safe identifiers for jobs, tenants, and job
//! executions, plus the structural `JobName` of a declared work unit.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Tenant that owns the jobs created by reconciliation.
pub const ADMIN_TENANT_ID: TenantId =
    TenantId(Uuid::from_u128(0x0000_0000_0000_0000_0000_0000_0000_0001));

/// Unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

/// Identifier of the tenant owning a job or execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(Uuid);

/// Per-run identifier stamped on a job when it is claimed.
///
/// The `JobExecution` written for that run uses the same value as its own id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(Uuid);

macro_rules! uuid_newtype {
    ($name:ident) => {
        impl $name {
            /// Create an identifier from an existing UUID.
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }
    };
}

uuid_newtype!(JobId);
uuid_newtype!(TenantId);
uuid_newtype!(ExecutionId);

impl JobId {
    /// Generate a new random JobId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionId {
    /// Generate a new random ExecutionId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Name of a declared work unit: the bean (owning component) and its method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobName {
    bean: String,
    method: String,
}

impl JobName {
    /// Create a new JobName.
    pub fn new(bean: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            bean: bean.into(),
            method: method.into(),
        }
    }

    pub fn bean(&self) -> &str {
        &self.bean
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// `bean.method`, used in logs and the diagnostic context.
    pub fn display_name(&self) -> String {
        format!("{}.{}", self.bean, self.method)
    }

    /// `bean-method`, the suffix of the `jobScheduler.jobsEnabled.*` property.
    pub fn property_key(&self) -> String {
        format!("{}-{}", self.bean, self.method)
    }
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.bean, self.method)
    }
}
