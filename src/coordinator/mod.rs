//! CPU pool coordination for container lifecycle events
//!
//! This module decides, for every container the runtime creates or updates,
//! whether it opted into the mutual CPU pool and if so how its cpuset, CFS
//! quota and cgroup files must change.
//!
//! # Architecture
//!
//! ```text
//! runtime ──CreateContainer/UpdateContainer──► LifecycleService
//!                                                   │
//!                                                   ▼
//!                                              Coordinator
//!                                   ┌───────────────┼────────────────┐
//!                                   ▼               ▼                ▼
//!                             ReservedPool    compute_quota   QuotaPathResolver
//!                            (mutual cpus)                    (v1 | v2 paths)
//! ```
//!
//! All inputs are fixed at startup. Requests share no mutable state, so the
//! coordinator is used concurrently without locking.

pub mod annotations;
pub mod plugin;
pub mod pool;
pub mod service;

use std::fmt;

use tonic::Status;

use crate::cgroups::CgroupError;
use crate::cpuset::CpusetParseError;

pub use annotations::{opted_in, ANNOTATION_ENABLE, MUTUAL_CPUS_ANNOTATION};
pub use plugin::Coordinator;
pub use pool::{ReservedPool, DEFAULT_HOUSEKEEPING_CPUS};
pub use service::LifecycleService;

/// Error type for a rejected container adjustment
#[derive(Debug)]
pub enum CoordinatorError {
    /// The container lacks the cpuset or period needed to proceed
    MissingResource {
        container_id: String,
        reason: &'static str,
    },
    /// The container's cpuset is not valid cpuset syntax
    InvalidCpuset {
        container_id: String,
        source: CpusetParseError,
    },
    /// The quota files of the container could not be located
    Cgroup {
        container_id: String,
        source: CgroupError,
    },
}

impl fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinatorError::MissingResource {
                container_id,
                reason,
            } => write!(f, "container {}: {}", container_id, reason),
            CoordinatorError::InvalidCpuset {
                container_id,
                source,
            } => write!(f, "container {}: failed to parse cpuset: {}", container_id, source),
            CoordinatorError::Cgroup {
                container_id,
                source,
            } => write!(
                f,
                "container {}: failed to resolve cgroup quota path: {}",
                container_id, source
            ),
        }
    }
}

impl std::error::Error for CoordinatorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CoordinatorError::MissingResource { .. } => None,
            CoordinatorError::InvalidCpuset { source, .. } => Some(source),
            CoordinatorError::Cgroup { source, .. } => Some(source),
        }
    }
}

impl From<CoordinatorError> for Status {
    fn from(e: CoordinatorError) -> Self {
        match e {
            CoordinatorError::MissingResource { .. } => Status::failed_precondition(e.to_string()),
            CoordinatorError::InvalidCpuset { .. } => Status::invalid_argument(e.to_string()),
            CoordinatorError::Cgroup { .. } => Status::internal(e.to_string()),
        }
    }
}
