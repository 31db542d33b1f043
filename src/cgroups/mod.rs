//! cgroup path resolution for CPU bandwidth control
//!
//! This module answers one question: given the cgroup parent the runtime
//! reports for a pod, where on disk are the CPU quota files of that pod and
//! of a container inside it?
//!
//! # Why both scopes?
//!
//! The kernel enforces bandwidth at every level of the hierarchy. Raising a
//! container's quota while its pod scope keeps the old limit still throttles
//! the container, so the pod file and the container file are always patched
//! together.
//!
//! # Example Usage
//!
//! ```ignore
//! use mixedcpus::cgroups::{CgroupResolver, QuotaPathResolver};
//!
//! // Probe once at startup, then share the resolver
//! let resolver = CgroupResolver::detect("crio")?;
//!
//! let pod = resolver.pod_quota_path("kubepods-pod1234.slice")?;
//! let ctr = resolver.container_quota_path("kubepods-pod1234.slice", "abc")?;
//! ```

pub mod mode;
pub mod resolver;
pub mod slice;

use std::fmt;
use std::io;
use std::path::PathBuf;

pub use mode::CgroupMode;
pub use resolver::{
    CgroupResolver, QuotaPathResolver, V1Resolver, V2Resolver, DEFAULT_SCOPE_PREFIX,
};
pub use slice::expand_slice;

/// Error type for cgroup detection and path resolution
#[derive(Debug)]
pub enum CgroupError {
    /// No cgroup v1 mount carries the controller
    MountNotFound { controller: &'static str },
    /// The parent looks like a slice but is not a valid slice unit name
    SliceExpansion { slice: String, reason: &'static str },
    /// The parent is a cgroupfs path, which is not supported
    UnsupportedDriver { parent: String },
    /// Probing the host failed
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for CgroupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CgroupError::MountNotFound { controller } => {
                write!(f, "cgroup mount point for controller {:?} not found", controller)
            }
            CgroupError::SliceExpansion { slice, reason } => {
                write!(f, "failed to expand systemd slice {:?}: {}", slice, reason)
            }
            CgroupError::UnsupportedDriver { parent } => write!(
                f,
                "cgroup parent {:?} is not a systemd slice; the cgroupfs driver is not supported",
                parent
            ),
            CgroupError::Io { path, source } => {
                write!(f, "failed to probe {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for CgroupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CgroupError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}
