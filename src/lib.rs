//! mixedcpus - node plugin sharing reserved CPUs with opted-in containers
//!
//! Part of a node's reserved CPUs (the *mutual pool*) is lent to containers
//! that ask for it, either through the pod annotation
//! `cpu-mutual.crio.io: enable` or by requesting the `openshift.io/mutualcpu`
//! device. Such containers get the pool unioned into their cpuset, a CFS
//! quota raised to match, and a hook that writes the quota into both the pod
//! and container cgroups.
//!
//! # Modules
//!
//! - `cpuset` - CPU id sets and their kernel list syntax
//! - `quota` - CFS quota for an enlarged cpuset
//! - `cgroups` - cgroup v1/v2 detection and quota file paths
//! - `coordinator` - mutual pool and container lifecycle handling
//! - `deviceplugin` - kubelet device plugin for the mutual pool
//! - `grpc` - generated APIs and unix socket transport
//! - `config` - startup configuration
//! - `metrics` - Prometheus metrics for observability
//! - `tracing` - logging and optional OTLP export
//!
//! # Quick Start
//!
//! ```ignore
//! use mixedcpus::{CgroupResolver, Coordinator, ReservedPool};
//!
//! let pool = ReservedPool::new("0-9", 4)?;             // mutual pool: 4-9
//! let resolver = CgroupResolver::detect("crio")?;
//! let coordinator = Coordinator::new(pool, resolver);
//! ```

pub mod cgroups;
pub mod config;
pub mod coordinator;
pub mod cpuset;
pub mod deviceplugin;
pub mod grpc;
pub mod metrics;
pub mod quota;
pub mod tracing;

// Re-export commonly used types at crate root for convenience
pub use cgroups::{CgroupResolver, QuotaPathResolver};
pub use config::{Config, ConfigError};
pub use coordinator::{Coordinator, CoordinatorError, LifecycleService, ReservedPool};
pub use cpuset::Cpuset;
pub use deviceplugin::{DevicePluginManager, MutualCpuPlugin};
pub use quota::compute_quota;
