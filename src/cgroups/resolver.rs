//! Quota file path resolution for pod and container scopes
//!
//! ```text
//! cgroup v1                                         cgroup v2
//! /sys/fs/cgroup/cpu,cpuacct/                       /sys/fs/cgroup/
//! └── kubepods.slice/                               └── kubepods.slice/
//!     └── kubepods-pod1.slice/                          └── kubepods-pod1.slice/
//!         ├── cpu.cfs_quota_us   ← pod scope                ├── cpu.max   ← pod scope
//!         └── crio-<id>.scope/                              └── crio-<id>.scope/
//!             └── cpu.cfs_quota_us ← container                  └── cpu.max ← container
//! ```
//!
//! Only systemd-driven slice parents are supported. A cgroupfs-style parent
//! (anything not ending in `.slice`) is rejected with
//! [`CgroupError::UnsupportedDriver`] rather than guessed at.

use std::path::{Path, PathBuf};

use super::mode::{self, CgroupMode};
use super::slice::{expand_slice, is_slice};
use super::CgroupError;

/// Scope name prefix CRI-O gives per-container scopes under the systemd driver
pub const DEFAULT_SCOPE_PREFIX: &str = "crio";

/// Maps a pod's cgroup parent to the CPU bandwidth control files
pub trait QuotaPathResolver: Send + Sync {
    /// The hierarchy this resolver targets
    fn mode(&self) -> CgroupMode;

    /// Absolute path of the pod-scope quota file
    fn pod_quota_path(&self, parent: &str) -> Result<PathBuf, CgroupError>;

    /// Absolute path of the quota file of one container nested in the pod
    fn container_quota_path(&self, parent: &str, container_id: &str)
        -> Result<PathBuf, CgroupError>;

    /// Contents to write into the quota file for the given bandwidth
    fn quota_file_value(&self, quota_us: i64, period_us: u64) -> String;
}

/// Resolver for the legacy per-controller hierarchy
#[derive(Debug, Clone)]
pub struct V1Resolver {
    /// Mount point of the `cpu` controller, e.g. /sys/fs/cgroup/cpu,cpuacct
    cpu_mount: PathBuf,
    scope_prefix: String,
}

impl V1Resolver {
    pub fn new(cpu_mount: impl Into<PathBuf>, scope_prefix: impl Into<String>) -> Self {
        Self {
            cpu_mount: cpu_mount.into(),
            scope_prefix: scope_prefix.into(),
        }
    }
}

impl QuotaPathResolver for V1Resolver {
    fn mode(&self) -> CgroupMode {
        CgroupMode::V1
    }

    fn pod_quota_path(&self, parent: &str) -> Result<PathBuf, CgroupError> {
        Ok(pod_dir(&self.cpu_mount, parent)?.join(self.mode().quota_file()))
    }

    fn container_quota_path(
        &self,
        parent: &str,
        container_id: &str,
    ) -> Result<PathBuf, CgroupError> {
        Ok(pod_dir(&self.cpu_mount, parent)?
            .join(scope_dir(&self.scope_prefix, container_id))
            .join(self.mode().quota_file()))
    }

    // cpu.cfs_quota_us holds a single integer
    fn quota_file_value(&self, quota_us: i64, _period_us: u64) -> String {
        quota_us.to_string()
    }
}

/// Resolver for the unified hierarchy
#[derive(Debug, Clone)]
pub struct V2Resolver {
    unified_mount: PathBuf,
    scope_prefix: String,
}

impl V2Resolver {
    pub fn new(unified_mount: impl Into<PathBuf>, scope_prefix: impl Into<String>) -> Self {
        Self {
            unified_mount: unified_mount.into(),
            scope_prefix: scope_prefix.into(),
        }
    }
}

impl QuotaPathResolver for V2Resolver {
    fn mode(&self) -> CgroupMode {
        CgroupMode::V2
    }

    fn pod_quota_path(&self, parent: &str) -> Result<PathBuf, CgroupError> {
        Ok(pod_dir(&self.unified_mount, parent)?.join(self.mode().quota_file()))
    }

    fn container_quota_path(
        &self,
        parent: &str,
        container_id: &str,
    ) -> Result<PathBuf, CgroupError> {
        Ok(pod_dir(&self.unified_mount, parent)?
            .join(scope_dir(&self.scope_prefix, container_id))
            .join(self.mode().quota_file()))
    }

    // cpu.max is "<quota> <period>"
    fn quota_file_value(&self, quota_us: i64, period_us: u64) -> String {
        format!("{} {}", quota_us, period_us)
    }
}

/// The resolver selected for this host
///
/// Built once at startup and handed to whoever needs path resolution; the
/// variant never changes for the lifetime of the process.
#[derive(Debug, Clone)]
pub enum CgroupResolver {
    V1(V1Resolver),
    V2(V2Resolver),
}

impl CgroupResolver {
    /// Probe the host under the default cgroup root
    pub fn detect(scope_prefix: &str) -> Result<Self, CgroupError> {
        Self::detect_at(
            Path::new(mode::CGROUP_ROOT),
            Path::new(mode::MOUNTINFO_PATH),
            scope_prefix,
        )
    }

    /// Probe the host using an explicit cgroup root and mount table
    pub fn detect_at(
        cgroup_root: &Path,
        mountinfo: &Path,
        scope_prefix: &str,
    ) -> Result<Self, CgroupError> {
        if mode::is_unified(cgroup_root)? {
            return Ok(CgroupResolver::V2(V2Resolver::new(cgroup_root, scope_prefix)));
        }
        let cpu_mount = mode::cpu_controller_mount(mountinfo)?;
        Ok(CgroupResolver::V1(V1Resolver::new(cpu_mount, scope_prefix)))
    }

    fn inner(&self) -> &dyn QuotaPathResolver {
        match self {
            CgroupResolver::V1(r) => r,
            CgroupResolver::V2(r) => r,
        }
    }
}

impl QuotaPathResolver for CgroupResolver {
    fn mode(&self) -> CgroupMode {
        self.inner().mode()
    }

    fn pod_quota_path(&self, parent: &str) -> Result<PathBuf, CgroupError> {
        self.inner().pod_quota_path(parent)
    }

    fn container_quota_path(
        &self,
        parent: &str,
        container_id: &str,
    ) -> Result<PathBuf, CgroupError> {
        self.inner().container_quota_path(parent, container_id)
    }

    fn quota_file_value(&self, quota_us: i64, period_us: u64) -> String {
        self.inner().quota_file_value(quota_us, period_us)
    }
}

fn pod_dir(mount: &Path, parent: &str) -> Result<PathBuf, CgroupError> {
    if !is_slice(parent) {
        return Err(CgroupError::UnsupportedDriver {
            parent: parent.to_string(),
        });
    }
    Ok(mount.join(expand_slice(parent)?))
}

fn scope_dir(prefix: &str, container_id: &str) -> String {
    format!("{}-{}.scope", prefix, container_id)
}
