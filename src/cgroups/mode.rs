//! cgroup hierarchy detection
//!
//! The kernel runs either the legacy per-controller hierarchies (v1) or the
//! single unified hierarchy (v2); they never coexist. The mode is probed once
//! at startup:
//!
//! 1. `statfs(/sys/fs/cgroup)` reports `CGROUP2_SUPER_MAGIC` → v2, the
//!    unified mount is the root itself.
//! 2. Otherwise scan `/proc/self/mountinfo` for the `cgroup` mount whose
//!    super options name the `cpu` controller → v1, e.g.
//!    `/sys/fs/cgroup/cpu,cpuacct`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use nix::sys::statfs::{statfs, CGROUP2_SUPER_MAGIC};

use super::CgroupError;

/// Default mount point of the cgroup filesystem
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Mount table of the current process
pub const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

/// Which cgroup hierarchy the host runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupMode {
    V1,
    V2,
}

impl CgroupMode {
    /// Name of the CPU bandwidth control file in this mode
    pub fn quota_file(&self) -> &'static str {
        match self {
            CgroupMode::V1 => "cpu.cfs_quota_us",
            CgroupMode::V2 => "cpu.max",
        }
    }
}

impl fmt::Display for CgroupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CgroupMode::V1 => write!(f, "cgroupv1"),
            CgroupMode::V2 => write!(f, "cgroupv2UnifiedMode"),
        }
    }
}

/// Whether `root` is a cgroup2 (unified) mount
pub fn is_unified(root: &Path) -> Result<bool, CgroupError> {
    let stat = statfs(root).map_err(|errno| CgroupError::Io {
        path: root.to_path_buf(),
        source: errno.into(),
    })?;
    Ok(stat.filesystem_type() == CGROUP2_SUPER_MAGIC)
}

/// Read the mount table and locate the v1 `cpu` controller mount point
pub fn cpu_controller_mount(mountinfo_path: &Path) -> Result<PathBuf, CgroupError> {
    let data = fs::read_to_string(mountinfo_path).map_err(|source| CgroupError::Io {
        path: mountinfo_path.to_path_buf(),
        source,
    })?;
    find_controller_mount(&data, "cpu").ok_or_else(|| CgroupError::MountNotFound {
        controller: "cpu",
    })
}

/// Find the mount point of a v1 controller in mountinfo text
///
/// Line format (see proc(5)):
///
/// ```text
/// 35 25 0:30 / /sys/fs/cgroup/cpu,cpuacct rw,nosuid shared:14 - cgroup cgroup rw,cpu,cpuacct
/// │                └ mount point (field 5)                       │      │      └ super options
/// │                                                              │      └ source
/// └ mount id                                                     └ fs type
/// ```
pub fn find_controller_mount(mountinfo: &str, controller: &str) -> Option<PathBuf> {
    for line in mountinfo.lines() {
        let Some((mount, fs)) = line.split_once(" - ") else {
            continue;
        };
        let fs: Vec<&str> = fs.split(' ').collect();
        if fs.len() != 3 || fs[0] != "cgroup" {
            continue;
        }
        if !fs[2].split(',').any(|opt| opt == controller) {
            continue;
        }
        if let Some(mount_point) = mount.split(' ').nth(4) {
            return Some(PathBuf::from(mount_point));
        }
    }
    None
}
