//! systemd slice name expansion
//!
//! systemd encodes the slice hierarchy in the unit name itself: every
//! dash-separated prefix of a slice is its parent slice.
//!
//! ```text
//! kubepods-burstable-pod1234.slice
//!   → kubepods.slice/
//!       kubepods-burstable.slice/
//!         kubepods-burstable-pod1234.slice
//! ```

use std::path::PathBuf;

use super::CgroupError;

const SLICE_SUFFIX: &str = ".slice";

/// Whether a cgroup parent is a systemd slice (as opposed to a cgroupfs path)
pub fn is_slice(parent: &str) -> bool {
    parent.ends_with(SLICE_SUFFIX)
}

/// Expand a slice unit name into its relative directory chain
///
/// The root slice `-.slice` expands to the empty path. The result never
/// starts with `/`, so it can be joined onto a mount point.
pub fn expand_slice(slice: &str) -> Result<PathBuf, CgroupError> {
    let fail = |reason: &'static str| CgroupError::SliceExpansion {
        slice: slice.to_string(),
        reason,
    };

    if slice.len() <= SLICE_SUFFIX.len() || !is_slice(slice) {
        return Err(fail("not a slice unit name"));
    }
    if slice.contains('/') {
        return Err(fail("slice names cannot contain '/'"));
    }

    let name = &slice[..slice.len() - SLICE_SUFFIX.len()];
    if name == "-" {
        return Ok(PathBuf::new());
    }

    let mut path = PathBuf::new();
    let mut prefix = String::new();
    for component in name.split('-') {
        if component.is_empty() {
            return Err(fail("empty component in slice name"));
        }
        path.push(format!("{}{}{}", prefix, component, SLICE_SUFFIX));
        prefix.push_str(component);
        prefix.push('-');
    }

    Ok(path)
}
