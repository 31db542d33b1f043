//! Container lifecycle handling for the mutual CPU pool
//!
//! # Create
//!
//! ```text
//! opted in? ──no──► empty adjustment
//!    │yes
//!    ▼
//! cpus ∪ mutual ──► quota = |cpus ∪ mutual| × period
//!    │
//!    ▼
//! resolve pod + container quota files
//!    │
//!    ▼
//! adjustment { cpus, quota, env OPENSHIFT_MUTUAL_CPUS, create_runtime hook }
//! ```
//!
//! The runtime applies the new cpuset and quota through the adjustment, but
//! the pod scope above the container is outside its reach. The hook writes
//! the raised quota into both the pod and the container file in a single
//! shell invocation before the container's first process starts.
//!
//! # Update
//!
//! An external CPU manager may later rewrite the container's cpuset and
//! strip the mutual CPUs back out. Updates for opted-in containers are
//! re-unioned with the mutual pool and their quota recomputed.

use std::path::Path;

use tracing::{debug, info};

use super::annotations::opted_in;
use super::pool::ReservedPool;
use super::CoordinatorError;
use crate::cgroups::QuotaPathResolver;
use crate::cpuset::Cpuset;
use crate::deviceplugin::MUTUAL_CPUS_ENV;
use crate::grpc::lifecycle_api::{
    Container, ContainerAdjustment, ContainerUpdate, Hook, Hooks, KeyValue,
    LinuxContainerAdjustment, LinuxContainerUpdate, LinuxResources, PodSandbox,
};
use crate::quota::compute_quota;

/// Shell used to run the quota hook
const HOOK_SHELL: &str = "/bin/bash";

/// Rewrites container CPU resources so opted-in containers can use the mutual pool
pub struct Coordinator {
    pool: ReservedPool,
    resolver: Box<dyn QuotaPathResolver>,
}

/// Resources after the mutual pool has been folded in
struct Enlarged {
    resources: LinuxResources,
    mutual: Cpuset,
    quota: i64,
    period: u64,
}

impl Coordinator {
    pub fn new(pool: ReservedPool, resolver: impl QuotaPathResolver + 'static) -> Self {
        Self {
            pool,
            resolver: Box::new(resolver),
        }
    }

    /// Handle a container creation
    pub fn create_container(
        &self,
        pod: &PodSandbox,
        ctr: &Container,
    ) -> Result<(ContainerAdjustment, Vec<ContainerUpdate>), CoordinatorError> {
        let mut adjustment = ContainerAdjustment::default();
        let updates = Vec::new();

        if !opted_in(pod, ctr) {
            return Ok((adjustment, updates));
        }

        info!(
            namespace = %pod.namespace,
            pod = %pod.name,
            container = %ctr.name,
            container_id = %ctr.id,
            "append mutual cpus to container"
        );

        let enlarged = self.enlarge(ctr)?;

        let parent = pod
            .linux
            .as_ref()
            .map(|l| l.cgroup_parent.as_str())
            .unwrap_or_default();
        let cgroup_err = |source| CoordinatorError::Cgroup {
            container_id: ctr.id.clone(),
            source,
        };
        let pod_path = self.resolver.pod_quota_path(parent).map_err(cgroup_err)?;
        let ctr_path = self
            .resolver
            .container_quota_path(parent, &ctr.id)
            .map_err(cgroup_err)?;

        let value = self
            .resolver
            .quota_file_value(enlarged.quota, enlarged.period);
        info!(
            container_id = %ctr.id,
            path = %ctr_path.display(),
            quota = enlarged.quota,
            "inject hook to modify container's cgroups quota"
        );

        adjustment.hooks = Some(Hooks {
            create_runtime: vec![quota_hook(&value, &pod_path, &ctr_path)],
            ..Default::default()
        });
        adjustment.env.push(KeyValue {
            key: MUTUAL_CPUS_ENV.to_string(),
            value: enlarged.mutual.to_string(),
        });
        adjustment.linux = Some(LinuxContainerAdjustment {
            resources: Some(enlarged.resources),
        });

        Ok((adjustment, updates))
    }

    /// Handle a resource update for an existing container
    pub fn update_container(
        &self,
        pod: &PodSandbox,
        ctr: &Container,
    ) -> Result<Vec<ContainerUpdate>, CoordinatorError> {
        if !opted_in(pod, ctr) {
            return Ok(Vec::new());
        }

        info!(
            namespace = %pod.namespace,
            pod = %pod.name,
            container = %ctr.name,
            container_id = %ctr.id,
            "updating container"
        );

        // Re-add whatever the CPU manager stripped out
        let enlarged = self.enlarge(ctr)?;

        Ok(vec![ContainerUpdate {
            container_id: ctr.id.clone(),
            linux: Some(LinuxContainerUpdate {
                resources: Some(enlarged.resources),
            }),
            ignore_failure: false,
        }])
    }

    /// Union the mutual pool into the container's cpuset and raise its quota
    fn enlarge(&self, ctr: &Container) -> Result<Enlarged, CoordinatorError> {
        let missing = |reason: &'static str| CoordinatorError::MissingResource {
            container_id: ctr.id.clone(),
            reason,
        };

        let mut resources = ctr
            .linux
            .as_ref()
            .and_then(|l| l.resources.clone())
            .ok_or_else(|| missing("no cpus found"))?;
        let cpu = resources
            .cpu
            .as_mut()
            .filter(|cpu| !cpu.cpus.is_empty())
            .ok_or_else(|| missing("no cpus found"))?;

        let current = Cpuset::parse(&cpu.cpus).map_err(|source| CoordinatorError::InvalidCpuset {
            container_id: ctr.id.clone(),
            source,
        })?;
        debug!(container_id = %ctr.id, cpus = %current, "current cpus");

        let mutual = self.pool.mutual_cpus();
        if mutual.is_empty() {
            return Err(missing("no mutual cpus found"));
        }

        let period = cpu
            .period
            .filter(|p| *p > 0)
            .ok_or_else(|| missing("no cpu period found"))?;

        let cpus = current.union(&mutual);
        let quota = compute_quota(cpus.size(), period);

        cpu.cpus = cpus.to_string();
        cpu.quota = Some(quota);

        Ok(Enlarged {
            resources,
            mutual,
            quota,
            period,
        })
    }
}

/// Hook writing `value` into the pod file, then the container file
fn quota_hook(value: &str, pod_path: &Path, ctr_path: &Path) -> Hook {
    let script = format!(
        "echo {value} > {pod} && echo {value} > {ctr}",
        value = shell_quote(value),
        pod = shell_quote(&pod_path.to_string_lossy()),
        ctr = shell_quote(&ctr_path.to_string_lossy()),
    );
    Hook {
        path: HOOK_SHELL.to_string(),
        args: vec![HOOK_SHELL.to_string(), "-c".to_string(), script],
        ..Default::default()
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
