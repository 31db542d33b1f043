//! Opt-in signals for the mutual pool
//!
//! A container joins the mutual pool when either
//! - its pod carries the annotation `cpu-mutual.crio.io: enable`, or
//! - it requested the `openshift.io/mutualcpu` device, which shows up as the
//!   `OPENSHIFT_MUTUAL_CPUS` variable in its environment.

use std::collections::HashMap;

use crate::deviceplugin::MUTUAL_CPUS_ENV;
use crate::grpc::lifecycle_api::{Container, PodSandbox};

pub const MUTUAL_CPUS_ANNOTATION: &str = "cpu-mutual.crio.io";
pub const ANNOTATION_ENABLE: &str = "enable";

/// Exact, case-sensitive match on the annotation value
pub fn is_mutual_cpus_enabled(annotations: &HashMap<String, String>) -> bool {
    annotations
        .get(MUTUAL_CPUS_ANNOTATION)
        .is_some_and(|v| v == ANNOTATION_ENABLE)
}

/// Whether the container environment carries the device allocation variable
///
/// Entries without `=` are skipped.
pub fn requested_device(env: &[String]) -> bool {
    env.iter()
        .filter_map(|entry| entry.split_once('='))
        .any(|(key, _)| key == MUTUAL_CPUS_ENV)
}

/// Whether the container opted into the mutual pool by either route
pub fn opted_in(pod: &PodSandbox, ctr: &Container) -> bool {
    is_mutual_cpus_enabled(&pod.annotations) || requested_device(&ctr.env)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotations(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_annotation_exact_match() {
        assert!(is_mutual_cpus_enabled(&annotations(&[("cpu-mutual.crio.io", "enable")])));
        assert!(!is_mutual_cpus_enabled(&annotations(&[("cpu-mutual.crio.io", "Enable")])));
        assert!(!is_mutual_cpus_enabled(&annotations(&[("cpu-mutual.crio.io", "true")])));
        assert!(!is_mutual_cpus_enabled(&annotations(&[("cpu-mutual.crio.io", "")])));
        assert!(!is_mutual_cpus_enabled(&annotations(&[])));
    }

    #[test]
    fn test_device_request_from_env() {
        let env = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert!(requested_device(&env(&["PATH=/bin", "OPENSHIFT_MUTUAL_CPUS=4-9"])));
        assert!(requested_device(&env(&["OPENSHIFT_MUTUAL_CPUS="])));
        assert!(!requested_device(&env(&["OPENSHIFT_MUTUAL_CPUS"])));
        assert!(!requested_device(&env(&["XOPENSHIFT_MUTUAL_CPUS=1"])));
        assert!(!requested_device(&[]));
    }

    #[test]
    fn test_opted_in_either_route() {
        let mut pod = PodSandbox::default();
        let mut ctr = Container::default();
        assert!(!opted_in(&pod, &ctr));

        ctr.env.push("OPENSHIFT_MUTUAL_CPUS=4-9".to_string());
        assert!(opted_in(&pod, &ctr));

        ctr.env.clear();
        pod.annotations = annotations(&[("cpu-mutual.crio.io", "enable")]);
        assert!(opted_in(&pod, &ctr));
    }
}
