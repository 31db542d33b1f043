//! CFS bandwidth quota for an enlarged cpuset
//!
//! Once mutual CPUs are added to a container's cpuset, its quota has to grow
//! with it, otherwise the bandwidth controller throttles threads the cpuset
//! nominally allows to run. The quota is raised to the full linear capacity
//! of the new set: one whole period of CPU time per CPU.
//!
//! ```text
//! cpus = "1-2,4-9"  (8 CPUs)
//! period = 100000us
//! quota  = 8 * 100000 = 800000us per period
//! ```

/// Quota in microseconds per period for `cpu_count` CPUs
///
/// Saturates at `i64::MAX` instead of wrapping.
pub fn compute_quota(cpu_count: usize, period_us: u64) -> i64 {
    let quota = (cpu_count as u64).saturating_mul(period_us);
    i64::try_from(quota).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_is_count_times_period() {
        assert_eq!(compute_quota(8, 100_000), 800_000);
        assert_eq!(compute_quota(1, 50_000), 50_000);
        assert_eq!(compute_quota(0, 100_000), 0);
        assert_eq!(compute_quota(3, 0), 0);

        for n in [0usize, 1, 2, 7, 64, 512] {
            for p in [0u64, 1_000, 100_000, 1_000_000] {
                assert_eq!(compute_quota(n, p), (n as i64) * (p as i64));
            }
        }
    }

    #[test]
    fn test_quota_saturates() {
        assert_eq!(compute_quota(usize::MAX, u64::MAX), i64::MAX);
    }
}
