//! Reserved and mutual CPU pools
//!
//! ```text
//! reserved (as configured):  0  1  2  3 │ 4  5  6  7  8  9
//!                            └─────┬────┘ └───────┬────────┘
//!                            housekeeping    mutual pool
//! ```
//!
//! The housekeeping CPUs are the first entries in the order the reserved
//! list was *written*, not the lowest ids: `"8-9,0-7"` keeps 8, 9, 0, 1 for
//! housekeeping and shares 2-7.

use crate::config::ConfigError;
use crate::cpuset::{ids_in_written_order, Cpuset};

/// Reserved CPUs kept out of the mutual pool unless configured otherwise
pub const DEFAULT_HOUSEKEEPING_CPUS: usize = 4;

/// The node's reserved CPUs, fixed at startup
#[derive(Debug, Clone)]
pub struct ReservedPool {
    /// Ids in configured order, without duplicates
    order: Vec<usize>,
    housekeeping: usize,
}

impl ReservedPool {
    /// Parse the reserved CPU list
    ///
    /// Fails unless the pool holds strictly more CPUs than `housekeeping`,
    /// since otherwise there would be nothing left to share.
    pub fn new(reserved: &str, housekeeping: usize) -> Result<Self, ConfigError> {
        let order = ids_in_written_order(reserved).map_err(|source| ConfigError::InvalidCpuset {
            value: reserved.to_string(),
            source,
        })?;
        if order.len() <= housekeeping {
            return Err(ConfigError::ReservedPoolTooSmall {
                size: order.len(),
                housekeeping,
            });
        }
        Ok(Self {
            order,
            housekeeping,
        })
    }

    /// Every reserved CPU
    pub fn cpus(&self) -> Cpuset {
        self.order.iter().copied().collect()
    }

    /// CPUs left alone for housekeeping
    pub fn housekeeping_cpus(&self) -> Cpuset {
        self.order[..self.housekeeping].iter().copied().collect()
    }

    /// CPUs shared between opted-in containers
    pub fn mutual_cpus(&self) -> Cpuset {
        self.order[self.housekeeping..].iter().copied().collect()
    }
}
