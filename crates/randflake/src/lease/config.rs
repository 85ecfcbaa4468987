use core::time::Duration;

use crate::{Error, Result};

/// Number of node IDs claimed per lease.
pub const LEASE_SIZE: i64 = 128;

/// Exclusive upper bound of the leasable node-ID space.
pub const LEASE_RANGE_MAX: i64 = (1 << 17) - 1;

/// Timing and paging knobs for the lease protocol.
///
/// The defaults are the production values. Every process sharing a lease
/// table must use the same `lease_duration` and `safety_margin`, since
/// uniqueness depends on a lease being abandoned by its holder well before
/// anyone else can claim it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaseConfig {
    /// Lifetime granted by a claim or renewal.
    pub lease_duration: Duration,
    /// Renew a held lease once its remaining lifetime drops below this.
    pub renewal_threshold: Duration,
    /// Stop issuing IDs from a lease once its remaining lifetime drops below
    /// this.
    pub safety_margin: Duration,
    /// Period of the background renewal worker.
    pub renewal_interval: Duration,
    /// Fixed delay before retrying after a serialization conflict.
    pub conflict_backoff: Duration,
    /// Rows fetched per page while scanning for a free range.
    pub scan_page_size: i64,
    /// Cap on conflict retries per claim or renewal. `None` retries forever.
    pub max_claim_retries: Option<u32>,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(10 * 60),
            renewal_threshold: Duration::from_secs(7 * 60),
            safety_margin: Duration::from_secs(3 * 60),
            renewal_interval: Duration::from_secs(10),
            conflict_backoff: Duration::from_millis(100),
            scan_page_size: 1024,
            max_claim_retries: None,
        }
    }
}

impl LeaseConfig {
    /// Checks that the durations are ordered
    /// `safety_margin < renewal_threshold < lease_duration`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(Error::InvalidConfig {
                reason: reason.to_string(),
            })
        };
        if self.safety_margin >= self.renewal_threshold {
            return invalid("safety_margin must be shorter than renewal_threshold");
        }
        if self.renewal_threshold >= self.lease_duration {
            return invalid("renewal_threshold must be shorter than lease_duration");
        }
        if self.lease_duration.as_secs() == 0 || self.safety_margin.as_secs() == 0 {
            return invalid("lease_duration and safety_margin must be at least one second");
        }
        if self.renewal_interval.is_zero() {
            return invalid("renewal_interval must be non-zero");
        }
        if self.scan_page_size <= 0 {
            return invalid("scan_page_size must be positive");
        }
        Ok(())
    }

    pub(crate) const fn lease_secs(&self) -> i64 {
        self.lease_duration.as_secs() as i64
    }

    pub(crate) const fn renewal_secs(&self) -> i64 {
        self.renewal_threshold.as_secs() as i64
    }

    pub(crate) const fn safety_secs(&self) -> i64 {
        self.safety_margin.as_secs() as i64
    }
}
