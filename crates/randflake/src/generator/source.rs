use core::cmp;
use std::sync::Arc;

use portable_atomic::{AtomicU64, Ordering};
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    Error, Result,
    id::{RANDFLAKE_EPOCH, RandflakeId},
    lease::Lease,
};

/// One leased node ID producing a per-second counter sequence.
///
/// The last issued ID is kept in a single [`AtomicU64`] and advanced with
/// compare-and-swap, so any number of threads can draw from a source without
/// a lock. Within a source, IDs are strictly increasing.
///
/// A source is only as good as its lease: once the lease's remaining
/// lifetime falls inside the safety margin, every call fails with
/// [`Error::ResourceExhausted`] rather than risk issuing an ID under a node
/// ID another process may soon claim.
pub struct Source {
    lease: Arc<Lease>,
    node_id: u64,
    #[cfg(feature = "cache-padded")]
    state: crossbeam_utils::CachePadded<AtomicU64>,
    #[cfg(not(feature = "cache-padded"))]
    state: AtomicU64,
}

impl Source {
    /// Binds `node_id` of `lease` to a new source.
    pub fn new(lease: Arc<Lease>, node_id: i64) -> Self {
        debug_assert!(lease.range_start() <= node_id && node_id <= lease.range_end());
        let node_id = node_id as u64;
        let initial = RandflakeId::from_components(0, node_id, 0).to_raw();
        Self {
            lease,
            node_id,
            #[cfg(feature = "cache-padded")]
            state: crossbeam_utils::CachePadded::new(AtomicU64::new(initial)),
            #[cfg(not(feature = "cache-padded"))]
            state: AtomicU64::new(initial),
        }
    }

    pub const fn node_id(&self) -> u64 {
        self.node_id
    }

    pub fn lease(&self) -> &Lease {
        &self.lease
    }

    /// Returns `true` while the bound lease has at least `margin` seconds
    /// left at `now`.
    pub fn is_usable(&self, now: i64, margin: i64) -> bool {
        self.lease.is_safe(now, margin)
    }

    /// Issues the next ID for the Unix second `now`.
    ///
    /// A new second resets the counter to zero. If the clock reads earlier
    /// than the last second used, the source keeps counting in that last
    /// second so its output never goes backwards.
    ///
    /// # Errors
    ///
    /// - [`Error::ResourceExhausted`] if the lease is inside `margin` or the
    ///   counter for the current second is used up.
    /// - [`Error::Dead`] once `now` no longer fits the 30-bit timestamp.
    /// - [`Error::ClockBeforeEpoch`] if `now` precedes the epoch.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self), fields(node_id = self.node_id)))]
    pub fn try_next_id(&self, now: i64, margin: i64) -> Result<RandflakeId> {
        if !self.is_usable(now, margin) {
            return Err(Error::ResourceExhausted);
        }
        let now_ts = timestamp_for(now)?;

        loop {
            let current_raw = self.state.load(Ordering::Relaxed);
            let current = RandflakeId::from_raw(current_raw);

            let next = match now_ts.cmp(&current.timestamp()) {
                cmp::Ordering::Greater => current.rollover_to_timestamp(now_ts),
                cmp::Ordering::Equal | cmp::Ordering::Less => {
                    if current.has_counter_room() {
                        current.increment_counter()
                    } else {
                        return Err(Error::ResourceExhausted);
                    }
                }
            };

            if self
                .state
                .compare_exchange(
                    current_raw,
                    next.to_raw(),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                return Ok(next);
            }
            // Lost the race to another caller; reload and try again.
            core::hint::spin_loop();
        }
    }
}

impl core::fmt::Debug for Source {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Source")
            .field("node_id", &self.node_id)
            .field("lease_id", &self.lease.id())
            .field("last", &RandflakeId::from_raw(self.state.load(Ordering::Relaxed)))
            .finish()
    }
}

fn timestamp_for(now: i64) -> Result<u64> {
    let offset = now - RANDFLAKE_EPOCH;
    if offset < 0 {
        return Err(Error::ClockBeforeEpoch { now });
    }
    let offset = offset as u64;
    if offset > RandflakeId::MAX_TIMESTAMP {
        return Err(cold_dead());
    }
    Ok(offset)
}

#[cold]
#[inline(never)]
fn cold_dead() -> Error {
    #[cfg(feature = "tracing")]
    tracing::error!("timestamp no longer fits in 30 bits, randflake is dead");
    Error::Dead
}
