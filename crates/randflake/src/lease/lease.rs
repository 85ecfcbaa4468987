use portable_atomic::{AtomicI64, Ordering};
use uuid::Uuid;

use crate::store::RangeRecord;

/// A node-ID range held by this process.
///
/// The record is fixed at claim time. Only the cached expiry moves, on every
/// successful renewal, so sources can check it without taking a lock.
#[derive(Debug)]
pub struct Lease {
    record: RangeRecord,
    #[cfg(feature = "cache-padded")]
    expires_at: crossbeam_utils::CachePadded<AtomicI64>,
    #[cfg(not(feature = "cache-padded"))]
    expires_at: AtomicI64,
}

impl Lease {
    pub fn new(record: RangeRecord) -> Self {
        let expires_at = record.lease_end;
        Self {
            record,
            #[cfg(feature = "cache-padded")]
            expires_at: crossbeam_utils::CachePadded::new(AtomicI64::new(expires_at)),
            #[cfg(not(feature = "cache-padded"))]
            expires_at: AtomicI64::new(expires_at),
        }
    }

    pub const fn id(&self) -> i64 {
        self.record.id
    }

    pub const fn holder(&self) -> Uuid {
        self.record.lease_holder
    }

    pub const fn range_start(&self) -> i64 {
        self.record.range_start
    }

    pub const fn range_end(&self) -> i64 {
        self.record.range_end
    }

    /// Number of node IDs in the range.
    pub const fn size(&self) -> i64 {
        self.record.range_end - self.record.range_start + 1
    }

    /// Unix second at which the lease lapses, as last confirmed by the store.
    pub fn expires_at(&self) -> i64 {
        self.expires_at.load(Ordering::Acquire)
    }

    pub(crate) fn set_expires_at(&self, lease_end: i64) {
        self.expires_at.store(lease_end, Ordering::Release);
    }

    /// Returns `true` while at least `margin` seconds remain at `now`.
    pub fn is_safe(&self, now: i64, margin: i64) -> bool {
        self.expires_at() >= now + margin
    }
}
