use core::future::Future;

use uuid::Uuid;

use crate::store::StoreError;

/// A persisted lease on `[range_start, range_end]` of the node-ID space.
///
/// The store guarantees that no two records active at the same time
/// (`lease_end > now`) overlap. Records are never deleted. A lease simply
/// stops counting once `lease_end` passes.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct RangeRecord {
    pub id: i64,
    pub range_start: i64,
    pub range_end: i64,
    pub lease_holder: Uuid,
    pub lease_start: i64,
    pub lease_end: i64,
}

impl RangeRecord {
    /// Returns `true` if `[start, end]` intersects this record's range.
    pub const fn overlaps(&self, start: i64, end: i64) -> bool {
        self.range_start <= end && start <= self.range_end
    }

    pub const fn is_active(&self, now: i64) -> bool {
        self.lease_end > now
    }
}

/// Payload for [`LeaseTx::claim_range`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeClaim {
    pub range_start: i64,
    pub range_end: i64,
    pub holder: Uuid,
    pub lease_start: i64,
    pub lease_end: i64,
}

/// The shared table of leased node-ID ranges.
///
/// Implementations provide serializable, read-write transactions. Mutual
/// exclusion between processes rests entirely on that isolation level.
pub trait LeaseStore: Send + Sync + 'static {
    /// The transaction type handed out by [`LeaseStore::begin`].
    type Tx: LeaseTx;

    /// Opens a serializable, read-write transaction.
    fn begin(&self) -> impl Future<Output = Result<Self::Tx, StoreError>> + Send;
}

/// One serializable transaction against the lease table.
///
/// Dropping a transaction without calling [`LeaseTx::commit`] rolls it back.
pub trait LeaseTx: Send {
    /// Returns up to `limit` ranges with `range_start >= floor` and
    /// `lease_end > now`, ordered by `range_start`.
    fn scan_ranges(
        &mut self,
        floor: i64,
        now: i64,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<RangeRecord>, StoreError>> + Send;

    /// Inserts `claim` unless it overlaps a range active at
    /// `claim.lease_start`. Returns `None` when the insert was refused.
    fn claim_range(
        &mut self,
        claim: RangeClaim,
    ) -> impl Future<Output = Result<Option<RangeRecord>, StoreError>> + Send;

    /// Moves `lease_end` of record `id` to `lease_end` if it is still held by
    /// `holder` and still active at `now`. Returns `None` when nothing
    /// matched.
    fn renew_range(
        &mut self,
        id: i64,
        holder: Uuid,
        now: i64,
        lease_end: i64,
    ) -> impl Future<Output = Result<Option<RangeRecord>, StoreError>> + Send;

    /// Commits the transaction.
    fn commit(self) -> impl Future<Output = Result<(), StoreError>> + Send;
}
