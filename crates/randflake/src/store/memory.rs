use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::store::{LeaseStore, LeaseTx, RangeClaim, RangeRecord, StoreError};

/// An in-process [`LeaseStore`].
///
/// Transactions work on a private snapshot of the table taken at
/// [`LeaseStore::begin`]. A transaction that wrote anything fails its commit
/// with [`StoreError::Conflict`] if another writer committed after the
/// snapshot was taken (first committer wins). This is enough to exercise the
/// lease protocol's retry path without a database.
///
/// Clones share the same table, so several [`RandFlake`] instances built on
/// clones of one store behave like processes sharing a database.
///
/// [`RandFlake`]: crate::RandFlake
#[derive(Clone, Default)]
pub struct MemoryLeaseStore {
    table: Arc<Mutex<Table>>,
}

#[derive(Default)]
struct Table {
    rows: Vec<RangeRecord>,
    next_id: i64,
    version: u64,
    commits: u64,
    conflicts: u64,
    refused_claims: u64,
    injected_conflicts: u32,
    injected_rivals: u32,
    injected_failure: Option<String>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts records directly, bypassing overlap checks.
    pub fn seed(&self, records: impl IntoIterator<Item = RangeRecord>) {
        let mut table = self.table.lock();
        for record in records {
            table.next_id = table.next_id.max(record.id + 1);
            table.rows.push(record);
        }
        table.version += 1;
    }

    /// Returns a copy of every record, ordered by `range_start`.
    pub fn records(&self) -> Vec<RangeRecord> {
        let mut rows = self.table.lock().rows.clone();
        rows.sort_by_key(|r| r.range_start);
        rows
    }

    /// Returns the records active at `now` held by `holder`.
    pub fn held_by(&self, holder: Uuid, now: i64) -> Vec<RangeRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.lease_holder == holder && r.is_active(now))
            .collect()
    }

    /// Number of successful commits that wrote at least one row.
    pub fn commits(&self) -> u64 {
        self.table.lock().commits
    }

    /// Number of commits rejected with [`StoreError::Conflict`].
    pub fn conflicts(&self) -> u64 {
        self.table.lock().conflicts
    }

    /// Number of [`LeaseTx::claim_range`] calls refused for overlap.
    pub fn refused_claims(&self) -> u64 {
        self.table.lock().refused_claims
    }

    /// Makes the next `n` claims lose their gap to a rival holder, which
    /// commits the same range just before the insert runs.
    pub fn inject_rival_claims(&self, n: u32) {
        self.table.lock().injected_rivals = n;
    }

    /// Makes the next `n` writing commits fail with a conflict.
    pub fn inject_conflicts(&self, n: u32) {
        self.table.lock().injected_conflicts = n;
    }

    /// Makes the next [`LeaseStore::begin`] fail with a backend error.
    pub fn inject_failure(&self, reason: impl Into<String>) {
        self.table.lock().injected_failure = Some(reason.into());
    }
}

impl LeaseStore for MemoryLeaseStore {
    type Tx = MemoryLeaseTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let mut table = self.table.lock();
        if let Some(reason) = table.injected_failure.take() {
            return Err(StoreError::backend(reason));
        }
        Ok(MemoryLeaseTx {
            table: Arc::clone(&self.table),
            snapshot: table.rows.clone(),
            read_version: table.version,
            dirty: false,
        })
    }
}

/// A transaction on a [`MemoryLeaseStore`].
pub struct MemoryLeaseTx {
    table: Arc<Mutex<Table>>,
    snapshot: Vec<RangeRecord>,
    read_version: u64,
    dirty: bool,
}

impl LeaseTx for MemoryLeaseTx {
    async fn scan_ranges(
        &mut self,
        floor: i64,
        now: i64,
        limit: i64,
    ) -> Result<Vec<RangeRecord>, StoreError> {
        let mut rows: Vec<RangeRecord> = self
            .snapshot
            .iter()
            .filter(|r| r.range_start >= floor && r.is_active(now))
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.range_start);
        rows.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(rows)
    }

    async fn claim_range(&mut self, claim: RangeClaim) -> Result<Option<RangeRecord>, StoreError> {
        let taken = |r: &RangeRecord| {
            r.is_active(claim.lease_start) && r.overlaps(claim.range_start, claim.range_end)
        };

        let id = {
            let mut table = self.table.lock();
            if table.injected_rivals > 0 {
                table.injected_rivals -= 1;
                table.next_id += 1;
                let rival = RangeRecord {
                    id: table.next_id,
                    range_start: claim.range_start,
                    range_end: claim.range_end,
                    lease_holder: Uuid::now_v7(),
                    lease_start: claim.lease_start,
                    lease_end: claim.lease_end,
                };
                table.rows.push(rival);
                table.version += 1;
                table.commits += 1;
            }

            // The insert also sees rows committed after this snapshot.
            if self.snapshot.iter().any(taken) || table.rows.iter().any(taken) {
                table.refused_claims += 1;
                return Ok(None);
            }
            table.next_id += 1;
            table.next_id
        };
        let record = RangeRecord {
            id,
            range_start: claim.range_start,
            range_end: claim.range_end,
            lease_holder: claim.holder,
            lease_start: claim.lease_start,
            lease_end: claim.lease_end,
        };
        self.snapshot.push(record.clone());
        self.dirty = true;
        Ok(Some(record))
    }

    async fn renew_range(
        &mut self,
        id: i64,
        holder: Uuid,
        now: i64,
        lease_end: i64,
    ) -> Result<Option<RangeRecord>, StoreError> {
        let Some(record) = self
            .snapshot
            .iter_mut()
            .find(|r| r.id == id && r.lease_holder == holder && r.is_active(now))
        else {
            return Ok(None);
        };
        record.lease_end = lease_end;
        self.dirty = true;
        Ok(Some(record.clone()))
    }

    async fn commit(self) -> Result<(), StoreError> {
        if !self.dirty {
            return Ok(());
        }

        let mut table = self.table.lock();
        if table.injected_conflicts > 0 {
            table.injected_conflicts -= 1;
            table.conflicts += 1;
            return Err(StoreError::Conflict);
        }
        if table.version != self.read_version {
            table.conflicts += 1;
            return Err(StoreError::Conflict);
        }
        table.rows = self.snapshot;
        table.version += 1;
        table.commits += 1;
        Ok(())
    }
}
