use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::store::{LeaseStore, LeaseTx, RangeClaim, RangeRecord, StoreError};

/// SQLSTATE for `serialization_failure`.
const SERIALIZATION_FAILURE: &str = "40001";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS randflake_nodes (
    id           BIGSERIAL PRIMARY KEY,
    range_start  BIGINT    NOT NULL,
    range_end    BIGINT    NOT NULL,
    lease_holder UUID      NOT NULL,
    lease_start  BIGINT    NOT NULL,
    lease_end    BIGINT    NOT NULL
);
CREATE INDEX IF NOT EXISTS randflake_nodes_range_lease
    ON randflake_nodes (range_start, lease_end);
";

const SCAN_RANGES: &str = "
SELECT id, range_start, range_end, lease_holder, lease_start, lease_end
FROM randflake_nodes
WHERE range_start >= $1 AND lease_end > $2
ORDER BY range_start ASC
LIMIT $3";

const CLAIM_RANGE: &str = "
INSERT INTO randflake_nodes (range_start, range_end, lease_holder, lease_start, lease_end)
SELECT $1, $2, $3, $4, $5
WHERE NOT EXISTS (
    SELECT 1 FROM randflake_nodes
    WHERE lease_end > $4 AND range_start <= $2 AND range_end >= $1
)
RETURNING id, range_start, range_end, lease_holder, lease_start, lease_end";

const RENEW_RANGE: &str = "
UPDATE randflake_nodes
SET lease_end = $1
WHERE id = $2 AND lease_holder = $3 AND lease_end > $4
RETURNING id, range_start, range_end, lease_holder, lease_start, lease_end";

/// A [`LeaseStore`] backed by a PostgreSQL table.
///
/// Every transaction runs at `SERIALIZABLE` isolation. Serialization failures
/// are reported as [`StoreError::Conflict`] so the lease protocol can retry
/// them.
#[derive(Clone, Debug)]
pub struct PgLeaseStore {
    pool: PgPool,
}

impl PgLeaseStore {
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the `randflake_nodes` table and its index if missing.
    ///
    /// # Errors
    ///
    /// Returns any error from executing the DDL.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(())
    }
}

impl LeaseStore for PgLeaseStore {
    type Tx = PgLeaseTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE, READ WRITE")
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
        Ok(PgLeaseTx { tx })
    }
}

/// A serializable transaction on a [`PgLeaseStore`].
pub struct PgLeaseTx {
    tx: Transaction<'static, Postgres>,
}

impl LeaseTx for PgLeaseTx {
    async fn scan_ranges(
        &mut self,
        floor: i64,
        now: i64,
        limit: i64,
    ) -> Result<Vec<RangeRecord>, StoreError> {
        sqlx::query_as::<_, RangeRecord>(SCAN_RANGES)
            .bind(floor)
            .bind(now)
            .bind(limit)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(map_err)
    }

    async fn claim_range(&mut self, claim: RangeClaim) -> Result<Option<RangeRecord>, StoreError> {
        sqlx::query_as::<_, RangeRecord>(CLAIM_RANGE)
            .bind(claim.range_start)
            .bind(claim.range_end)
            .bind(claim.holder)
            .bind(claim.lease_start)
            .bind(claim.lease_end)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_err)
    }

    async fn renew_range(
        &mut self,
        id: i64,
        holder: Uuid,
        now: i64,
        lease_end: i64,
    ) -> Result<Option<RangeRecord>, StoreError> {
        sqlx::query_as::<_, RangeRecord>(RENEW_RANGE)
            .bind(lease_end)
            .bind(id)
            .bind(holder)
            .bind(now)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_err)
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(map_err)
    }
}

fn map_err(err: sqlx::Error) -> StoreError {
    let is_conflict = err
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == SERIALIZATION_FAILURE);
    if is_conflict {
        StoreError::Conflict
    } else {
        StoreError::backend(err)
    }
}
