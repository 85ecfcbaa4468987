//! Claim and renewal transactions against a [`LeaseStore`].

use core::future::Future;

#[cfg(feature = "tracing")]
use tracing::instrument;
use uuid::Uuid;

use crate::{
    Error, Result,
    lease::{LEASE_RANGE_MAX, LEASE_SIZE, Lease, LeaseConfig},
    store::{LeaseStore, LeaseTx, RangeClaim, StoreError},
    time::TimeSource,
};

/// Claims a fresh [`LEASE_SIZE`]-wide range for `holder`.
///
/// Serialization conflicts and refused inserts (another process won the same
/// gap) restart the whole protocol after `conflict_backoff`.
///
/// # Errors
///
/// - [`Error::ResourceExhausted`] if no gap is left in the node-ID space.
/// - [`Error::RetriesExhausted`] if `max_claim_retries` is set and exceeded.
/// - [`Error::Store`] for any non-conflict store failure.
#[cfg_attr(feature = "tracing", instrument(level = "debug", skip(store, time, config)))]
pub(crate) async fn claim_lease<S, T>(
    store: &S,
    time: &T,
    holder: Uuid,
    config: &LeaseConfig,
) -> Result<Lease>
where
    S: LeaseStore,
    T: TimeSource,
{
    let lease = retry_conflicts(config, move || {
        try_claim(store, time.unix_secs(), holder, config)
    })
    .await?;
    #[cfg(feature = "tracing")]
    tracing::info!(
        lease_id = lease.id(),
        range_start = lease.range_start(),
        range_end = lease.range_end(),
        expires_at = lease.expires_at(),
        "claimed node-ID range"
    );
    Ok(lease)
}

/// Extends `lease` to `now + lease_duration` and refreshes its cached
/// expiry.
///
/// # Errors
///
/// - [`Error::LeaseNotRenewed`] if the row no longer matches (expired or
///   taken over).
/// - [`Error::RetriesExhausted`] and [`Error::Store`] as for
///   [`claim_lease`].
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip_all, fields(lease_id = lease.id()))
)]
pub(crate) async fn renew_lease<S>(
    store: &S,
    lease: &Lease,
    now: i64,
    config: &LeaseConfig,
) -> Result<()>
where
    S: LeaseStore,
{
    let lease_end = now + config.lease_secs();
    retry_conflicts(config, move || async move {
        let mut tx = store.begin().await?;
        let renewed = tx
            .renew_range(lease.id(), lease.holder(), now, lease_end)
            .await?
            .ok_or(Error::LeaseNotRenewed { id: lease.id() })?;
        tx.commit().await?;
        Ok(renewed)
    })
    .await?;
    lease.set_expires_at(lease_end);
    Ok(())
}

async fn try_claim<S>(store: &S, now: i64, holder: Uuid, config: &LeaseConfig) -> Result<Lease>
where
    S: LeaseStore,
{
    let mut tx = store.begin().await?;
    let range_start = find_free_range(&mut tx, now, config.scan_page_size).await?;

    let claim = RangeClaim {
        range_start,
        range_end: range_start + LEASE_SIZE - 1,
        holder,
        lease_start: now,
        lease_end: now + config.lease_secs(),
    };
    let Some(record) = tx.claim_range(claim).await? else {
        // Someone else took the gap between our scan and insert.
        return Err(StoreError::Conflict.into());
    };
    tx.commit().await?;
    Ok(Lease::new(record))
}

/// First-fit scan over active ranges ordered by `range_start`.
///
/// Returns the start of the lowest gap at least [`LEASE_SIZE`] wide.
async fn find_free_range<X>(tx: &mut X, now: i64, page_size: i64) -> Result<i64>
where
    X: LeaseTx,
{
    let mut cursor = 0;
    let mut last_end = -1;
    loop {
        if cursor + LEASE_SIZE > LEASE_RANGE_MAX {
            return Err(Error::ResourceExhausted);
        }

        let ranges = tx.scan_ranges(cursor, now, page_size).await?;
        if ranges.is_empty() {
            return Ok(cursor);
        }

        for range in &ranges {
            let free_start = last_end + 1;
            if range.range_start - free_start >= LEASE_SIZE {
                return Ok(free_start);
            }
            last_end = last_end.max(range.range_end);
            cursor = last_end + 1;
        }
    }
}

/// Runs `attempt` until it stops failing with [`StoreError::Conflict`],
/// sleeping `conflict_backoff` between tries.
async fn retry_conflicts<R, F, Fut>(config: &LeaseConfig, mut attempt: F) -> Result<R>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<R>>,
{
    let mut conflicts: u32 = 0;
    loop {
        match attempt().await {
            Err(Error::Store(StoreError::Conflict)) => {
                conflicts = conflicts.saturating_add(1);
                if config.max_claim_retries.is_some_and(|max| conflicts > max) {
                    return Err(Error::RetriesExhausted {
                        attempts: conflicts,
                    });
                }
                #[cfg(feature = "tracing")]
                tracing::debug!(conflicts, "lease transaction conflicted, backing off");
                tokio::time::sleep(config.conflict_backoff).await;
            }
            other => return other,
        }
    }
}
