use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
#[cfg(feature = "tracing")]
use tracing::instrument;
use uuid::Uuid;

use crate::{
    Result,
    cipher::Sparx64,
    generator::{Generator, Source, worker},
    lease::{Lease, LeaseConfig, NodeSet, claim_lease, renew_lease},
    store::LeaseStore,
    time::{SystemClock, TimeSource},
};

/// Per-process coordinator for lease-backed ID generation.
///
/// A `RandFlake` owns the leases this process holds, an idle pool of sources
/// returned by closed generators, and the cipher used to hide ID structure.
/// It is a cheap handle: clones share the same state.
///
/// Construction spawns a background task that renews leases approaching
/// expiry and drops leases that fell inside the safety margin. The task
/// stops on [`RandFlake::shutdown`] or once every handle is dropped.
///
/// Every process sharing a store must build exactly one `RandFlake`; each
/// instance picks a fresh holder identity.
///
/// # Example
///
/// ```
/// use randflake::{MemoryLeaseStore, RandFlake};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> randflake::Result<()> {
/// let randflake = RandFlake::new(MemoryLeaseStore::new(), b"0123456789abcdef")?;
/// let generator = randflake.new_generator().await?;
///
/// let (raw, hidden) = generator.generate_pair().await?;
/// assert_eq!(randflake.decrypt(hidden), raw);
///
/// generator.close().await;
/// randflake.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct RandFlake<S, T = SystemClock>
where
    S: LeaseStore,
    T: TimeSource,
{
    inner: Arc<Shared<S, T>>,
}

pub(crate) struct Shared<S, T> {
    store: S,
    time: T,
    holder: Uuid,
    config: LeaseConfig,
    cipher: Sparx64,
    leases: tokio::sync::Mutex<Vec<HeldLease>>,
    idle: Mutex<Vec<Arc<Source>>>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct HeldLease {
    lease: Arc<Lease>,
    nodes: NodeSet,
}

/// Outcome of one pass of [`RandFlake::maintain_leases`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Maintenance {
    /// Leases successfully extended.
    pub renewed: usize,
    /// Renewals that failed and will be retried on the next pass.
    pub failed: usize,
    /// Leases dropped for falling inside the safety margin.
    pub dropped: usize,
}

impl<S> RandFlake<S, SystemClock>
where
    S: LeaseStore,
{
    /// Creates a coordinator on the system clock with default lease timings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSecret`] unless `secret` is 16 bytes.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// [`Error::InvalidSecret`]: crate::Error::InvalidSecret
    pub fn new(store: S, secret: &[u8]) -> Result<Self> {
        Self::with_options(store, secret, SystemClock, LeaseConfig::default())
    }
}

impl<S, T> RandFlake<S, T>
where
    S: LeaseStore,
    T: TimeSource,
{
    /// Creates a coordinator with an explicit clock and lease timings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSecret`] unless `secret` is 16 bytes, or
    /// [`Error::InvalidConfig`] if `config` fails validation.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// [`Error::InvalidSecret`]: crate::Error::InvalidSecret
    /// [`Error::InvalidConfig`]: crate::Error::InvalidConfig
    pub fn with_options(store: S, secret: &[u8], time: T, config: LeaseConfig) -> Result<Self> {
        let cipher = Sparx64::new(secret)?;
        config.validate()?;

        let inner = Arc::new(Shared {
            store,
            time,
            holder: Uuid::now_v7(),
            config,
            cipher,
            leases: tokio::sync::Mutex::new(Vec::new()),
            idle: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
            worker: Mutex::new(None),
        });

        let handle = worker::spawn(&inner);
        *inner.worker.lock() = Some(handle);

        #[cfg(feature = "tracing")]
        tracing::info!(holder = %inner.holder, "randflake started");

        Ok(Self { inner })
    }

    /// Creates a [`Generator`] and draws one ID from it to prove the setup
    /// works end to end.
    ///
    /// # Errors
    ///
    /// Any error from the first generation, most likely a store failure or
    /// [`Error::ResourceExhausted`](crate::Error::ResourceExhausted) when the
    /// node-ID space is fully leased.
    pub async fn new_generator(&self) -> Result<Generator<S, T>> {
        let generator = Generator::new(self.clone());
        generator.generate().await?;
        Ok(generator)
    }

    /// Identity written as `lease_holder` on every lease of this instance.
    pub fn holder(&self) -> Uuid {
        self.inner.holder
    }

    pub fn config(&self) -> &LeaseConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// Hides the structure of a raw ID.
    pub fn encrypt(&self, id: i64) -> i64 {
        self.inner.cipher.encrypt_id(id)
    }

    /// Recovers the raw ID from [`RandFlake::encrypt`] output.
    pub fn decrypt(&self, id: i64) -> i64 {
        self.inner.cipher.decrypt_id(id)
    }

    /// Snapshot of the leases currently held.
    pub async fn held_leases(&self) -> Vec<Arc<Lease>> {
        let held = self.inner.leases.lock().await;
        held.iter().map(|h| Arc::clone(&h.lease)).collect()
    }

    /// Number of sources waiting in the idle pool.
    pub fn idle_sources(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Runs one pass of lease upkeep. The background worker calls this every
    /// `renewal_interval`.
    ///
    /// Leases with less than `safety_margin` left are dropped without a
    /// renewal attempt. Leases with less than `renewal_threshold` left are
    /// renewed. A failed renewal is logged and retried on the next pass.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub async fn maintain_leases(&self) -> Maintenance {
        let shared = &*self.inner;
        let now = shared.time.unix_secs();
        let safety = shared.config.safety_secs();
        let mut report = Maintenance::default();

        let mut held = shared.leases.lock().await;
        for h in held.iter() {
            let remaining = h.lease.expires_at() - now;
            if remaining < safety || remaining >= shared.config.renewal_secs() {
                continue;
            }
            match renew_lease(&shared.store, &h.lease, now, &shared.config).await {
                Ok(()) => report.renewed += 1,
                Err(_e) => {
                    report.failed += 1;
                    #[cfg(feature = "tracing")]
                    tracing::warn!(lease_id = h.lease.id(), error = %_e, "lease renewal failed");
                }
            }
        }

        held.retain(|h| {
            let keep = h.lease.is_safe(now, safety);
            if !keep {
                report.dropped += 1;
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    lease_id = h.lease.id(),
                    expires_at = h.lease.expires_at(),
                    "dropping lease inside safety margin"
                );
            }
            keep
        });
        drop(held);

        shared.idle.lock().retain(|s| s.is_usable(now, safety));
        report
    }

    /// Stops the renewal worker and waits for it to exit.
    ///
    /// Held leases are left to expire in the store. Generators keep working
    /// until their leases reach the safety margin.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let handle = self.inner.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(_e) = handle.await {
                #[cfg(feature = "tracing")]
                tracing::error!("renewal worker ended abnormally: {_e}");
            }
        }
    }

    pub(crate) fn now(&self) -> i64 {
        self.inner.time.unix_secs()
    }

    pub(crate) fn safety_secs(&self) -> i64 {
        self.inner.config.safety_secs()
    }

    /// Hands out a source, preferring the idle pool over a fresh node ID.
    pub(crate) async fn acquire_source(&self, now: i64) -> Result<Arc<Source>> {
        if let Some(source) = self.take_idle(now) {
            return Ok(source);
        }
        self.new_source().await
    }

    /// Returns sources to the idle pool, discarding any whose lease is
    /// already inside the safety margin.
    pub(crate) fn release_sources(&self, sources: impl IntoIterator<Item = Arc<Source>>) {
        let now = self.now();
        let safety = self.safety_secs();
        let mut idle = self.inner.idle.lock();
        idle.extend(sources.into_iter().filter(|s| s.is_usable(now, safety)));
    }

    fn take_idle(&self, now: i64) -> Option<Arc<Source>> {
        let safety = self.safety_secs();
        let mut idle = self.inner.idle.lock();
        while let Some(source) = idle.pop() {
            if source.is_usable(now, safety) {
                return Some(source);
            }
        }
        None
    }

    /// Binds the lowest free node ID of any safe held lease, claiming a new
    /// lease when all of them are full.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub(crate) async fn new_source(&self) -> Result<Arc<Source>> {
        let shared = &*self.inner;
        let mut held = shared.leases.lock().await;
        loop {
            let now = shared.time.unix_secs();
            let safety = shared.config.safety_secs();
            for h in held.iter_mut() {
                if !h.lease.is_safe(now, safety) {
                    continue;
                }
                if let Some(offset) = h.nodes.take_first() {
                    let node_id = h.lease.range_start() + offset as i64;
                    return Ok(Arc::new(Source::new(Arc::clone(&h.lease), node_id)));
                }
            }

            let lease = claim_lease(&shared.store, &shared.time, shared.holder, &shared.config).await?;
            held.push(HeldLease::new(lease));
        }
    }

    pub(crate) const fn from_shared(inner: Arc<Shared<S, T>>) -> Self {
        Self { inner }
    }
}

impl<S, T> Clone for RandFlake<S, T>
where
    S: LeaseStore,
    T: TimeSource,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, T> core::fmt::Debug for RandFlake<S, T>
where
    S: LeaseStore,
    T: TimeSource,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RandFlake")
            .field("holder", &self.inner.holder)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl<S, T> Shared<S, T> {
    pub(crate) const fn renewal_interval(&self) -> core::time::Duration {
        self.config.renewal_interval
    }

    pub(crate) const fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }
}

impl<S, T> Drop for Shared<S, T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl HeldLease {
    fn new(lease: Lease) -> Self {
        let nodes = NodeSet::new(lease.size() as usize);
        Self {
            lease: Arc::new(lease),
            nodes,
        }
    }
}
