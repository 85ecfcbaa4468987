use core::{pin::pin, ptr};
use std::sync::Arc;

use portable_atomic::{AtomicPtr, AtomicUsize, Ordering};
use tokio::sync::{Mutex, Notify};
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    Error, Result,
    generator::{RandFlake, Source},
    id::RandflakeId,
    store::LeaseStore,
    time::{SystemClock, TimeSource},
};

type Snapshot = Vec<Arc<Source>>;

/// A handle that serves IDs to any number of concurrent callers.
///
/// The generator draws from an append-only list of [`Source`]s. Callers walk
/// the current list without locking and take the first source with capacity.
/// Only when every source is exhausted for the current second does a caller
/// take the setup lock and publish a longer list. An older list is freed
/// once no caller besides the publishing one is in flight, so a caller still
/// walking it is never left with a dangling reference.
///
/// Closing (or dropping) the generator returns its sources to the
/// [`RandFlake`] idle pool for reuse by the next generator.
pub struct Generator<S, T = SystemClock>
where
    S: LeaseStore,
    T: TimeSource,
{
    randflake: RandFlake<S, T>,
    /// Points into the last element of `Setup::snapshots`, or null.
    sources: AtomicPtr<Snapshot>,
    in_flight: AtomicUsize,
    drained: Notify,
    setup: Mutex<Setup>,
}

#[derive(Default)]
struct Setup {
    closed: bool,
    snapshots: Vec<Arc<Snapshot>>,
}

/// Counts a call as in flight for as long as it lives.
struct InFlight<'a> {
    in_flight: &'a AtomicUsize,
    drained: &'a Notify,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }
}

impl<S, T> Generator<S, T>
where
    S: LeaseStore,
    T: TimeSource,
{
    /// Creates an empty generator. No source is bound until the first call.
    ///
    /// Prefer [`RandFlake::new_generator`], which also validates the setup.
    pub fn new(randflake: RandFlake<S, T>) -> Self {
        Self {
            randflake,
            sources: AtomicPtr::new(ptr::null_mut()),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
            setup: Mutex::new(Setup::default()),
        }
    }

    /// Returns an encrypted ID.
    ///
    /// # Errors
    ///
    /// See [`Generator::next_id`].
    pub async fn generate(&self) -> Result<i64> {
        let id = self.next_id().await?;
        Ok(self.randflake.encrypt(id.into()))
    }

    /// Returns a raw, structured ID.
    ///
    /// # Errors
    ///
    /// See [`Generator::next_id`].
    pub async fn generate_unencrypted(&self) -> Result<i64> {
        Ok(self.next_id().await?.into())
    }

    /// Returns `(raw, encrypted)` for a single generated ID.
    ///
    /// # Errors
    ///
    /// See [`Generator::next_id`].
    pub async fn generate_pair(&self) -> Result<(i64, i64)> {
        let raw: i64 = self.next_id().await?.into();
        Ok((raw, self.randflake.encrypt(raw)))
    }

    /// Returns the next structured ID.
    ///
    /// # Errors
    ///
    /// - [`Error::Closed`] after [`Generator::close`].
    /// - [`Error::Dead`] or [`Error::ClockBeforeEpoch`] from any source; the
    ///   generator cannot recover.
    /// - [`Error::ResourceExhausted`] if a new source was needed and the
    ///   node-ID space is fully leased.
    /// - Store errors raised while claiming a new lease.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub async fn next_id(&self) -> Result<RandflakeId> {
        let guard = self.enter();
        loop {
            let Some(snapshot) = self.snapshot(&guard) else {
                self.grow(ptr::null::<Snapshot>() as usize).await?;
                continue;
            };

            let now = self.randflake.now();
            let safety = self.randflake.safety_secs();
            for source in snapshot {
                match source.try_next_id(now, safety) {
                    Ok(id) => return Ok(id),
                    Err(Error::ResourceExhausted) => continue,
                    Err(e) => return Err(e),
                }
            }

            self.grow(ptr::from_ref(snapshot) as usize).await?;
        }
    }

    /// Number of sources bound to this generator.
    pub fn sources(&self) -> usize {
        let guard = self.enter();
        self.snapshot(&guard).map_or(0, Vec::len)
    }

    /// Stops the generator and returns its sources to the idle pool.
    ///
    /// Calls already in progress are allowed to finish first. Later calls fail
    /// with [`Error::Closed`]. Closing twice is a no-op apart from waiting
    /// for in-flight calls again.
    pub async fn close(&self) {
        let last = {
            let mut setup = self.setup.lock().await;
            if setup.closed {
                None
            } else {
                setup.closed = true;
                self.sources.store(ptr::null_mut(), Ordering::SeqCst);
                Some(setup.snapshots.last().cloned())
            }
        };

        self.wait_drained().await;

        if let Some(last) = last {
            self.setup.lock().await.snapshots.clear();
            if let Some(sources) = last {
                #[cfg(feature = "tracing")]
                tracing::debug!(sources = sources.len(), "generator closed");
                self.randflake.release_sources(sources.iter().cloned());
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn retained_snapshots(&self) -> usize {
        self.setup.lock().await.snapshots.len()
    }

    fn enter(&self) -> InFlight<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlight {
            in_flight: &self.in_flight,
            drained: &self.drained,
        }
    }

    fn snapshot<'a>(&'a self, _guard: &'a InFlight<'a>) -> Option<&'a Snapshot> {
        let current = self.sources.load(Ordering::SeqCst);
        // SAFETY: a non-null pointer always comes from an `Arc<Snapshot>` in
        // `Setup::snapshots`. `close` nulls the pointer before it waits for
        // `in_flight` to reach zero, and only then clears the snapshots.
        // `grow` frees a replaced snapshot only while its own caller is the
        // sole one in flight, and that caller never reads it again. A
        // snapshot loaded while holding `_guard` therefore outlives the guard.
        unsafe { current.as_ref() }
    }

    async fn wait_drained(&self) {
        loop {
            let mut notified = pin!(self.drained.notified());
            notified.as_mut().enable();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Appends one source, unless another caller already replaced
    /// `expected` in the meantime.
    ///
    /// Must be called from inside [`Generator::enter`]. `expected` is a bare
    /// address because the snapshot behind it may be freed before this
    /// returns (and a raw pointer held across `.await` would make the
    /// future `!Send`); it is only ever compared, never dereferenced.
    async fn grow(&self, expected: usize) -> Result<()> {
        let mut setup = self.setup.lock().await;
        if setup.closed {
            return Err(Error::Closed);
        }
        if self.sources.load(Ordering::SeqCst) as usize != expected {
            return Ok(());
        }

        let source = self.randflake.acquire_source(self.randflake.now()).await?;
        let mut next: Snapshot = setup
            .snapshots
            .last()
            .map(|s| s.as_ref().clone())
            .unwrap_or_default();
        next.push(source);
        #[cfg(feature = "tracing")]
        let bound = next.len();
        let next = Arc::new(next);
        let next_ptr = Arc::as_ptr(&next).cast_mut();
        setup.snapshots.push(next);

        if self
            .sources
            .compare_exchange(
                expected as *mut Snapshot,
                next_ptr,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            // Unreachable while `setup` is held.
            #[cfg(feature = "tracing")]
            tracing::error!("generator sources changed under the setup lock");
            if let Some(stale) = setup.snapshots.pop() {
                self.randflake.release_sources(stale.last().cloned());
            }
            return Ok(());
        }

        // Callers entering from here on load `next_ptr`. If nobody else is in
        // flight, nobody can still be walking an older snapshot.
        if self.in_flight.load(Ordering::SeqCst) == 1 {
            let stale = setup.snapshots.len() - 1;
            setup.snapshots.drain(..stale);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(sources = bound, "generator grew");
        Ok(())
    }
}

impl<S, T> Drop for Generator<S, T>
where
    S: LeaseStore,
    T: TimeSource,
{
    fn drop(&mut self) {
        let setup = self.setup.get_mut();
        if setup.closed {
            return;
        }
        setup.closed = true;
        if let Some(last) = setup.snapshots.last() {
            self.randflake.release_sources(last.iter().cloned());
        }
    }
}

impl<S, T> core::fmt::Debug for Generator<S, T>
where
    S: LeaseStore,
    T: TimeSource,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Generator")
            .field("sources", &self.sources())
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

