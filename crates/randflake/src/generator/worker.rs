//! Background lease upkeep.
//!
//! One task per [`RandFlake`] ticks every `renewal_interval` and runs
//! [`RandFlake::maintain_leases`]. The task only holds a weak reference
//! between ticks, so dropping the last handle also ends the loop. A pass in
//! progress is abandoned on cancellation.

use std::sync::Arc;

use tokio::{
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};

use crate::{
    generator::{RandFlake, randflake::Shared},
    store::LeaseStore,
    time::TimeSource,
};

pub(crate) fn spawn<S, T>(shared: &Arc<Shared<S, T>>) -> JoinHandle<()>
where
    S: LeaseStore,
    T: TimeSource,
{
    let weak = Arc::downgrade(shared);
    let token = shared.shutdown_token().clone();
    let period = shared.renewal_interval();

    tokio::spawn(async move {
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(shared) = weak.upgrade() else { break };
                    let randflake = RandFlake::from_shared(shared);
                    // A pass can stall on repeated conflicts; shutdown must not wait on it.
                    tokio::select! {
                        () = token.cancelled() => break,
                        _report = randflake.maintain_leases() => {
                            #[cfg(feature = "tracing")]
                            {
                                if _report != Default::default() {
                                    tracing::debug!(report = ?_report, "lease upkeep");
                                }
                            }
                        }
                    }
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("renewal worker stopped");
    })
}
