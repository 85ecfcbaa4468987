use crate::store::StoreError;

/// A result type defaulting to the crate-wide [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All possible errors that `randflake` can produce.
///
/// Errors fall into three classes:
///
/// - **Resource exhaustion** ([`Error::ResourceExhausted`]): transient. The
///   caller should retry shortly. The [`Generator`] already absorbs most of
///   these by growing its source list.
/// - **Fatal** ([`Error::Dead`], [`Error::ClockBeforeEpoch`],
///   [`Error::Closed`], [`Error::InvalidSecret`]): retrying the same call can
///   never succeed. See [`Error::is_fatal`].
/// - **Usage and store failures**: everything else, propagated unchanged.
///
/// [`Generator`]: crate::Generator
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// No capacity right now: the node-ID space is fully leased, a source's
    /// lease is inside its safety margin, or a source's per-second counter is
    /// saturated.
    #[error("randflake: resource exhausted")]
    ResourceExhausted,

    /// The 30-bit timestamp field can no longer represent the current time.
    #[error("randflake: the randflake is dead after 34 years of use")]
    Dead,

    /// The wall clock reads earlier than the randflake epoch.
    #[error("randflake: clock ({now}) is before the randflake epoch")]
    ClockBeforeEpoch { now: i64 },

    /// The cipher secret was not exactly 16 bytes long.
    #[error("randflake: invalid secret, secret must be 16 bytes long (got {len})")]
    InvalidSecret { len: usize },

    /// The generator was closed.
    #[error("randflake: closed")]
    Closed,

    /// A lease claim hit more serialization conflicts than configured.
    #[error("randflake: gave up after {attempts} conflicting lease attempts")]
    RetriesExhausted { attempts: u32 },

    /// A renewal matched no row: the lease expired or changed hands.
    #[error("randflake: lease {id} could not be renewed")]
    LeaseNotRenewed { id: i64 },

    /// A [`LeaseConfig`](crate::LeaseConfig) failed validation.
    #[error("randflake: invalid config: {reason}")]
    InvalidConfig { reason: String },

    /// The lease store failed with something other than a retryable conflict.
    #[error("randflake: store error: {0}")]
    Store(#[from] StoreError),
}

impl Error {
    /// Returns `true` when retrying can never succeed: the generator is past
    /// its horizon or behind the epoch, was closed, or was built with a bad
    /// secret.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Dead | Self::ClockBeforeEpoch { .. } | Self::Closed | Self::InvalidSecret { .. }
        )
    }

    /// Returns `true` for transient capacity errors the caller may retry.
    pub const fn is_exhausted(&self) -> bool {
        matches!(self, Self::ResourceExhausted)
    }
}
