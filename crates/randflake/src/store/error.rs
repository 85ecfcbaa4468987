/// Errors surfaced by a [`LeaseStore`](crate::LeaseStore) backend.
///
/// Only [`StoreError::Conflict`] is retried by the lease protocol. Anything
/// else is handed back to the caller untouched.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The transaction lost a serialization race (SQLSTATE `40001`).
    #[error("serialization conflict")]
    Conflict,

    /// Any other backend failure.
    #[error(transparent)]
    Backend(Box<dyn core::error::Error + Send + Sync>),
}

impl StoreError {
    /// Wraps an arbitrary backend error.
    pub fn backend(err: impl Into<Box<dyn core::error::Error + Send + Sync>>) -> Self {
        Self::Backend(err.into())
    }

    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict)
    }
}
