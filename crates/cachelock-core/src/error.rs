//! Error types for `cachelock`.
//!
//! Contention is not an error: a lock attempt that loses a race is reported
//! through [`LockAttempt::Contended`](crate::LockAttempt::Contended) and
//! retried internally. The variants here are what escapes to the caller.

use thiserror::Error;

use crate::key::IdentityKey;

/// Result type alias for `cachelock` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while locking cache entries.
///
/// Error codes follow the pattern `CLK-XXX`.
#[derive(Error, Debug)]
pub enum Error {
    /// Clone retry bound exceeded (CLK-001).
    ///
    /// The graph walk for a clone kept hitting contention. This signals a
    /// held lock that is never released or pathological cache thrash.
    #[error("[CLK-001] Max tries ({tries}) exceeded acquiring clone locks for {root}")]
    MaxTriesOnClone {
        /// Identity of the clone root.
        root: IdentityKey,
        /// Number of attempts made.
        tries: usize,
    },

    /// Merge append retry bound exceeded (CLK-002).
    #[error("[CLK-002] Max tries ({tries}) exceeded appending merge lock for {key}")]
    MaxTriesOnMerge {
        /// Identity that could not be locked.
        key: IdentityKey,
        /// Number of attempts made.
        tries: usize,
    },

    /// A blocking wait was interrupted while the registry shuts down (CLK-003).
    #[error("[CLK-003] Wait on {0} was interrupted by shutdown")]
    WaitInterrupted(IdentityKey),

    /// Payload mutated without holding the entry mutex (CLK-004).
    #[error("[CLK-004] Current thread does not hold the lock on {0}")]
    NotLockOwner(IdentityKey),

    /// No descriptor registered for an entity type (CLK-005).
    #[error("[CLK-005] No descriptor registered for entity type '{0}'")]
    MissingDescriptor(String),

    /// Configuration error (CLK-006).
    #[error("[CLK-006] Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Returns the error code (e.g., "CLK-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MaxTriesOnClone { .. } => "CLK-001",
            Self::MaxTriesOnMerge { .. } => "CLK-002",
            Self::WaitInterrupted(_) => "CLK-003",
            Self::NotLockOwner(_) => "CLK-004",
            Self::MissingDescriptor(_) => "CLK-005",
            Self::Config(_) => "CLK-006",
        }
    }

    /// Returns true if retrying the operation later can succeed.
    ///
    /// Exhausted retry bounds are recoverable once the contention clears;
    /// ownership and setup mistakes are not.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MaxTriesOnClone { .. } | Self::MaxTriesOnMerge { .. } | Self::WaitInterrupted(_)
        )
    }
}

impl From<crate::config::ConfigError> for Error {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
