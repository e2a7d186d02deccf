//! Error handling for the identity resolution engine
//!
//! This module provides idiomatic Rust error types using thiserror.
//! The taxonomy follows the failure classes of the engine: malformed
//! candidates (dropped per-candidate, never fatal to a signal), lock
//! contention (transient, retried), and merge invariant violations
//! (detected before commit, retried against the redirect target).

use thiserror::Error;
use uuid::Uuid;

/// Main error type for the resolution engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    #[error("merge error: {0}")]
    Merge(#[from] MergeError),

    #[error("actor {actor_id} not found")]
    ActorNotFound { actor_id: Uuid },

    #[error("actor {actor_id} does not belong to brand {brand_id}")]
    TenantMismatch { actor_id: Uuid, brand_id: Uuid },

    #[error("actor {actor_id} is tombstoned (redirects to {into})")]
    ActorTombstoned { actor_id: Uuid, into: Uuid },

    #[error("redirect chain for actor {actor_id} exceeded depth {depth}")]
    RedirectCycle { actor_id: Uuid, depth: usize },
}

/// Per-candidate normalization failures.
///
/// These never fail a whole signal: the extractor drops the offending
/// candidate and logs at debug level.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CandidateError {
    #[error("empty value after normalization")]
    Empty,

    #[error("phone has {digits} digits, outside the plausible 7..=15 range")]
    PhoneLength { digits: usize },

    #[error("'{value}' is not a plausible email address")]
    EmailShape { value: String },

    #[error("handle '{value}' contains no word characters")]
    HandleShape { value: String },
}

/// Keyed-lock acquisition failures.
///
/// Timeouts are transient: the caller may safely re-submit the signal
/// because resolution is idempotent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("timed out acquiring lock {key:#018x} after {attempts} attempts")]
    Timeout { key: u64, attempts: u32 },
}

/// Merge invariant violations, detected before any state is mutated
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    #[error("cannot merge actor {actor_id} with itself")]
    SelfMerge { actor_id: Uuid },

    #[error("actors {primary} and {merged} belong to different brands")]
    CrossTenant { primary: Uuid, merged: Uuid },

    #[error("merge source {actor_id} was already absorbed into {into}")]
    SourceTombstoned { actor_id: Uuid, into: Uuid },

    #[error("merge target {actor_id} was already absorbed into {into}")]
    TargetTombstoned { actor_id: Uuid, into: Uuid },

    #[error("actor {actor_id} not found")]
    ActorNotFound { actor_id: Uuid },

    #[error("merge aborted: {reason}")]
    Aborted { reason: String },
}

/// Result type aliases for convenience
pub type EngineResult<T> = Result<T, EngineError>;
pub type MergeResult<T> = Result<T, MergeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_error_display() {
        let err = LockError::Timeout {
            key: 0xdead,
            attempts: 10,
        };
        assert!(err.to_string().contains("10 attempts"));
    }

    #[test]
    fn test_merge_error_wraps_into_engine_error() {
        let id = Uuid::new_v4();
        let err: EngineError = MergeError::SelfMerge { actor_id: id }.into();
        assert!(matches!(err, EngineError::Merge(MergeError::SelfMerge { .. })));
    }
}
