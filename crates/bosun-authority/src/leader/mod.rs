//! Leader election for the state authority.
//!
//! The [`LeaderElector`] trait provides a pluggable mechanism for leader
//! election, separate from journal concerns. This separation enables:
//!
//! - **Testing**: use [`memory::InMemoryLeaderElector`] for unit tests and
//!   the single-process pseudo-leader mode
//! - **Production**: back it with the persistence coordinator's fenced
//!   leases
//!
//! ## Design Principles
//!
//! - **Leases, not locks**: leaders hold time-bounded leases and must renew
//!   or lose leadership
//! - **Fencing tokens**: every acquisition carries a monotonically
//!   increasing token; a stale leader's writes can be rejected downstream
//! - **Graceful handoff**: leaders release on orderly shutdown
//!
//! ## Safety
//!
//! The source must guarantee at most one process observes "acquired" at any
//! wall-clock instant, modulo bounded clock skew handled by its own fencing.
//! The authority pipeline is only active between `LeadershipAcquired` and
//! `LeadershipLost` input events derived from this trait.

pub mod gate;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Result of a leadership acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeadershipResult {
    /// Successfully acquired leadership.
    Acquired {
        /// Lease token used for renewal and release.
        lease_token: String,
        /// Duration until the lease expires without renewal.
        lease_duration: Duration,
        /// Monotonic token proving this leadership term.
        fencing_token: u64,
    },
    /// Leadership is held by another instance.
    NotLeader {
        /// Identifier of the current leader, if known.
        current_leader: Option<String>,
    },
}

impl LeadershipResult {
    /// Returns true if leadership was acquired.
    #[must_use]
    pub const fn is_leader(&self) -> bool {
        matches!(self, Self::Acquired { .. })
    }

    /// Returns the fencing token if leadership was acquired.
    #[must_use]
    pub const fn fencing_token(&self) -> Option<u64> {
        match self {
            Self::Acquired { fencing_token, .. } => Some(*fencing_token),
            Self::NotLeader { .. } => None,
        }
    }
}

/// Result of a lease renewal attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalResult {
    /// Successfully renewed the lease.
    Renewed {
        /// New lease duration.
        lease_duration: Duration,
    },
    /// Lease has expired or was taken by another leader.
    Lost,
    /// The provided lease token is invalid.
    InvalidToken,
}

impl RenewalResult {
    /// Returns true if the lease was successfully renewed.
    #[must_use]
    pub const fn is_renewed(&self) -> bool {
        matches!(self, Self::Renewed { .. })
    }
}

/// Leader election abstraction.
///
/// All methods are `Send + Sync` to support concurrent access from async
/// tasks.
#[async_trait]
pub trait LeaderElector: Send + Sync {
    /// Attempts to acquire leadership for a lock key.
    ///
    /// # Errors
    ///
    /// Returns an error when the election backend is unreachable.
    async fn try_acquire(&self, lock_key: &str, instance_id: &str) -> Result<LeadershipResult>;

    /// Renews an existing lease. Must be called before expiry to keep
    /// leadership.
    ///
    /// # Errors
    ///
    /// Returns an error when the election backend is unreachable.
    async fn renew(&self, lock_key: &str, lease_token: &str) -> Result<RenewalResult>;

    /// Voluntarily releases leadership for faster failover on shutdown.
    ///
    /// Returns `true` when the lease was released, `false` when it had
    /// already expired or belongs to someone else.
    ///
    /// # Errors
    ///
    /// Returns an error when the election backend is unreachable.
    async fn release(&self, lock_key: &str, lease_token: &str) -> Result<bool>;

    /// Returns the current leader for a lock key, if any.
    ///
    /// # Errors
    ///
    /// Returns an error when the election backend is unreachable.
    async fn current_leader(&self, lock_key: &str) -> Result<Option<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leadership_result_exposes_fencing_token() {
        let acquired = LeadershipResult::Acquired {
            lease_token: "token".to_string(),
            lease_duration: Duration::from_secs(30),
            fencing_token: 41,
        };
        assert!(acquired.is_leader());
        assert_eq!(acquired.fencing_token(), Some(41));

        let not_leader = LeadershipResult::NotLeader {
            current_leader: Some("other".to_string()),
        };
        assert!(!not_leader.is_leader());
        assert_eq!(not_leader.fencing_token(), None);
    }

    #[test]
    fn renewal_result_is_renewed() {
        assert!(RenewalResult::Renewed {
            lease_duration: Duration::from_secs(30),
        }
        .is_renewed());
        assert!(!RenewalResult::Lost.is_renewed());
        assert!(!RenewalResult::InvalidToken.is_renewed());
    }
}
