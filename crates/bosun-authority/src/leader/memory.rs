//! In-memory leader elector.
//!
//! Backs tests and the single-process pseudo-leader mode
//! (`highly-available = false`): the sole process always wins the election
//! and fencing tokens still increase per term.
//!
//! ## Limitations
//!
//! - **Single-process only**: leadership is not shared across process
//!   boundaries
//! - **No persistence**: all leases are lost when the process exits

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ulid::Ulid;

use super::{LeaderElector, LeadershipResult, RenewalResult};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
struct Lease {
    instance_id: String,
    token: String,
    fencing_token: u64,
    expires_at: DateTime<Utc>,
}

/// In-memory leader elector.
#[derive(Debug)]
pub struct InMemoryLeaderElector {
    leases: RwLock<HashMap<String, Lease>>,
    lease_duration: Duration,
    next_fencing_token: AtomicU64,
}

impl Default for InMemoryLeaderElector {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::journal("elector lock poisoned")
}

impl InMemoryLeaderElector {
    /// Creates an elector with the given lease duration.
    #[must_use]
    pub fn new(lease_duration: Duration) -> Self {
        Self {
            leases: RwLock::new(HashMap::new()),
            lease_duration,
            next_fencing_token: AtomicU64::new(1),
        }
    }

    fn generate_token() -> String {
        Ulid::new().to_string()
    }

    fn expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::from_std(self.lease_duration)
            .unwrap_or_else(|_| chrono::Duration::seconds(30))
    }
}

#[async_trait]
impl LeaderElector for InMemoryLeaderElector {
    async fn try_acquire(&self, lock_key: &str, instance_id: &str) -> Result<LeadershipResult> {
        let mut leases = self.leases.write().map_err(poison_err)?;
        let now = Utc::now();

        if let Some(lease) = leases.get(lock_key) {
            if lease.expires_at > now && lease.instance_id != instance_id {
                let current_leader = lease.instance_id.clone();
                drop(leases);
                return Ok(LeadershipResult::NotLeader {
                    current_leader: Some(current_leader),
                });
            }
        }

        // New term: expired, unheld, or a re-acquisition by the same
        // instance. Every term gets a fresh fencing token.
        let fencing_token = self.next_fencing_token.fetch_add(1, Ordering::SeqCst);
        let lease = Lease {
            instance_id: instance_id.to_string(),
            token: Self::generate_token(),
            fencing_token,
            expires_at: self.expiry(now),
        };
        let token = lease.token.clone();
        leases.insert(lock_key.to_string(), lease);
        drop(leases);

        Ok(LeadershipResult::Acquired {
            lease_token: token,
            lease_duration: self.lease_duration,
            fencing_token,
        })
    }

    async fn renew(&self, lock_key: &str, lease_token: &str) -> Result<RenewalResult> {
        let mut leases = self.leases.write().map_err(poison_err)?;
        let now = Utc::now();

        let Some(lease) = leases.get_mut(lock_key) else {
            drop(leases);
            return Ok(RenewalResult::Lost);
        };
        if lease.token != lease_token {
            drop(leases);
            return Ok(RenewalResult::InvalidToken);
        }
        if lease.expires_at <= now {
            drop(leases);
            return Ok(RenewalResult::Lost);
        }

        lease.expires_at = self.expiry(now);
        drop(leases);

        Ok(RenewalResult::Renewed {
            lease_duration: self.lease_duration,
        })
    }

    async fn release(&self, lock_key: &str, lease_token: &str) -> Result<bool> {
        let mut leases = self.leases.write().map_err(poison_err)?;

        let Some(lease) = leases.get(lock_key) else {
            drop(leases);
            return Ok(false);
        };
        if lease.token != lease_token {
            drop(leases);
            return Ok(false);
        }

        leases.remove(lock_key);
        drop(leases);
        Ok(true)
    }

    async fn current_leader(&self, lock_key: &str) -> Result<Option<String>> {
        let leases = self.leases.read().map_err(poison_err)?;
        let now = Utc::now();
        let result = leases.get(lock_key).and_then(|lease| {
            if lease.expires_at > now {
                Some(lease.instance_id.clone())
            } else {
                None
            }
        });
        drop(leases);
        Ok(result)
    }
}
