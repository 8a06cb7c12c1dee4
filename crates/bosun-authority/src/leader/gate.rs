//! The leadership gate: activates and deactivates the authority pipeline on
//! leadership transitions.
//!
//! The gate owns the election loop. On acquisition it submits
//! `LeadershipAcquired` (which triggers journal replay inside the pipeline)
//! and kicks off the tracker's explicit broker reconciliation; it then
//! renews the lease until renewal fails, at which point it submits
//! `LeadershipLost` and re-enters the election loop. On shutdown it releases
//! the lease for fast failover.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::{LeaderElector, LeadershipResult, RenewalResult};
use crate::authority::AuthorityHandle;
use crate::error::Result;
use crate::protocol::InputEvent;
use crate::tracker::InstanceTracker;

/// Lock key the authority contends on.
const LOCK_KEY: &str = "authority";

/// How long to wait between acquisition attempts while another process
/// leads.
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Supervises leadership for one scheduler process.
pub struct LeadershipGate {
    elector: Arc<dyn LeaderElector>,
    authority: AuthorityHandle,
    tracker: Arc<InstanceTracker>,
    instance_id: String,
}

impl LeadershipGate {
    /// Creates a gate for this process.
    ///
    /// `instance_id` identifies the process to the election backend
    /// (hostname + pid in the binary, fixed strings in tests).
    #[must_use]
    pub fn new(
        elector: Arc<dyn LeaderElector>,
        authority: AuthorityHandle,
        tracker: Arc<InstanceTracker>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            elector,
            authority,
            tracker,
            instance_id: instance_id.into(),
        }
    }

    /// Runs the election loop until `shutdown` flips to true.
    ///
    /// # Errors
    ///
    /// Returns an error when the election backend fails irrecoverably; the
    /// caller escalates to the crash strategy.
    #[tracing::instrument(skip(self, shutdown), fields(instance = %self.instance_id))]
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            match self
                .elector
                .try_acquire(LOCK_KEY, &self.instance_id)
                .await?
            {
                LeadershipResult::Acquired {
                    lease_token,
                    lease_duration,
                    fencing_token,
                } => {
                    tracing::info!(fencing_token, "leadership acquired");
                    if self
                        .authority
                        .send(InputEvent::LeadershipAcquired { fencing_token })
                        .await
                        .is_err()
                    {
                        // Pipeline is gone; nothing left to lead.
                        return Ok(());
                    }
                    if let Err(err) = self.tracker.reconcile_on_acquisition().await {
                        tracing::warn!(error = %err, "explicit reconciliation failed");
                    }

                    let released = self
                        .hold_lease(&lease_token, lease_duration, &mut shutdown)
                        .await?;
                    if released {
                        return Ok(());
                    }
                }
                LeadershipResult::NotLeader { current_leader } => {
                    tracing::debug!(leader = ?current_leader, "not leader, waiting");
                    tokio::select! {
                        () = tokio::time::sleep(RETRY_INTERVAL) => {}
                        changed = shutdown.changed() => {
                            // A dropped sender means no one is left to lead for.
                            if changed.is_err() {
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    }

    /// Renews the lease until it is lost or shutdown is requested.
    ///
    /// Returns `true` when the gate released the lease for shutdown, `false`
    /// when leadership was lost and the election loop should resume.
    async fn hold_lease(
        &self,
        lease_token: &str,
        lease_duration: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<bool> {
        // Renew at a third of the lease to survive transient backend slowness.
        let renew_interval = lease_duration / 3;

        loop {
            let mut shutdown_requested = false;
            tokio::select! {
                () = tokio::time::sleep(renew_interval) => {}
                changed = shutdown.changed() => {
                    shutdown_requested = changed.is_err() || *shutdown.borrow();
                }
            }

            if shutdown_requested || *shutdown.borrow() {
                let _ = self.elector.release(LOCK_KEY, lease_token).await;
                let _ = self.authority.send(InputEvent::LeadershipLost).await;
                tracing::info!("lease released for shutdown");
                return Ok(true);
            }

            match self.elector.renew(LOCK_KEY, lease_token).await? {
                RenewalResult::Renewed { .. } => {}
                RenewalResult::Lost | RenewalResult::InvalidToken => {
                    tracing::warn!("lease renewal failed, leadership lost");
                    let _ = self.authority.send(InputEvent::LeadershipLost).await;
                    return Ok(false);
                }
            }
        }
    }
}
