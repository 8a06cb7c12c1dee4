//! The instance tracker: broker task statuses in, `StatusUpdate` events out.
//!
//! Responsibilities beyond plain translation:
//!
//! - **Debouncing**: status floods for one instance collapse to the last
//!   condition seen within a 100 ms window, so equivalent transitions don't
//!   hammer the authority
//! - **Explicit reconciliation**: on leadership acquisition the tracker asks
//!   the broker about every non-terminal instance; anything the broker no
//!   longer knows is driven to condition=Gone
//! - **Orphan reaping**: task ids that don't decode to one of our instances
//!   get a best-effort kill

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bosun_core::InstanceId;

use crate::authority::AuthorityHandle;
use crate::broker::{BrokerDriver, TaskStatus};
use crate::error::Result;
use crate::instance::Condition;
use crate::protocol::InputEvent;
use crate::snapshot::SnapshotCell;

/// Debounce window per instance.
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

struct PendingUpdate {
    event: InputEvent,
    flusher_armed: bool,
}

/// Translates broker task statuses into authority input events.
pub struct InstanceTracker {
    authority: AuthorityHandle,
    driver: Arc<dyn BrokerDriver>,
    snapshots: SnapshotCell,
    pending: Mutex<HashMap<InstanceId, PendingUpdate>>,
    debounce: Duration,
}

impl InstanceTracker {
    /// Creates a tracker with the standard debounce window.
    #[must_use]
    pub fn new(
        authority: AuthorityHandle,
        driver: Arc<dyn BrokerDriver>,
        snapshots: SnapshotCell,
    ) -> Arc<Self> {
        Self::with_debounce(authority, driver, snapshots, DEBOUNCE_WINDOW)
    }

    /// Creates a tracker with a custom debounce window (tests shrink it).
    #[must_use]
    pub fn with_debounce(
        authority: AuthorityHandle,
        driver: Arc<dyn BrokerDriver>,
        snapshots: SnapshotCell,
        debounce: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            authority,
            driver,
            snapshots,
            pending: Mutex::new(HashMap::new()),
            debounce,
        })
    }

    /// Ingests one broker task status.
    ///
    /// Decodable statuses are debounced per instance and forwarded as
    /// `StatusUpdate` events; undecodable ones are orphans and reaped.
    #[tracing::instrument(skip(self, status), fields(task = %status.task_id, state = ?status.state))]
    pub async fn handle_status(self: &Arc<Self>, status: TaskStatus) {
        let Some((instance_id, incarnation)) = status.decode() else {
            tracing::info!("undecodable task id, reaping orphan");
            if let Err(err) = self.driver.kill_raw_task(&status.task_id).await {
                tracing::warn!(error = %err, "orphan kill failed");
            }
            return;
        };

        let event = InputEvent::StatusUpdate {
            instance_id,
            incarnation,
            condition: status.state.to_condition(),
            agent_id: status.agent_id.clone(),
            timestamp: status.timestamp,
        };

        let arm_flusher = {
            let mut pending = self
                .pending
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            match pending.get_mut(&instance_id) {
                Some(slot) => {
                    // Collapse to the newest condition in the window.
                    slot.event = event;
                    !slot.flusher_armed
                }
                None => {
                    pending.insert(
                        instance_id,
                        PendingUpdate {
                            event,
                            flusher_armed: true,
                        },
                    );
                    true
                }
            }
        };

        if arm_flusher {
            let tracker = Arc::clone(self);
            tokio::spawn(async move {
                tracker.flush_after_window(instance_id).await;
            });
        }
    }

    async fn flush_after_window(self: Arc<Self>, instance_id: InstanceId) {
        tokio::time::sleep(self.debounce).await;

        let event = {
            let mut pending = self
                .pending
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            pending.remove(&instance_id).map(|slot| slot.event)
        };
        let Some(event) = event else {
            return;
        };

        if let Err(rejection) = self.authority.try_submit(event) {
            // The broker re-delivers unacknowledged statuses and explicit
            // reconciliation sweeps the rest; dropping here is safe.
            tracing::warn!(instance = %instance_id, %rejection, "status update not submitted");
        }
    }

    /// Issues the bulk explicit reconciliation request for every
    /// non-terminal instance in the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns a broker error when the reconcile call fails.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_on_acquisition(&self) -> Result<()> {
        let snapshot = self.snapshots.load();
        let queries: Vec<TaskStatus> = snapshot
            .instances()
            .filter(|instance| !instance.is_terminal())
            .map(|instance| TaskStatus::query(instance.task_id(), instance.agent_id.clone()))
            .collect();

        if queries.is_empty() {
            return Ok(());
        }
        tracing::info!(tasks = queries.len(), "requesting explicit reconciliation");
        self.driver.reconcile_tasks(&queries).await
    }

    /// Marks every non-terminal instance the broker did not report as Gone.
    ///
    /// `known` is the set of instances the broker acknowledged in the
    /// reconciliation response.
    pub fn mark_unreported_gone(&self, known: &HashSet<InstanceId>) {
        let snapshot = self.snapshots.load();
        for instance in snapshot.instances() {
            if instance.is_terminal() || known.contains(&instance.id) {
                continue;
            }
            tracing::info!(instance = %instance.id, "broker does not know instance, marking gone");
            let event = InputEvent::StatusUpdate {
                instance_id: instance.id,
                incarnation: instance.incarnation,
                condition: Condition::Gone,
                agent_id: instance.agent_id.clone(),
                timestamp: chrono::Utc::now(),
            };
            if let Err(rejection) = self.authority.try_submit(event) {
                tracing::warn!(instance = %instance.id, %rejection, "gone marker not submitted");
            }
        }
    }
}
