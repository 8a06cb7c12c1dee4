//! In-memory recording broker driver for testing.
//!
//! Records every outbound call in order and can be armed to fail, which the
//! effect-router tests use to exercise the retry/backoff path.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: nothing is launched anywhere
//! - **No status feedback**: tests synthesize status updates themselves

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use bosun_core::{OfferId, TaskId};

use super::{BrokerDriver, OfferFilters, TaskInfo, TaskStatus};
use crate::error::{Error, Result};

/// One recorded outbound broker call.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerCall {
    /// An offer was accepted with the given launches.
    Accept {
        /// The accepted offer.
        offer_id: OfferId,
        /// The launched tasks.
        launches: Vec<TaskInfo>,
        /// The attached filters.
        filters: OfferFilters,
    },
    /// An offer was declined.
    Decline {
        /// The declined offer.
        offer_id: OfferId,
        /// The attached filters.
        filters: OfferFilters,
    },
    /// A task kill was issued.
    Kill {
        /// The killed task.
        task_id: TaskId,
    },
    /// An undecodable task was reaped.
    KillRaw {
        /// The raw task id.
        task_id: String,
    },
    /// Explicit reconciliation was requested.
    Reconcile {
        /// The queried statuses.
        statuses: Vec<TaskStatus>,
    },
}

/// Recording broker driver.
#[derive(Debug, Default)]
pub struct RecordingDriver {
    calls: Mutex<Vec<BrokerCall>>,
    failures_remaining: AtomicUsize,
}

fn poisoned<T>(_: PoisonError<T>) -> Error {
    Error::broker("recording driver lock poisoned")
}

impl RecordingDriver {
    /// Creates an empty recording driver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the driver to fail the next `n` calls with a broker error.
    pub fn fail_next(&self, n: usize) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Returns a copy of all recorded calls in order.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn calls(&self) -> Vec<BrokerCall> {
        self.calls.lock().expect("driver lock poisoned").clone()
    }

    /// Drops all recorded calls.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn clear(&self) {
        self.calls.lock().expect("driver lock poisoned").clear();
    }

    fn record(&self, call: BrokerCall) -> Result<()> {
        if self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::broker("injected transport failure"));
        }
        self.calls.lock().map_err(poisoned)?.push(call);
        Ok(())
    }
}

#[async_trait]
impl BrokerDriver for RecordingDriver {
    async fn accept_offer(
        &self,
        offer_id: &OfferId,
        launches: &[TaskInfo],
        filters: OfferFilters,
    ) -> Result<()> {
        self.record(BrokerCall::Accept {
            offer_id: offer_id.clone(),
            launches: launches.to_vec(),
            filters,
        })
    }

    async fn decline_offer(&self, offer_id: &OfferId, filters: OfferFilters) -> Result<()> {
        self.record(BrokerCall::Decline {
            offer_id: offer_id.clone(),
            filters,
        })
    }

    async fn kill_task(&self, task_id: &TaskId) -> Result<()> {
        self.record(BrokerCall::Kill { task_id: *task_id })
    }

    async fn kill_raw_task(&self, task_id: &str) -> Result<()> {
        self.record(BrokerCall::KillRaw {
            task_id: task_id.to_string(),
        })
    }

    async fn reconcile_tasks(&self, statuses: &[TaskStatus]) -> Result<()> {
        self.record(BrokerCall::Reconcile {
            statuses: statuses.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bosun_core::InstanceId;

    #[tokio::test]
    async fn records_calls_in_order() -> Result<()> {
        let driver = RecordingDriver::new();
        let offer = OfferId::new("offer-1");

        driver.decline_offer(&offer, OfferFilters::refuse(5.0)).await?;
        driver
            .kill_task(&TaskId::new(InstanceId::generate(), 1))
            .await?;

        let calls = driver.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(calls[0], BrokerCall::Decline { .. }));
        assert!(matches!(calls[1], BrokerCall::Kill { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn armed_failures_reject_then_recover() -> Result<()> {
        let driver = RecordingDriver::new();
        driver.fail_next(2);

        let offer = OfferId::new("offer-1");
        assert!(driver.decline_offer(&offer, OfferFilters::none()).await.is_err());
        assert!(driver.decline_offer(&offer, OfferFilters::none()).await.is_err());
        driver.decline_offer(&offer, OfferFilters::none()).await?;

        assert_eq!(driver.calls().len(), 1);
        Ok(())
    }
}
