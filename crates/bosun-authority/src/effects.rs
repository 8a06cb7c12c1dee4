//! The effect router: drives emitted effects into the outside world.
//!
//! Consumes the authority's ordered effect stream and:
//!
//! - batches `LaunchTask` runs into the single `AcceptOffer` broker call
//!   that follows them (effects from one command are contiguous)
//! - retries broker transport failures with bounded exponential backoff; a
//!   kill that never lands fails the instance, an accept that never lands
//!   rolls the reservation back
//! - routes command outcomes to registered requesters by request id
//! - fans notifications out to subscribers

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bosun_core::{InstanceId, RequestId};
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::authority::AuthorityHandle;
use crate::broker::{BrokerDriver, OfferFilters, TaskInfo};
use crate::error::Result;
use crate::instance::Condition;
use crate::protocol::{Command, Effect, InputEvent, Notification, Rejection};

/// The outcome of a submitted command, delivered to the requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The command committed durably.
    Accepted,
    /// The command was rejected; state is untouched.
    Failed(Rejection),
}

/// Registry pairing request ids with waiting requesters.
#[derive(Debug, Clone, Default)]
pub struct ResponseRegistry {
    waiters: Arc<Mutex<HashMap<RequestId, oneshot::Sender<CommandOutcome>>>>,
}

impl ResponseRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers interest in a request's outcome.
    #[must_use]
    pub fn register(&self, request_id: RequestId) -> oneshot::Receiver<CommandOutcome> {
        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(request_id, tx);
        rx
    }

    fn resolve(&self, request_id: &RequestId, outcome: CommandOutcome) {
        let waiter = self
            .waiters
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(request_id);
        match waiter {
            Some(tx) => {
                // The requester may have given up; that's fine.
                let _ = tx.send(outcome);
            }
            None => {
                tracing::debug!(request = %request_id, ?outcome, "no waiter for command outcome");
            }
        }
    }
}

/// Retry schedule for broker calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// First backoff delay; doubles each attempt.
    pub initial_backoff: Duration,
    /// Ceiling for a single backoff delay.
    pub max_backoff: Duration,
    /// Total budget per effect before giving up.
    pub deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            deadline: Duration::from_secs(10),
        }
    }
}

/// Consumes the effect stream and performs the I/O.
pub struct EffectRouter {
    effects: mpsc::Receiver<Effect>,
    driver: Arc<dyn BrokerDriver>,
    authority: AuthorityHandle,
    responses: ResponseRegistry,
    notifications: broadcast::Sender<Notification>,
    retry: RetryPolicy,
    pending_launches: Vec<TaskInfo>,
}

impl EffectRouter {
    /// Creates a router consuming `effects`.
    ///
    /// Returns the router plus the response registry and notification sender
    /// shared with ingress surfaces.
    #[must_use]
    pub fn new(
        effects: mpsc::Receiver<Effect>,
        driver: Arc<dyn BrokerDriver>,
        authority: AuthorityHandle,
        retry: RetryPolicy,
    ) -> (Self, ResponseRegistry, broadcast::Sender<Notification>) {
        let responses = ResponseRegistry::new();
        let (notifications, _) = broadcast::channel(256);
        let router = Self {
            effects,
            driver,
            authority,
            responses: responses.clone(),
            notifications: notifications.clone(),
            retry,
            pending_launches: Vec::new(),
        };
        (router, responses, notifications)
    }

    /// Runs until the effect stream closes.
    ///
    /// # Errors
    ///
    /// Currently infallible at the loop level — individual effect failures
    /// are handled in place — but kept fallible for supervision symmetry.
    #[tracing::instrument(skip(self), name = "effect_router")]
    pub async fn run(mut self) -> Result<()> {
        while let Some(effect) = self.effects.recv().await {
            self.route(effect).await;
        }
        tracing::info!("effect stream closed, router stopping");
        Ok(())
    }

    async fn route(&mut self, effect: Effect) {
        match effect {
            Effect::CommandAccepted { request_id } => {
                self.responses.resolve(&request_id, CommandOutcome::Accepted);
            }
            Effect::CommandFailure {
                request_id,
                rejection,
            } => {
                self.responses
                    .resolve(&request_id, CommandOutcome::Failed(rejection));
            }
            Effect::LaunchTask { task, .. } => {
                // Held until the offer's accept arrives.
                self.pending_launches.push(task);
            }
            Effect::AcceptOffer {
                offer_id,
                refuse_seconds,
            } => {
                let launches = std::mem::take(&mut self.pending_launches);
                let instance_ids: Vec<InstanceId> = launches
                    .iter()
                    .map(|task| task.task_id.instance_id())
                    .collect();

                let outcome = self
                    .with_retries("accept_offer", || {
                        let driver = Arc::clone(&self.driver);
                        let offer_id = offer_id.clone();
                        let launches = launches.clone();
                        async move {
                            driver
                                .accept_offer(
                                    &offer_id,
                                    &launches,
                                    OfferFilters::refuse(refuse_seconds),
                                )
                                .await
                        }
                    })
                    .await;

                if outcome.is_err() {
                    tracing::warn!(offer = %offer_id, instances = instance_ids.len(), "accept failed, rolling reservation back");
                    let rollback = self.authority.try_submit(InputEvent::CommandRequest {
                        request_id: RequestId::generate(),
                        command: Command::ReleasePlacements { offer_id },
                    });
                    if let Err(rejection) = rollback {
                        tracing::error!(%rejection, "reservation rollback not submitted");
                    }
                }
            }
            Effect::DeclineOffer {
                offer_id,
                refuse_seconds,
            } => {
                let result = self
                    .with_retries("decline_offer", || {
                        let driver = Arc::clone(&self.driver);
                        let offer_id = offer_id.clone();
                        async move {
                            driver
                                .decline_offer(&offer_id, OfferFilters::refuse(refuse_seconds))
                                .await
                        }
                    })
                    .await;
                if result.is_err() {
                    // The offer times out broker-side on its own.
                    tracing::warn!(offer = %offer_id, "decline failed, letting offer expire");
                }
            }
            Effect::KillTask {
                instance_id,
                incarnation,
                task_id,
            } => {
                let result = self
                    .with_retries("kill_task", || {
                        let driver = Arc::clone(&self.driver);
                        async move { driver.kill_task(&task_id).await }
                    })
                    .await;

                if result.is_err() {
                    tracing::warn!(instance = %instance_id, "kill never landed, failing instance");
                    let failed = self.authority.try_submit(InputEvent::StatusUpdate {
                        instance_id,
                        incarnation,
                        condition: Condition::Failed,
                        agent_id: None,
                        timestamp: Utc::now(),
                    });
                    if let Err(rejection) = failed {
                        tracing::error!(%rejection, "failure transition not submitted");
                    }
                }
            }
            Effect::UnknownInstance { task_id } => {
                // Best effort: one attempt, the reconciliation sweep retries.
                if let Err(err) = self.driver.kill_task(&task_id).await {
                    tracing::debug!(task = %task_id, error = %err, "best-effort reap failed");
                }
            }
            Effect::Persist {
                transaction_id,
                deltas,
            } => {
                tracing::trace!(transaction_id, deltas = deltas.len(), "transition persisted");
            }
            Effect::Notify { event } => {
                // Send fails only with zero subscribers, which is fine.
                let _ = self.notifications.send(event);
            }
        }
    }

    /// Retries an operation with bounded exponential backoff until the
    /// policy deadline.
    async fn with_retries<F, Fut>(&self, operation: &str, mut attempt: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let started = std::time::Instant::now();
        let mut backoff = self.retry.initial_backoff;

        loop {
            match attempt().await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    if started.elapsed() + backoff > self.retry.deadline {
                        tracing::error!(operation, error = %err, "broker call exhausted its deadline");
                        return Err(err);
                    }
                    tracing::debug!(operation, error = %err, ?backoff, "broker call failed, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.retry.max_backoff);
                }
            }
        }
    }
}
