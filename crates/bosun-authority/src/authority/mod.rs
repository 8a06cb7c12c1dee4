//! The single-writer state authority pipeline.
//!
//! One bounded input queue, one consumer loop, one snapshot writer. Events
//! are reduced strictly in arrival order by the pure [`Reducer`]; all I/O
//! happens through emitted effects except the journal append, which the
//! pipeline awaits before publishing the post-state snapshot. While the
//! append is in flight no further input is processed — the authority is a
//! single back-pressured pipeline stage.
//!
//! Overflow policy is *fail*: [`AuthorityHandle::try_submit`] returns a
//! `QueueFull` rejection synchronously and nothing is enqueued. No input is
//! silently dropped.

pub mod reducer;

pub use reducer::{Reducer, Reduction, StatusOutcome};

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use bosun_core::RequestId;

use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::journal::{replay_snapshot, Journal, JournalTransaction};
use crate::metrics::AuthorityMetrics;
use crate::protocol::{Effect, InputEvent, Notification, Rejection};
use crate::snapshot::SnapshotCell;

/// Cheap-to-clone submission handle for the authority's input queue.
#[derive(Debug, Clone)]
pub struct AuthorityHandle {
    tx: mpsc::Sender<InputEvent>,
}

impl AuthorityHandle {
    /// Submits an event without waiting.
    ///
    /// # Errors
    ///
    /// Returns `QueueFull` when the bounded queue is at capacity (the event
    /// was not enqueued; the caller owns the retry decision) and
    /// `ShuttingDown` when the pipeline has terminated.
    pub fn try_submit(&self, event: InputEvent) -> std::result::Result<(), Rejection> {
        self.tx.try_send(event).map_err(|err| match err {
            TrySendError::Full(_) => Rejection::queue_full(),
            TrySendError::Closed(_) => Rejection::shutting_down(),
        })
    }

    /// Submits an event, waiting for queue capacity.
    ///
    /// Used by the leadership gate and shutdown paths, whose events must not
    /// be load-shed.
    ///
    /// # Errors
    ///
    /// Returns `ShuttingDown` when the pipeline has terminated.
    pub async fn send(&self, event: InputEvent) -> std::result::Result<(), Rejection> {
        self.tx
            .send(event)
            .await
            .map_err(|_| Rejection::shutting_down())
    }
}

/// The single-writer event loop.
///
/// Constructed once, run to completion on its own task. Terminal errors
/// (invariant violations, journal corruption, a dead effect consumer) are
/// returned from [`StateAuthority::run`] for the caller to escalate to the
/// crash strategy.
pub struct StateAuthority {
    rx: mpsc::Receiver<InputEvent>,
    journal: Arc<dyn Journal>,
    snapshots: SnapshotCell,
    effects: mpsc::Sender<Effect>,
    reducer: Reducer,
    metrics: AuthorityMetrics,
    active: bool,
    next_transaction: u64,
}

impl StateAuthority {
    /// Creates the pipeline and its submission handle.
    ///
    /// `snapshots` is the published-snapshot cell shared with readers;
    /// `effects` is the bounded channel the effect router consumes.
    #[must_use]
    pub fn new(
        config: &SchedulerConfig,
        journal: Arc<dyn Journal>,
        snapshots: SnapshotCell,
        effects: mpsc::Sender<Effect>,
    ) -> (Self, AuthorityHandle) {
        let (tx, rx) = mpsc::channel(config.command_queue_capacity);
        let authority = Self {
            rx,
            journal,
            snapshots,
            effects,
            reducer: Reducer::new(config.refuse_offer_seconds),
            metrics: AuthorityMetrics::new(),
            active: false,
            next_transaction: 1,
        };
        (authority, AuthorityHandle { tx })
    }

    /// Runs the event loop until shutdown or a terminal error.
    ///
    /// # Errors
    ///
    /// Returns a terminal error for the crash strategy: journal replay
    /// failure on activation, an invariant violation after a reduction, or
    /// the effect channel closing underneath us.
    #[tracing::instrument(skip(self), name = "state_authority")]
    pub async fn run(mut self) -> Result<()> {
        while let Some(event) = self.rx.recv().await {
            match event {
                InputEvent::LeadershipAcquired { fencing_token } => {
                    self.activate(fencing_token).await?;
                }
                InputEvent::LeadershipLost => {
                    tracing::info!("leadership lost, deactivating pipeline");
                    self.active = false;
                }
                InputEvent::Shutdown => {
                    tracing::info!("shutdown event received, closing pipeline");
                    break;
                }
                InputEvent::CommandRequest {
                    request_id,
                    command,
                } => {
                    self.handle_command(request_id, command).await?;
                }
                InputEvent::StatusUpdate {
                    instance_id,
                    incarnation,
                    condition,
                    agent_id,
                    timestamp,
                } => {
                    if !self.active {
                        tracing::debug!(instance = %instance_id, "dropping status update while inactive");
                        continue;
                    }
                    let snapshot = self.snapshots.load();
                    let outcome = Reducer::reduce_status(
                        &snapshot,
                        instance_id,
                        incarnation,
                        condition,
                        agent_id.as_ref(),
                        timestamp,
                    );
                    match outcome {
                        StatusOutcome::NoChange => {}
                        StatusOutcome::UnknownTask(task_id) => {
                            tracing::info!(task = %task_id, "status update for unknown instance");
                            self.emit(Effect::UnknownInstance { task_id }).await?;
                        }
                        StatusOutcome::Applied(reduction) => {
                            self.commit(reduction, None).await?;
                        }
                    }
                }
                InputEvent::FrameworkRegistered {
                    framework_id,
                    master_id,
                    version,
                    ..
                } => {
                    if !self.active {
                        continue;
                    }
                    tracing::info!(framework = %framework_id, master = %master_id, %version, "framework registered");
                    let reduction = Reducer::reduce_registration(crate::protocol::registration(
                        framework_id,
                        master_id,
                    ));
                    self.commit(reduction, None).await?;
                }
                InputEvent::FrameworkReregistered {
                    master_id, version, ..
                } => {
                    if !self.active {
                        continue;
                    }
                    tracing::info!(master = %master_id, %version, "framework re-registered");
                    let snapshot = self.snapshots.load();
                    if let Some(reduction) = Reducer::reduce_reregistration(&snapshot, &master_id) {
                        self.commit(reduction, None).await?;
                    }
                }
                InputEvent::OfferRescinded { offer_id } => {
                    if !self.active {
                        continue;
                    }
                    tracing::debug!(offer = %offer_id, "offer rescinded, releasing reservation");
                    let snapshot = self.snapshots.load();
                    match self.reducer.reduce_command(
                        &snapshot,
                        &crate::protocol::Command::ReleasePlacements { offer_id },
                        Utc::now(),
                    ) {
                        Ok(reduction) => self.commit(reduction, None).await?,
                        Err(rejection) => {
                            tracing::warn!(%rejection, "rescind release rejected");
                        }
                    }
                }
            }
        }

        tracing::info!("state authority pipeline closed");
        Ok(())
    }

    /// Replays the journal and activates the pipeline.
    async fn activate(&mut self, fencing_token: u64) -> Result<()> {
        let snapshot = replay_snapshot(self.journal.as_ref()).await?;
        self.next_transaction = snapshot.version() + 1;
        let instances = snapshot.instance_count();
        self.snapshots.publish(Arc::new(snapshot));
        self.active = true;
        tracing::info!(fencing_token, instances, "leadership acquired, pipeline active");
        self.emit(Effect::Notify {
            event: Notification::LeaderElected { fencing_token },
        })
        .await
    }

    async fn handle_command(
        &mut self,
        request_id: RequestId,
        command: crate::protocol::Command,
    ) -> Result<()> {
        if !self.active {
            self.metrics.record_command(command.name(), "rejected");
            return self
                .emit(Effect::CommandFailure {
                    request_id,
                    rejection: Rejection::leadership_lost(),
                })
                .await;
        }

        let snapshot = self.snapshots.load();
        let started = std::time::Instant::now();
        let outcome = self.reducer.reduce_command(&snapshot, &command, Utc::now());
        self.metrics.observe_reduce_duration(started.elapsed());

        match outcome {
            Err(rejection) => {
                self.metrics.record_command(command.name(), "rejected");
                tracing::debug!(command = command.name(), %rejection, "command rejected");
                self.emit(Effect::CommandFailure {
                    request_id,
                    rejection,
                })
                .await
            }
            Ok(reduction) => {
                self.metrics.record_command(command.name(), "accepted");
                self.commit(reduction, Some(request_id)).await
            }
        }
    }

    /// Applies a reduction: journal, publish, then emit in order.
    ///
    /// On journal failure the tentative snapshot is discarded; a command
    /// requester receives `PersistenceUnavailable` and published state is
    /// untouched.
    async fn commit(&mut self, reduction: Reduction, request_id: Option<RequestId>) -> Result<()> {
        if reduction.deltas.is_empty() {
            // Nothing durable to write; acknowledge and emit directly.
            if let Some(request_id) = request_id {
                self.emit(Effect::CommandAccepted { request_id }).await?;
            }
            return self.emit_all(reduction.effects).await;
        }

        let transaction_id = self.next_transaction;
        let current = self.snapshots.load();
        let mut next = (*current).clone();
        for delta in &reduction.deltas {
            next.apply(delta);
        }
        next.set_version(transaction_id);
        next.validate()?;

        let transaction = JournalTransaction::new(transaction_id, reduction.deltas);
        if let Err(err) = self.journal.append(&transaction).await {
            tracing::error!(error = %err, transaction_id, "journal append failed, discarding tentative snapshot");
            if let Some(request_id) = request_id {
                self.emit(Effect::CommandFailure {
                    request_id,
                    rejection: Rejection::persistence_unavailable(err.to_string()),
                })
                .await?;
            }
            return Ok(());
        }

        self.next_transaction += 1;
        self.snapshots.publish(Arc::new(next));

        self.emit(Effect::Persist {
            transaction_id,
            deltas: transaction.deltas,
        })
        .await?;
        if let Some(request_id) = request_id {
            self.emit(Effect::CommandAccepted { request_id }).await?;
        }
        self.emit_all(reduction.effects).await
    }

    async fn emit_all(&mut self, effects: Vec<Effect>) -> Result<()> {
        for effect in effects {
            self.emit(effect).await?;
        }
        Ok(())
    }

    /// Emits one effect downstream.
    ///
    /// While leadership is lost only command outcomes pass; everything else
    /// is suppressed at this sink.
    async fn emit(&mut self, effect: Effect) -> Result<()> {
        if !self.active && !effect.is_command_outcome() {
            tracing::debug!(effect = effect.name(), "suppressing effect while inactive");
            return Ok(());
        }
        self.metrics.record_effect(effect.name());
        self.effects.send(effect).await.map_err(|_| Error::ChannelClosed {
            context: "effect channel closed while emitting".into(),
        })
    }
}
