//! The pure reduction `(snapshot, event) → (deltas, effects)`.
//!
//! Nothing here performs I/O or reads clocks; the pipeline passes the
//! current time in. Given equal inputs the reducer produces equal outputs,
//! which is what makes journal replay and property testing possible.

use bosun_core::{AgentId, InstanceId, OfferId, TaskId};
use chrono::{DateTime, Utc};

use crate::broker::TaskInfo;
use crate::instance::{Condition, Goal, Instance};
use crate::protocol::{Command, Effect, Notification, Rejection, RejectionKind};
use crate::snapshot::{FrameworkRegistration, Snapshot, SnapshotDelta};

/// The state deltas and side effects of one applied event.
#[derive(Debug, Default)]
pub struct Reduction {
    /// State transitions to journal and apply, in order.
    pub deltas: Vec<SnapshotDelta>,
    /// Broker-facing and notification effects, in emission order.
    pub effects: Vec<Effect>,
}

impl Reduction {
    fn delta(mut self, delta: SnapshotDelta) -> Self {
        self.deltas.push(delta);
        self
    }

    fn effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Outcome of reducing a status update.
#[derive(Debug)]
pub enum StatusOutcome {
    /// The update referenced a task the snapshot does not know.
    UnknownTask(TaskId),
    /// The update changed nothing (stale incarnation, repeated condition,
    /// or an unreachable transition).
    NoChange,
    /// The update produced a state transition.
    Applied(Reduction),
}

/// The deterministic reducer.
///
/// Construction parameters (the decline refuse duration) are fixed for the
/// lifetime of the pipeline, so reduction stays a pure function of
/// `(snapshot, event, now)`.
#[derive(Debug, Clone)]
pub struct Reducer {
    refuse_seconds: f64,
}

impl Reducer {
    /// Creates a reducer with the configured decline refuse duration.
    #[must_use]
    pub const fn new(refuse_seconds: f64) -> Self {
        Self { refuse_seconds }
    }

    /// Reduces a command against the snapshot.
    ///
    /// # Errors
    ///
    /// Returns the [`Rejection`] when a precondition fails; the snapshot is
    /// untouched in that case.
    pub fn reduce_command(
        &self,
        snapshot: &Snapshot,
        command: &Command,
        now: DateTime<Utc>,
    ) -> Result<Reduction, Rejection> {
        match command {
            Command::PutRunSpec { spec } => {
                spec.reference.validate().map_err(|e| {
                    Rejection::new(RejectionKind::InvalidRef, e.to_string())
                })?;
                Ok(Reduction::default()
                    .delta(SnapshotDelta::RunSpecPut { spec: spec.clone() })
                    .effect(Effect::Notify {
                        event: Notification::RunSpecChanged {
                            reference: spec.reference.clone(),
                        },
                    }))
            }

            Command::DeleteRunSpec { reference } => {
                if snapshot.run_spec(reference).is_none() {
                    return Err(Rejection::no_run_spec(reference));
                }
                let dependents = snapshot
                    .instances()
                    .filter(|instance| instance.spec_ref == *reference)
                    .count();
                if dependents > 0 {
                    return Err(Rejection::run_spec_in_use(reference, dependents));
                }
                Ok(Reduction::default()
                    .delta(SnapshotDelta::RunSpecRemoved {
                        reference: reference.clone(),
                    })
                    .effect(Effect::Notify {
                        event: Notification::RunSpecChanged {
                            reference: reference.clone(),
                        },
                    }))
            }

            Command::AddInstance { id, spec_ref, goal } => {
                if snapshot.run_spec(spec_ref).is_none() {
                    return Err(Rejection::no_run_spec(spec_ref));
                }
                if snapshot.instance(*id).is_some() {
                    return Err(Rejection::new(
                        RejectionKind::DuplicateInstance,
                        format!("instance {id} already exists"),
                    ));
                }
                let instance = Instance::scheduled(*id, spec_ref.clone(), *goal, now);
                let notify = Notification::InstanceChanged {
                    id: *id,
                    condition: instance.condition,
                    goal: instance.goal,
                };
                Ok(Reduction::default()
                    .delta(SnapshotDelta::InstanceUpserted { instance })
                    .effect(Effect::Notify { event: notify }))
            }

            Command::UpdateInstanceGoal { id, goal } => {
                let Some(instance) = snapshot.instance(*id) else {
                    return Err(Rejection::new(
                        RejectionKind::NoSuchInstance,
                        format!("no instance {id}"),
                    ));
                };
                if !instance.goal.can_transition_to(*goal) {
                    return Err(Rejection::new(
                        RejectionKind::InvalidGoalTransition,
                        format!(
                            "goal may only downgrade: {:?} -> {:?}",
                            instance.goal, goal
                        ),
                    ));
                }

                let mut updated = (**instance).clone();
                updated.goal = *goal;

                let mut reduction = Reduction::default();
                let needs_kill = *goal != Goal::Running && !updated.condition.is_terminal();
                if needs_kill && updated.condition.can_transition_to(Condition::Killing) {
                    updated.condition = Condition::Killing;
                    updated.status_updated_at = now;
                }

                let notify = Notification::InstanceChanged {
                    id: *id,
                    condition: updated.condition,
                    goal: updated.goal,
                };
                let task_id = updated.task_id();
                let incarnation = updated.incarnation;
                reduction = reduction
                    .delta(SnapshotDelta::InstanceUpserted { instance: updated })
                    .effect(Effect::Notify { event: notify });
                if needs_kill {
                    reduction = reduction.effect(Effect::KillTask {
                        instance_id: *id,
                        incarnation,
                        task_id,
                    });
                }
                Ok(reduction)
            }

            Command::ForgetInstance { id } => {
                let Some(instance) = snapshot.instance(*id) else {
                    return Err(Rejection::new(
                        RejectionKind::NoSuchInstance,
                        format!("no instance {id}"),
                    ));
                };
                if !instance.is_terminal() {
                    return Err(Rejection::new(
                        RejectionKind::InstanceNotTerminal,
                        format!(
                            "instance {id} is {:?}, not terminal",
                            instance.condition
                        ),
                    ));
                }
                let mut reduction = Reduction::default();
                reduction = strip_from_reservations(snapshot, *id, reduction);
                Ok(reduction
                    .delta(SnapshotDelta::InstanceRemoved { id: *id })
                    .effect(Effect::Notify {
                        event: Notification::InstanceForgotten { id: *id },
                    }))
            }

            Command::ReservePlacements {
                offer_id,
                agent_id,
                instance_ids,
            } => Ok(self.reduce_reserve(snapshot, offer_id, agent_id, instance_ids, now)),

            Command::ReleasePlacements { offer_id } => {
                Ok(Self::reduce_release(snapshot, offer_id, now))
            }
        }
    }

    /// Reserves the still-launchable subset of the requested instances and
    /// emits the launch batch, or declines the offer when nothing survived.
    fn reduce_reserve(
        &self,
        snapshot: &Snapshot,
        offer_id: &OfferId,
        agent_id: &AgentId,
        instance_ids: &[InstanceId],
        now: DateTime<Utc>,
    ) -> Reduction {
        if snapshot.reservation(offer_id).is_some() {
            // An offer id is never legitimately offered twice while a
            // reservation is pending; refuse rather than orphan the first
            // reservation's instances.
            return Reduction::default().effect(Effect::DeclineOffer {
                offer_id: offer_id.clone(),
                refuse_seconds: self.refuse_seconds,
            });
        }

        let mut reduction = Reduction::default();
        let mut reserved = Vec::new();
        let mut launches = Vec::new();

        for id in instance_ids {
            let Some(instance) = snapshot.instance(*id) else {
                continue;
            };
            if !instance.is_launchable() {
                continue;
            }
            let Some(spec) = snapshot.run_spec(&instance.spec_ref) else {
                continue;
            };

            let mut provisioned = (**instance).clone();
            provisioned.condition = Condition::Provisioned;
            provisioned.agent_id = Some(agent_id.clone());
            provisioned.status_updated_at = now;

            launches.push(Effect::LaunchTask {
                agent_id: agent_id.clone(),
                task: TaskInfo {
                    task_id: provisioned.task_id(),
                    agent_id: agent_id.clone(),
                    command: spec.command.clone(),
                    resources: spec.resources,
                },
            });
            reduction = reduction.delta(SnapshotDelta::InstanceUpserted {
                instance: provisioned,
            });
            reserved.push(*id);
        }

        if reserved.is_empty() {
            // Planning raced a state change; nothing left to place.
            return Reduction::default().effect(Effect::DeclineOffer {
                offer_id: offer_id.clone(),
                refuse_seconds: self.refuse_seconds,
            });
        }

        reduction = reduction.delta(SnapshotDelta::ReservationRecorded {
            offer_id: offer_id.clone(),
            instance_ids: reserved,
        });
        for launch in launches {
            reduction = reduction.effect(launch);
        }
        // Zero refuse so the broker re-offers the residue promptly.
        reduction.effect(Effect::AcceptOffer {
            offer_id: offer_id.clone(),
            refuse_seconds: 0.0,
        })
    }

    /// Rolls back an offer's reservation: surviving Provisioned instances
    /// revert to Scheduled.
    fn reduce_release(snapshot: &Snapshot, offer_id: &OfferId, now: DateTime<Utc>) -> Reduction {
        let Some(reserved) = snapshot.reservation(offer_id) else {
            return Reduction::default();
        };

        let mut reduction = Reduction::default();
        for id in reserved {
            let Some(instance) = snapshot.instance(*id) else {
                continue;
            };
            if instance.condition != Condition::Provisioned {
                continue;
            }
            let mut reverted = (**instance).clone();
            reverted.condition = Condition::Scheduled;
            reverted.agent_id = None;
            reverted.status_updated_at = now;
            reduction = reduction.delta(SnapshotDelta::InstanceUpserted {
                instance: reverted,
            });
        }
        reduction.delta(SnapshotDelta::ReservationCleared {
            offer_id: offer_id.clone(),
        })
    }

    /// Reduces an observed task condition change.
    #[allow(clippy::too_many_lines)]
    pub fn reduce_status(
        snapshot: &Snapshot,
        instance_id: InstanceId,
        incarnation: u64,
        condition: Condition,
        agent_id: Option<&AgentId>,
        now: DateTime<Utc>,
    ) -> StatusOutcome {
        let Some(instance) = snapshot.instance(instance_id) else {
            return StatusOutcome::UnknownTask(TaskId::new(instance_id, incarnation.max(1)));
        };

        if incarnation != instance.incarnation {
            tracing::debug!(
                instance = %instance_id,
                reported = incarnation,
                current = instance.incarnation,
                "ignoring status update for non-current incarnation"
            );
            return StatusOutcome::NoChange;
        }

        if condition == instance.condition {
            return StatusOutcome::NoChange;
        }

        if !instance.condition.can_transition_to(condition) {
            tracing::warn!(
                instance = %instance_id,
                from = ?instance.condition,
                to = ?condition,
                "ignoring unreachable condition transition"
            );
            return StatusOutcome::NoChange;
        }

        let mut updated = (**instance).clone();
        updated.condition = condition;
        updated.status_updated_at = now;
        if let Some(agent) = agent_id {
            updated.agent_id = Some(agent.clone());
        }

        // A confirmed launch (or any later observation) resolves the
        // instance's pending offer reservation.
        let mut reduction = strip_from_reservations(snapshot, instance_id, Reduction::default());

        let kill_again = updated.goal != Goal::Running && !condition.is_terminal();
        let final_instance = if condition.is_terminal() && updated.goal == Goal::Running {
            // Intent says keep running: re-seat for relaunch at the next
            // incarnation. The reconciler picks it up on the next offer.
            updated.reincarnated(now)
        } else {
            updated
        };

        let notify = Notification::InstanceChanged {
            id: instance_id,
            condition: final_instance.condition,
            goal: final_instance.goal,
        };
        let task_id = final_instance.task_id();
        let final_incarnation = final_instance.incarnation;
        reduction = reduction
            .delta(SnapshotDelta::InstanceUpserted {
                instance: final_instance,
            })
            .effect(Effect::Notify { event: notify });

        if kill_again {
            reduction = reduction.effect(Effect::KillTask {
                instance_id,
                incarnation: final_incarnation,
                task_id,
            });
        }

        StatusOutcome::Applied(reduction)
    }

    /// Reduces a completed broker registration handshake.
    #[must_use]
    pub fn reduce_registration(registration: FrameworkRegistration) -> Reduction {
        Reduction::default().delta(SnapshotDelta::FrameworkRegistered { registration })
    }

    /// Reduces a re-registration: refreshes the last-known master id.
    #[must_use]
    pub fn reduce_reregistration(snapshot: &Snapshot, master_id: &str) -> Option<Reduction> {
        let current = snapshot.framework()?;
        if current.master_id == master_id {
            return None;
        }
        let mut registration = current.clone();
        registration.master_id = master_id.to_string();
        Some(Reduction::default().delta(SnapshotDelta::FrameworkRegistered { registration }))
    }
}

/// Removes the instance from any pending reservation, clearing reservations
/// that become empty.
fn strip_from_reservations(
    snapshot: &Snapshot,
    instance_id: InstanceId,
    mut reduction: Reduction,
) -> Reduction {
    // Sorted for deterministic delta order regardless of map layout.
    let mut offers: Vec<&OfferId> = snapshot.reserved_offers().collect();
    offers.sort();
    for offer_id in offers {
        let Some(reserved) = snapshot.reservation(offer_id) else {
            continue;
        };
        if !reserved.contains(&instance_id) {
            continue;
        }
        let remaining: Vec<InstanceId> = reserved
            .iter()
            .copied()
            .filter(|id| *id != instance_id)
            .collect();
        reduction = if remaining.is_empty() {
            reduction.delta(SnapshotDelta::ReservationCleared {
                offer_id: offer_id.clone(),
            })
        } else {
            reduction.delta(SnapshotDelta::ReservationRecorded {
                offer_id: offer_id.clone(),
                instance_ids: remaining,
            })
        };
    }
    reduction
}
