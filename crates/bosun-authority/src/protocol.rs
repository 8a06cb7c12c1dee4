//! The command/effect protocol: everything that flows into and out of the
//! state authority.
//!
//! Inputs are [`InputEvent`]s: external command requests, broker-observed
//! status changes, framework handshakes, and leadership transitions. The
//! authority reduces each event against the current snapshot and emits an
//! ordered sequence of [`Effect`]s.
//!
//! Every applied command produces exactly one of `CommandAccepted` or
//! `CommandFailure`. A rejected command never mutates state; an accepted one
//! is durable before its acknowledgement is emitted.

use bosun_core::{AgentId, FrameworkId, InstanceId, OfferId, RequestId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::broker::TaskInfo;
use crate::instance::{Condition, Goal};
use crate::snapshot::{FrameworkRegistration, SnapshotDelta};
use crate::spec::{FaultDomain, RunSpec, RunSpecRef};

/// A request to mutate authoritative state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "command")]
pub enum Command {
    /// Idempotent create-or-replace of a run spec.
    PutRunSpec {
        /// The spec to upsert.
        spec: RunSpec,
    },
    /// Remove a run spec nothing references anymore.
    DeleteRunSpec {
        /// The spec version to remove.
        reference: RunSpecRef,
    },
    /// Create a new instance slot for an existing run spec.
    AddInstance {
        /// Caller-chosen unique instance id.
        id: InstanceId,
        /// The spec the instance runs.
        spec_ref: RunSpecRef,
        /// Initial goal.
        goal: Goal,
    },
    /// Downgrade an instance's goal.
    UpdateInstanceGoal {
        /// The instance to change.
        id: InstanceId,
        /// The new goal; must not upgrade.
        goal: Goal,
    },
    /// Destroy a terminal instance record.
    ForgetInstance {
        /// The instance to destroy.
        id: InstanceId,
    },
    /// Commit scheduled instances to an offer (reconciler-originated).
    ReservePlacements {
        /// The offer being accepted.
        offer_id: OfferId,
        /// The agent the offer came from.
        agent_id: AgentId,
        /// Instances to place, in packing order.
        instance_ids: Vec<InstanceId>,
    },
    /// Roll back an offer's reservation (broker rejected or rescinded).
    ReleasePlacements {
        /// The offer whose reservation rolls back.
        offer_id: OfferId,
    },
}

impl Command {
    /// A short stable name for logging and metrics labels.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::PutRunSpec { .. } => "put_run_spec",
            Self::DeleteRunSpec { .. } => "delete_run_spec",
            Self::AddInstance { .. } => "add_instance",
            Self::UpdateInstanceGoal { .. } => "update_instance_goal",
            Self::ForgetInstance { .. } => "forget_instance",
            Self::ReservePlacements { .. } => "reserve_placements",
            Self::ReleasePlacements { .. } => "release_placements",
        }
    }
}

/// An event submitted to the authority's input queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "event")]
pub enum InputEvent {
    /// External request to mutate state.
    CommandRequest {
        /// Caller-chosen correlation id, echoed on the outcome.
        request_id: RequestId,
        /// The mutation.
        command: Command,
    },
    /// Observed condition change for one broker task incarnation.
    StatusUpdate {
        /// The instance the task id decoded to.
        instance_id: InstanceId,
        /// The incarnation the task id decoded to.
        incarnation: u64,
        /// The observed condition.
        condition: Condition,
        /// The agent reporting, when known.
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_id: Option<AgentId>,
        /// Broker-side timestamp of the observation.
        timestamp: DateTime<Utc>,
    },
    /// The broker handshake completed and assigned our framework id.
    FrameworkRegistered {
        /// The assigned framework id.
        framework_id: FrameworkId,
        /// The master that registered us.
        master_id: String,
        /// The master's advertised version.
        version: String,
        /// The master's fault domain, if it reports one.
        #[serde(skip_serializing_if = "Option::is_none")]
        fault_domain: Option<FaultDomain>,
    },
    /// A re-handshake with a (possibly new) master completed.
    FrameworkReregistered {
        /// The master that re-registered us.
        master_id: String,
        /// The master's advertised version.
        version: String,
        /// The master's fault domain, if it reports one.
        #[serde(skip_serializing_if = "Option::is_none")]
        fault_domain: Option<FaultDomain>,
    },
    /// The broker withdrew an offer we may hold reservations against.
    OfferRescinded {
        /// The withdrawn offer.
        offer_id: OfferId,
    },
    /// This process now holds exclusive leadership.
    LeadershipAcquired {
        /// Monotonic fencing token proving this leadership term.
        fencing_token: u64,
    },
    /// Leadership was lost; the pipeline must deactivate.
    LeadershipLost,
    /// Graceful termination; no effects are emitted afterwards.
    Shutdown,
}

/// Why a command was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionKind {
    /// The referenced run spec does not exist.
    NoRunSpec,
    /// The run spec still has instances referencing it.
    RunSpecInUse,
    /// The run spec reference is malformed.
    InvalidRef,
    /// The instance id is already in use.
    DuplicateInstance,
    /// The instance does not exist.
    NoSuchInstance,
    /// The goal change would upgrade a downgraded goal.
    InvalidGoalTransition,
    /// The instance's condition is not terminal.
    InstanceNotTerminal,
    /// The authority does not (or no longer) holds leadership.
    LeadershipLost,
    /// The journal did not acknowledge the transition.
    PersistenceUnavailable,
    /// The input queue was full; nothing was enqueued.
    QueueFull,
    /// The authority is shutting down.
    ShuttingDown,
}

/// A command rejection: the kind plus a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    /// Machine-readable category.
    pub kind: RejectionKind,
    /// Human-readable explanation.
    pub reason: String,
}

impl Rejection {
    /// Creates a rejection.
    #[must_use]
    pub fn new(kind: RejectionKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    /// The referenced run spec is absent.
    #[must_use]
    pub fn no_run_spec(reference: &RunSpecRef) -> Self {
        Self::new(RejectionKind::NoRunSpec, format!("No runSpec {reference}"))
    }

    /// The run spec still has dependents.
    #[must_use]
    pub fn run_spec_in_use(reference: &RunSpecRef, dependents: usize) -> Self {
        Self::new(
            RejectionKind::RunSpecInUse,
            format!("runSpec {reference} still referenced by {dependents} instance(s)"),
        )
    }

    /// Leadership is not held.
    #[must_use]
    pub fn leadership_lost() -> Self {
        Self::new(RejectionKind::LeadershipLost, "leadership lost")
    }

    /// The journal refused or failed the write.
    #[must_use]
    pub fn persistence_unavailable(detail: impl Into<String>) -> Self {
        Self::new(RejectionKind::PersistenceUnavailable, detail)
    }

    /// The input queue is at capacity.
    #[must_use]
    pub fn queue_full() -> Self {
        Self::new(RejectionKind::QueueFull, "command queue at capacity")
    }

    /// The authority is draining for shutdown.
    #[must_use]
    pub fn shutting_down() -> Self {
        Self::new(RejectionKind::ShuttingDown, "authority shutting down")
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.reason)
    }
}

/// Pub/sub notification published to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "notification")]
pub enum Notification {
    /// A run spec was created, replaced, or removed.
    RunSpecChanged {
        /// The affected reference.
        reference: RunSpecRef,
    },
    /// An instance's goal or condition changed.
    InstanceChanged {
        /// The affected instance.
        id: InstanceId,
        /// Its condition after the change.
        condition: Condition,
        /// Its goal after the change.
        goal: Goal,
    },
    /// An instance record was destroyed.
    InstanceForgotten {
        /// The destroyed instance.
        id: InstanceId,
    },
    /// This process won leader election.
    LeaderElected {
        /// The fencing token of the new term.
        fencing_token: u64,
    },
    /// The scheduler lost its broker connection or leadership terminally.
    SchedulerDisconnected,
}

/// An externally observable consequence of applying an input event.
///
/// Effects from a single event are contiguous and ordered; downstream
/// consumers may batch but never reorder them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "effect")]
pub enum Effect {
    /// The command was committed durably.
    CommandAccepted {
        /// The originating request.
        request_id: RequestId,
    },
    /// The command was rejected before any state change.
    CommandFailure {
        /// The originating request.
        request_id: RequestId,
        /// Why it was rejected.
        rejection: Rejection,
    },
    /// Launch one task on an agent. All launches for one offer are followed
    /// by a single [`Effect::AcceptOffer`] and must be delivered to the
    /// broker in one accept call.
    LaunchTask {
        /// The agent to launch on.
        agent_id: AgentId,
        /// The task description.
        task: TaskInfo,
    },
    /// Kill one task incarnation.
    KillTask {
        /// The instance being killed.
        instance_id: InstanceId,
        /// The incarnation being killed.
        incarnation: u64,
        /// The broker task id to kill.
        task_id: TaskId,
    },
    /// Accept an offer carrying the preceding launches.
    AcceptOffer {
        /// The accepted offer.
        offer_id: OfferId,
        /// Refuse-filter duration for the residue.
        refuse_seconds: f64,
    },
    /// Decline an offer outright.
    DeclineOffer {
        /// The declined offer.
        offer_id: OfferId,
        /// Refuse-filter duration.
        refuse_seconds: f64,
    },
    /// The ordered durable write that committed this transition.
    Persist {
        /// Monotonic transaction id.
        transaction_id: u64,
        /// The deltas written.
        deltas: Vec<SnapshotDelta>,
    },
    /// Pub/sub notification.
    Notify {
        /// The published notification.
        event: Notification,
    },
    /// A status update referenced a task the snapshot does not know; the
    /// broker reconciliation path should reap it.
    UnknownInstance {
        /// The unknown task.
        task_id: TaskId,
    },
}

impl Effect {
    /// A short stable name for logging and metrics labels.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CommandAccepted { .. } => "command_accepted",
            Self::CommandFailure { .. } => "command_failure",
            Self::LaunchTask { .. } => "launch_task",
            Self::KillTask { .. } => "kill_task",
            Self::AcceptOffer { .. } => "accept_offer",
            Self::DeclineOffer { .. } => "decline_offer",
            Self::Persist { .. } => "persist",
            Self::Notify { .. } => "notify",
            Self::UnknownInstance { .. } => "unknown_instance",
        }
    }

    /// Returns true for command outcomes (accepted or failed), which are
    /// delivered to requesters even while leadership is lost.
    #[must_use]
    pub const fn is_command_outcome(&self) -> bool {
        matches!(
            self,
            Self::CommandAccepted { .. } | Self::CommandFailure { .. }
        )
    }
}

/// The registration value wrapped for convenience of callers constructing
/// framework events.
#[must_use]
pub fn registration(framework_id: FrameworkId, master_id: impl Into<String>) -> FrameworkRegistration {
    FrameworkRegistration {
        framework_id,
        master_id: master_id.into(),
    }
}
