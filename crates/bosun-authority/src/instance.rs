//! Task instance tracking.
//!
//! An instance is one logical slot of a run spec: it survives across broker
//! task incarnations, carrying a desired [`Goal`] and an observed
//! [`Condition`]. The pair drives everything the scheduler does — the
//! reconciler launches Scheduled instances whose goal is Running, the
//! authority kills running instances whose goal is not.

use bosun_core::{AgentId, InstanceId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::spec::RunSpecRef;

/// What the operator wants for an instance.
///
/// Goals only move downward: Running → Stopped → Decommissioned. Once an
/// instance is Decommissioned the goal is permanent and the instance is
/// destroyed as soon as its condition is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Goal {
    /// Keep an incarnation of this instance running, replacing failures.
    Running,
    /// Stop the current incarnation but keep the instance record.
    Stopped,
    /// Stop and destroy the instance record once terminal.
    Decommissioned,
}

impl Goal {
    /// Returns the downgrade rank; transitions must be non-decreasing.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Running => 0,
            Self::Stopped => 1,
            Self::Decommissioned => 2,
        }
    }

    /// Returns true when moving from `self` to `next` is permitted.
    ///
    /// Re-asserting the current goal is allowed (idempotent accept).
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        next.rank() >= self.rank()
    }
}

/// The observed condition of an instance's current incarnation.
///
/// Conditions form a lattice: forward progress only, with the three terminal
/// conditions reachable from any non-terminal one. From a terminal condition
/// no further transition is permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Waiting for a matching resource offer.
    Scheduled,
    /// Reserved against an offer; launch submitted to the broker.
    Provisioned,
    /// The broker reports the task is staging on an agent.
    Staging,
    /// The task is running.
    Running,
    /// A kill was issued; awaiting the terminal status.
    Killing,
    /// The task exited cleanly.
    Finished,
    /// The task exited with an error.
    Failed,
    /// The broker no longer knows the task.
    Gone,
}

impl Condition {
    /// Returns the lattice rank. Higher rank = further along; terminal
    /// conditions rank above all non-terminal ones.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Scheduled => 0,
            Self::Provisioned => 1,
            Self::Staging => 2,
            Self::Running => 3,
            Self::Killing => 4,
            Self::Finished => 10,
            Self::Failed => 11,
            Self::Gone => 12,
        }
    }

    /// Returns true if this is a terminal condition.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Gone)
    }

    /// Returns true when `next` is reachable from `self`.
    ///
    /// Terminal conditions accept nothing further; any terminal condition is
    /// reachable from any non-terminal one; among non-terminal conditions
    /// only forward moves are permitted. A same-condition update is not a
    /// transition (callers treat it as a timestamp refresh).
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next.is_terminal() {
            return true;
        }
        next.rank() > self.rank()
    }
}

/// One logical slot of a run spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    /// Unique identifier, stable across incarnations.
    pub id: InstanceId,

    /// The run spec version this instance was created against.
    pub spec_ref: RunSpecRef,

    /// Monotonically increasing incarnation counter, starting at 1. Each
    /// broker task id embeds the id and the incarnation.
    pub incarnation: u64,

    /// Operator intent.
    pub goal: Goal,

    /// Observed condition of the current incarnation.
    pub condition: Condition,

    /// The agent the current incarnation is (or was) placed on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,

    /// When the instance record was created.
    pub created_at: DateTime<Utc>,

    /// When the condition last changed (or was last confirmed).
    pub status_updated_at: DateTime<Utc>,
}

impl Instance {
    /// Creates a freshly scheduled instance at incarnation 1.
    #[must_use]
    pub fn scheduled(id: InstanceId, spec_ref: RunSpecRef, goal: Goal, now: DateTime<Utc>) -> Self {
        Self {
            id,
            spec_ref,
            incarnation: 1,
            goal,
            condition: Condition::Scheduled,
            agent_id: None,
            created_at: now,
            status_updated_at: now,
        }
    }

    /// Returns the broker task id of the current incarnation.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        TaskId::new(self.id, self.incarnation)
    }

    /// Returns true when the current incarnation has reached a terminal
    /// condition.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.condition.is_terminal()
    }

    /// Returns true when the reconciler should consider this instance for
    /// placement: it wants to run and is waiting for an offer.
    #[must_use]
    pub fn is_launchable(&self) -> bool {
        self.goal == Goal::Running && self.condition == Condition::Scheduled
    }

    /// Returns a copy re-seated for relaunch: next incarnation, condition
    /// back to Scheduled, agent cleared.
    #[must_use]
    pub fn reincarnated(&self, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.incarnation += 1;
        next.condition = Condition::Scheduled;
        next.agent_id = None;
        next.status_updated_at = now;
        next
    }
}
