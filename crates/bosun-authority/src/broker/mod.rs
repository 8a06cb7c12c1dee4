//! The resource-broker adapter: the message shapes we consume and emit, and
//! the narrow outbound driver interface the effect router calls.
//!
//! This module deliberately contains no SDK bindings. The broker side of the
//! system is an external collaborator; the core only specifies what it needs:
//! offers in, task statuses in, and four outbound calls (accept, decline,
//! kill, reconcile).
//!
//! ## Design Principles
//!
//! - **Backend agnostic**: the same interface serves a real broker SDK, a
//!   local single-node executor, or the in-memory recording driver in tests
//! - **Typed task ids**: every task id we emit embeds the instance UUID and
//!   incarnation, so every status that comes back routes itself

pub mod bridge;
pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use bosun_core::{AgentId, InstanceId, OfferId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::instance::Condition;
use crate::spec::{FaultDomain, ResourceRequirements};

/// A resource offer from one agent, valid for a bounded time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    /// Broker-assigned offer id.
    pub id: OfferId,
    /// The agent offering the resources.
    pub agent_id: AgentId,
    /// Resources available on the agent.
    pub resources: ResourceRequirements,
    /// Agent attributes for constraint matching.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    /// The agent's fault domain, if the broker reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<FaultDomain>,
}

/// The task description delivered to the broker inside an offer accept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    /// The broker task id (instance UUID + incarnation).
    pub task_id: TaskId,
    /// The agent the task launches on.
    pub agent_id: AgentId,
    /// Shell command to execute.
    pub command: String,
    /// Resources the task consumes.
    pub resources: ResourceRequirements,
}

/// Task state as the broker reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BrokerTaskState {
    /// Accepted by the agent, fetching/preparing.
    Staging,
    /// Launching the executor.
    Starting,
    /// Running.
    Running,
    /// Kill issued, not yet terminal.
    Killing,
    /// Exited cleanly.
    Finished,
    /// Exited with an error.
    Failed,
    /// Killed at our request.
    Killed,
    /// The broker lost track of the task.
    Lost,
    /// The broker does not know the task at all.
    Unknown,
}

impl BrokerTaskState {
    /// Maps the broker state to our condition lattice.
    #[must_use]
    pub const fn to_condition(self) -> Condition {
        match self {
            Self::Staging | Self::Starting => Condition::Staging,
            Self::Running => Condition::Running,
            Self::Killing => Condition::Killing,
            Self::Finished | Self::Killed => Condition::Finished,
            Self::Failed => Condition::Failed,
            Self::Lost | Self::Unknown => Condition::Gone,
        }
    }
}

/// A broker task status update.
///
/// The task id is kept raw: orphaned tasks (left behind by a previous
/// incarnation of this framework) may carry ids we cannot decode, and those
/// are reaped rather than routed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    /// The raw broker task id.
    pub task_id: String,
    /// The reported state.
    pub state: BrokerTaskState,
    /// The agent reporting, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    /// Free-form broker message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Broker-side timestamp.
    pub timestamp: DateTime<Utc>,
}

impl TaskStatus {
    /// Builds a reconciliation query status for a task we believe exists.
    #[must_use]
    pub fn query(task_id: TaskId, agent_id: Option<AgentId>) -> Self {
        Self {
            task_id: task_id.to_string(),
            state: BrokerTaskState::Unknown,
            agent_id,
            message: None,
            timestamp: Utc::now(),
        }
    }

    /// Decodes the instance id and incarnation, if the task id is ours.
    #[must_use]
    pub fn decode(&self) -> Option<(InstanceId, u64)> {
        self.task_id
            .parse::<TaskId>()
            .ok()
            .map(|id| (id.instance_id(), id.incarnation()))
    }
}

/// Master identity delivered on (re-)registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterInfo {
    /// The master's id.
    pub id: String,
    /// The master's advertised version, semver formatted.
    pub version: String,
    /// The master's fault domain, if it reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault_domain: Option<FaultDomain>,
}

/// Decline/accept filters: how long the broker should withhold re-offering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferFilters {
    /// Refuse duration in seconds. Zero asks for immediate re-offer.
    pub refuse_seconds: f64,
}

impl OfferFilters {
    /// Creates filters with the given refuse duration.
    #[must_use]
    pub const fn refuse(refuse_seconds: f64) -> Self {
        Self { refuse_seconds }
    }

    /// Filters requesting immediate re-offer of the residue.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            refuse_seconds: 0.0,
        }
    }
}

/// The outbound broker interface.
///
/// Implementations wrap a real broker SDK; tests use
/// [`memory::RecordingDriver`]. All launches for one offer arrive in a
/// single `accept_offer` call.
#[async_trait]
pub trait BrokerDriver: Send + Sync {
    /// Accepts an offer, launching the given tasks on its agent.
    ///
    /// # Errors
    ///
    /// Returns a broker error on transport failure; the caller retries with
    /// backoff and eventually fails the affected instances.
    async fn accept_offer(
        &self,
        offer_id: &OfferId,
        launches: &[TaskInfo],
        filters: OfferFilters,
    ) -> Result<()>;

    /// Declines an offer.
    ///
    /// # Errors
    ///
    /// Returns a broker error on transport failure.
    async fn decline_offer(&self, offer_id: &OfferId, filters: OfferFilters) -> Result<()>;

    /// Kills one task by id.
    ///
    /// # Errors
    ///
    /// Returns a broker error on transport failure.
    async fn kill_task(&self, task_id: &TaskId) -> Result<()>;

    /// Kills a task whose id we could not decode (orphan reaping).
    ///
    /// # Errors
    ///
    /// Returns a broker error on transport failure.
    async fn kill_raw_task(&self, task_id: &str) -> Result<()>;

    /// Requests explicit reconciliation for the given tasks. The broker
    /// answers through the ordinary status-update callback.
    ///
    /// # Errors
    ///
    /// Returns a broker error on transport failure.
    async fn reconcile_tasks(&self, statuses: &[TaskStatus]) -> Result<()>;
}
