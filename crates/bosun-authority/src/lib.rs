//! # bosun-authority
//!
//! The single-writer state authority at the core of the bosun workload
//! scheduler. It sits between operators and a lower-level resource broker,
//! maintaining desired and observed state for every task instance and
//! driving the broker to match intent.
//!
//! ## Core Concepts
//!
//! - **RunSpec**: declarative intent — what to keep running, with which
//!   resources, where
//! - **Instance**: one logical slot of a run spec, carrying a goal
//!   (Running/Stopped/Decommissioned) and an observed condition
//! - **Snapshot**: immutable point-in-time view of all authoritative state,
//!   atomically published after every committed transition
//! - **Effect**: the externally observable consequence of applying an input
//!   event — persistence writes, launch/kill calls, acknowledgements
//!
//! ## Guarantees
//!
//! - **Single writer**: one bounded queue, one consumer, strict arrival
//!   order; rejected commands never partially mutate state
//! - **Durable before acknowledged**: the journal acknowledges the
//!   transition before the snapshot is published or the requester sees
//!   `CommandAccepted`
//! - **Deterministic**: reduction and offer planning are pure functions of
//!   their inputs; replaying the journal rebuilds the exact state
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use bosun_authority::authority::StateAuthority;
//! use bosun_authority::config::SchedulerConfig;
//! use bosun_authority::journal::memory::InMemoryJournal;
//! use bosun_authority::journal::Journal;
//! use bosun_authority::protocol::{Command, InputEvent};
//! use bosun_authority::snapshot::SnapshotCell;
//! use bosun_authority::spec::{RunSpec, RunSpecRef};
//!
//! # async fn example() {
//! let config = SchedulerConfig::default();
//! let journal: Arc<dyn Journal> = Arc::new(InMemoryJournal::new());
//! let snapshots = SnapshotCell::new();
//! let (effect_tx, _effects) = tokio::sync::mpsc::channel(64);
//!
//! let (authority, handle) = StateAuthority::new(&config, journal, snapshots, effect_tx);
//! tokio::spawn(authority.run());
//!
//! handle
//!     .send(InputEvent::LeadershipAcquired { fencing_token: 1 })
//!     .await
//!     .expect("pipeline alive");
//! handle
//!     .try_submit(InputEvent::CommandRequest {
//!         request_id: bosun_core::RequestId::new("req-1"),
//!         command: Command::PutRunSpec {
//!             spec: RunSpec::new(RunSpecRef::new("/svc/api", "v1"), "./server"),
//!         },
//!     })
//!     .expect("queue has capacity");
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod authority;
pub mod broker;
pub mod config;
pub mod crash;
pub mod effects;
pub mod error;
pub mod instance;
pub mod journal;
pub mod leader;
pub mod metrics;
pub mod protocol;
pub mod reconciler;
pub mod snapshot;
pub mod spec;
pub mod tracker;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::authority::{AuthorityHandle, StateAuthority};
    pub use crate::broker::{BrokerDriver, Offer, TaskInfo, TaskStatus};
    pub use crate::config::SchedulerConfig;
    pub use crate::crash::CrashHandler;
    pub use crate::effects::{CommandOutcome, EffectRouter, ResponseRegistry, RetryPolicy};
    pub use crate::error::{Error, Result};
    pub use crate::instance::{Condition, Goal, Instance};
    pub use crate::journal::{Journal, JournalTransaction};
    pub use crate::leader::{gate::LeadershipGate, LeaderElector, LeadershipResult};
    pub use crate::protocol::{Command, Effect, InputEvent, Rejection, RejectionKind};
    pub use crate::reconciler::OfferReconciler;
    pub use crate::snapshot::{Snapshot, SnapshotCell, SnapshotDelta};
    pub use crate::spec::{ResourceRequirements, RunSpec, RunSpecRef};
    pub use crate::tracker::InstanceTracker;
}
