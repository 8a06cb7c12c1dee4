//! Immutable point-in-time views of authoritative state.
//!
//! A [`Snapshot`] holds the two hot mappings (run specs and instances), the
//! framework registration singleton, and in-flight offer reservations. It is
//! value-semantic: applying a delta produces a new snapshot that shares
//! unchanged entries with its predecessor (entries are `Arc`'d; a mutation
//! clones the map of pointers and replaces only the touched entry).
//!
//! Only the authority worker constructs new snapshots. Everyone else reads
//! the most recently published one through [`SnapshotCell`].
//!
//! [`SnapshotDelta`] is the journaled unit: folding a replayed delta stream
//! over [`Snapshot::empty`] rebuilds the state exactly.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use bosun_core::{FrameworkId, InstanceId, OfferId};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::instance::Instance;
use crate::spec::{RunSpec, RunSpecRef};

/// The broker registration singleton.
///
/// Created when the broker first assigns a framework id; the id must survive
/// restarts (it names all our running tasks on the broker side) and is only
/// deleted by an explicit suicide-with-reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameworkRegistration {
    /// The id the broker assigned to this framework.
    pub framework_id: FrameworkId,
    /// The master we last (re-)registered with.
    pub master_id: String,
}

/// One journaled state transition.
///
/// Deltas describe state, never external effects: broker calls are not
/// replayed, they are reconciled after replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum SnapshotDelta {
    /// A run spec was created or replaced.
    RunSpecPut {
        /// The new spec value.
        spec: RunSpec,
    },
    /// A run spec was removed.
    RunSpecRemoved {
        /// The removed reference.
        reference: RunSpecRef,
    },
    /// An instance was created or its record replaced.
    InstanceUpserted {
        /// The new instance value.
        instance: Instance,
    },
    /// An instance record was destroyed.
    InstanceRemoved {
        /// The removed instance id.
        id: InstanceId,
    },
    /// Instances were reserved against an offer pending broker accept.
    ReservationRecorded {
        /// The offer the instances are committed to.
        offer_id: OfferId,
        /// The reserved instances, in placement order.
        instance_ids: Vec<InstanceId>,
    },
    /// An offer's reservation was released (accepted, rolled back, or
    /// rescinded).
    ReservationCleared {
        /// The offer whose reservation is gone.
        offer_id: OfferId,
    },
    /// The broker assigned (or re-confirmed) our framework registration.
    FrameworkRegistered {
        /// The registration value.
        registration: FrameworkRegistration,
    },
    /// The framework registration was explicitly reset.
    FrameworkCleared,
}

/// Immutable mapping of refs to specs, ids to instances, plus the framework
/// registration and pending reservations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    run_specs: HashMap<RunSpecRef, Arc<RunSpec>>,
    instances: HashMap<InstanceId, Arc<Instance>>,
    reservations: HashMap<OfferId, Vec<InstanceId>>,
    framework: Option<FrameworkRegistration>,
    version: u64,
}

impl Snapshot {
    /// The empty snapshot every replay folds from.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// The transaction id of the last applied command, 0 if none.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Looks up a run spec.
    #[must_use]
    pub fn run_spec(&self, reference: &RunSpecRef) -> Option<&Arc<RunSpec>> {
        self.run_specs.get(reference)
    }

    /// Looks up an instance.
    #[must_use]
    pub fn instance(&self, id: InstanceId) -> Option<&Arc<Instance>> {
        self.instances.get(&id)
    }

    /// Iterates all instances in unspecified order.
    pub fn instances(&self) -> impl Iterator<Item = &Arc<Instance>> {
        self.instances.values()
    }

    /// Iterates all run specs in unspecified order.
    pub fn run_specs(&self) -> impl Iterator<Item = &Arc<RunSpec>> {
        self.run_specs.values()
    }

    /// Returns the number of instance records.
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Returns true when any instance still references the given spec.
    #[must_use]
    pub fn spec_in_use(&self, reference: &RunSpecRef) -> bool {
        self.instances
            .values()
            .any(|instance| instance.spec_ref == *reference)
    }

    /// Returns the instances reserved against an offer, if any.
    #[must_use]
    pub fn reservation(&self, offer_id: &OfferId) -> Option<&[InstanceId]> {
        self.reservations.get(offer_id).map(Vec::as_slice)
    }

    /// Iterates the offers with pending reservations.
    pub fn reserved_offers(&self) -> impl Iterator<Item = &OfferId> {
        self.reservations.keys()
    }

    /// The framework registration, if the broker has assigned one.
    #[must_use]
    pub const fn framework(&self) -> Option<&FrameworkRegistration> {
        self.framework.as_ref()
    }

    /// Applies a delta in place. Used by the reducer on a working copy and
    /// by replay folding; published snapshots are never mutated.
    pub fn apply(&mut self, delta: &SnapshotDelta) {
        match delta {
            SnapshotDelta::RunSpecPut { spec } => {
                self.run_specs
                    .insert(spec.reference.clone(), Arc::new(spec.clone()));
            }
            SnapshotDelta::RunSpecRemoved { reference } => {
                self.run_specs.remove(reference);
            }
            SnapshotDelta::InstanceUpserted { instance } => {
                self.instances.insert(instance.id, Arc::new(instance.clone()));
            }
            SnapshotDelta::InstanceRemoved { id } => {
                self.instances.remove(id);
            }
            SnapshotDelta::ReservationRecorded {
                offer_id,
                instance_ids,
            } => {
                self.reservations
                    .insert(offer_id.clone(), instance_ids.clone());
            }
            SnapshotDelta::ReservationCleared { offer_id } => {
                self.reservations.remove(offer_id);
            }
            SnapshotDelta::FrameworkRegistered { registration } => {
                self.framework = Some(registration.clone());
            }
            SnapshotDelta::FrameworkCleared => {
                self.framework = None;
            }
        }
    }

    /// Stamps the snapshot with the transaction that produced it.
    pub fn set_version(&mut self, transaction_id: u64) {
        self.version = transaction_id;
    }

    /// Folds a delta stream over the empty snapshot.
    #[must_use]
    pub fn fold<'a>(deltas: impl IntoIterator<Item = &'a SnapshotDelta>) -> Self {
        let mut snapshot = Self::empty();
        for delta in deltas {
            snapshot.apply(delta);
        }
        snapshot
    }

    /// Checks the state invariants.
    ///
    /// Called as the reducer postcondition; a violation here is a
    /// programming error and escalates to the crash strategy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolated`] naming the broken invariant.
    pub fn validate(&self) -> Result<()> {
        for instance in self.instances.values() {
            if !self.run_specs.contains_key(&instance.spec_ref) {
                return Err(Error::InvariantViolated {
                    message: format!(
                        "instance {} references missing run spec {}",
                        instance.id, instance.spec_ref
                    ),
                });
            }
        }
        for (offer_id, instance_ids) in &self.reservations {
            for id in instance_ids {
                if !self.instances.contains_key(id) {
                    return Err(Error::InvariantViolated {
                        message: format!(
                            "reservation for offer {offer_id} references missing instance {id}"
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Read-shared cell holding the most recently published snapshot.
///
/// Publication is an atomic pointer swap: readers clone an `Arc` and observe
/// a consistent view no matter how long they hold it.
#[derive(Debug, Clone, Default)]
pub struct SnapshotCell {
    current: Arc<RwLock<Arc<Snapshot>>>,
}

impl SnapshotCell {
    /// Creates a cell holding the empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current snapshot.
    ///
    /// The guarded value is a bare pointer swap, so a poisoned lock cannot
    /// hold torn data; readers recover the inner value.
    #[must_use]
    pub fn load(&self) -> Arc<Snapshot> {
        Arc::clone(
            &self
                .current
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        )
    }

    /// Atomically publishes a new snapshot.
    pub fn publish(&self, snapshot: Arc<Snapshot>) {
        *self
            .current
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = snapshot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::Goal;
    use chrono::Utc;

    fn spec(path: &str, version: &str) -> RunSpec {
        RunSpec::new(RunSpecRef::new(path, version), "./run")
    }

    fn scheduled_instance(spec_ref: RunSpecRef) -> Instance {
        Instance::scheduled(InstanceId::generate(), spec_ref, Goal::Running, Utc::now())
    }

    #[test]
    fn apply_put_then_lookup() {
        let mut snapshot = Snapshot::empty();
        snapshot.apply(&SnapshotDelta::RunSpecPut {
            spec: spec("/svc", "v1"),
        });

        let reference = RunSpecRef::new("/svc", "v1");
        assert!(snapshot.run_spec(&reference).is_some());
        assert!(snapshot.run_spec(&RunSpecRef::new("/svc", "v2")).is_none());
    }

    #[test]
    fn fold_equals_sequential_apply() {
        let instance = scheduled_instance(RunSpecRef::new("/svc", "v1"));
        let deltas = vec![
            SnapshotDelta::RunSpecPut {
                spec: spec("/svc", "v1"),
            },
            SnapshotDelta::InstanceUpserted {
                instance: instance.clone(),
            },
            SnapshotDelta::RunSpecPut {
                spec: spec("/other", "v9"),
            },
            SnapshotDelta::RunSpecRemoved {
                reference: RunSpecRef::new("/other", "v9"),
            },
        ];

        let folded = Snapshot::fold(&deltas);

        let mut sequential = Snapshot::empty();
        for delta in &deltas {
            sequential.apply(delta);
        }

        assert_eq!(folded.instance_count(), 1);
        assert_eq!(sequential.instance_count(), 1);
        assert!(folded.run_spec(&RunSpecRef::new("/other", "v9")).is_none());
        assert_eq!(
            folded.instance(instance.id).map(|i| i.incarnation),
            sequential.instance(instance.id).map(|i| i.incarnation)
        );
    }

    #[test]
    fn snapshots_share_untouched_entries() {
        let mut base = Snapshot::empty();
        base.apply(&SnapshotDelta::RunSpecPut {
            spec: spec("/svc", "v1"),
        });
        let untouched = scheduled_instance(RunSpecRef::new("/svc", "v1"));
        base.apply(&SnapshotDelta::InstanceUpserted {
            instance: untouched.clone(),
        });

        let mut next = base.clone();
        next.apply(&SnapshotDelta::RunSpecPut {
            spec: spec("/svc", "v2"),
        });

        // The untouched instance entry is the same allocation in both.
        let before = base.instance(untouched.id).expect("present");
        let after = next.instance(untouched.id).expect("present");
        assert!(Arc::ptr_eq(before, after));
    }

    #[test]
    fn validate_catches_dangling_instance_ref() {
        let mut snapshot = Snapshot::empty();
        snapshot.apply(&SnapshotDelta::InstanceUpserted {
            instance: scheduled_instance(RunSpecRef::new("/ghost", "v1")),
        });

        let err = snapshot.validate().expect_err("must flag dangling ref");
        assert!(err.is_terminal());
    }

    #[test]
    fn validate_catches_reservation_of_missing_instance() {
        let mut snapshot = Snapshot::empty();
        snapshot.apply(&SnapshotDelta::ReservationRecorded {
            offer_id: OfferId::new("offer-1"),
            instance_ids: vec![InstanceId::generate()],
        });

        assert!(snapshot.validate().is_err());
    }

    #[test]
    fn spec_in_use_tracks_references() {
        let mut snapshot = Snapshot::empty();
        let reference = RunSpecRef::new("/svc", "v1");
        snapshot.apply(&SnapshotDelta::RunSpecPut {
            spec: spec("/svc", "v1"),
        });
        assert!(!snapshot.spec_in_use(&reference));

        let instance = scheduled_instance(reference.clone());
        snapshot.apply(&SnapshotDelta::InstanceUpserted {
            instance: instance.clone(),
        });
        assert!(snapshot.spec_in_use(&reference));

        snapshot.apply(&SnapshotDelta::InstanceRemoved { id: instance.id });
        assert!(!snapshot.spec_in_use(&reference));
    }

    #[test]
    fn cell_publishes_atomically() {
        let cell = SnapshotCell::new();
        assert_eq!(cell.load().version(), 0);

        let mut next = Snapshot::empty();
        next.set_version(7);
        cell.publish(Arc::new(next));

        assert_eq!(cell.load().version(), 7);
    }

    #[test]
    fn delta_round_trips_through_json() {
        let delta = SnapshotDelta::InstanceUpserted {
            instance: scheduled_instance(RunSpecRef::new("/svc", "v1")),
        };
        let json = serde_json::to_string(&delta).expect("serialize");
        let back: SnapshotDelta = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, delta);
    }
}
