//! The offer reconciler: turns `(snapshot, offer)` into placements.
//!
//! Planning is a pure function — given the same snapshot and offer it
//! produces the same placement list, oldest instance first, packed
//! first-fit. The reconciler then commits the plan by submitting a single
//! `ReservePlacements` command; the authority's reduction emits the
//! broker-facing launch batch. Offers nothing fits go straight to a decline
//! with the configured refuse duration.

use std::sync::Arc;

use bosun_core::InstanceId;

use crate::authority::AuthorityHandle;
use crate::broker::{BrokerDriver, Offer, OfferFilters};
use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::metrics::AuthorityMetrics;
use crate::protocol::{Command, InputEvent};
use crate::snapshot::{Snapshot, SnapshotCell};

/// Computes the deterministic placement list for one offer.
///
/// Candidates are instances with condition=Scheduled and goal=Running,
/// ordered oldest-first (creation time, instance id as tiebreak). Each
/// candidate is tested against the offer's remaining resources, attribute
/// constraints, and the spec's fault-domain preference; fits are packed
/// first-fit until nothing more fits.
#[must_use]
pub fn plan_placements(snapshot: &Snapshot, offer: &Offer) -> Vec<InstanceId> {
    let mut candidates: Vec<_> = snapshot
        .instances()
        .filter(|instance| instance.is_launchable())
        .collect();
    candidates.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut remaining = offer.resources;
    let mut placements = Vec::new();

    for instance in candidates {
        let Some(spec) = snapshot.run_spec(&instance.spec_ref) else {
            continue;
        };
        if !remaining.can_hold(&spec.resources) {
            continue;
        }
        if !spec
            .constraints
            .iter()
            .all(|constraint| constraint.is_satisfied_by(&offer.attributes))
        {
            continue;
        }
        if let Some(preference) = &spec.fault_domain {
            match &offer.domain {
                Some(domain) if preference.accepts(domain) => {}
                _ => continue,
            }
        }

        remaining = remaining.minus(&spec.resources);
        placements.push(instance.id);
    }

    placements
}

/// Drives offers through planning and into the authority.
pub struct OfferReconciler {
    authority: AuthorityHandle,
    snapshots: SnapshotCell,
    driver: Arc<dyn BrokerDriver>,
    refuse_seconds: f64,
    metrics: AuthorityMetrics,
}

impl OfferReconciler {
    /// Creates a reconciler.
    #[must_use]
    pub fn new(
        authority: AuthorityHandle,
        snapshots: SnapshotCell,
        driver: Arc<dyn BrokerDriver>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            authority,
            snapshots,
            driver,
            refuse_seconds: config.refuse_offer_seconds,
            metrics: AuthorityMetrics::new(),
        }
    }

    /// Handles one incoming offer.
    ///
    /// Unusable offers are declined directly (no state changes, so no
    /// authority round-trip). Usable offers submit one `ReservePlacements`
    /// command; the launch batch and the accept call flow out of the
    /// authority's effect stream.
    ///
    /// # Errors
    ///
    /// Returns a broker error when the decline call fails; reservation
    /// submission failures degrade to a decline.
    #[tracing::instrument(skip(self, offer), fields(offer = %offer.id, agent = %offer.agent_id))]
    pub async fn handle_offer(&self, offer: Offer) -> Result<()> {
        let snapshot = self.snapshots.load();
        let placements = plan_placements(&snapshot, &offer);

        if placements.is_empty() {
            tracing::debug!("nothing to place, declining offer");
            self.metrics.record_offer("declined");
            return self
                .driver
                .decline_offer(&offer.id, OfferFilters::refuse(self.refuse_seconds))
                .await;
        }

        tracing::info!(placements = placements.len(), "reserving placements");
        let submitted = self.authority.try_submit(InputEvent::CommandRequest {
            request_id: bosun_core::RequestId::generate(),
            command: Command::ReservePlacements {
                offer_id: offer.id.clone(),
                agent_id: offer.agent_id.clone(),
                instance_ids: placements,
            },
        });

        match submitted {
            Ok(()) => {
                self.metrics.record_offer("accepted");
                Ok(())
            }
            Err(rejection) => {
                // The queue is saturated; let the offer go rather than
                // holding it past its validity.
                tracing::warn!(%rejection, "reservation not submitted, declining offer");
                self.metrics.record_offer("declined");
                self.driver
                    .decline_offer(&offer.id, OfferFilters::refuse(self.refuse_seconds))
                    .await
            }
        }
    }
}
