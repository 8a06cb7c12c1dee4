//! The inbound broker callback surface.
//!
//! A broker SDK binding calls these methods; the bridge translates them into
//! authority input events, offer reconciliation, and tracker ingestion. The
//! minimum-broker-version gate lives here: a master older than the
//! configured floor triggers the crash strategy *without* clearing the
//! persisted framework id, so a correctly-versioned successor reattaches to
//! the same framework.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use semver::Version;

use bosun_core::{AgentId, FrameworkId, OfferId};

use super::{MasterInfo, Offer, TaskStatus};
use crate::authority::AuthorityHandle;
use crate::crash::CrashHandler;
use crate::protocol::InputEvent;
use crate::reconciler::OfferReconciler;
use crate::tracker::InstanceTracker;

/// Routes broker callbacks into the core.
pub struct BrokerBridge {
    authority: AuthorityHandle,
    tracker: Arc<InstanceTracker>,
    reconciler: Arc<OfferReconciler>,
    min_broker_version: Version,
    crash: CrashHandler,
}

impl BrokerBridge {
    /// Creates the bridge.
    #[must_use]
    pub fn new(
        authority: AuthorityHandle,
        tracker: Arc<InstanceTracker>,
        reconciler: Arc<OfferReconciler>,
        min_broker_version: Version,
        crash: CrashHandler,
    ) -> Self {
        Self {
            authority,
            tracker,
            reconciler,
            min_broker_version,
            crash,
        }
    }

    /// Enforces the version floor. Returns false (and triggers the crash
    /// strategy) when the master is too old or its version is unreadable.
    fn version_acceptable(&self, advertised: &str) -> bool {
        match Version::parse(advertised) {
            Ok(version) if version >= self.min_broker_version => true,
            Ok(version) => {
                self.crash.terminal(&format!(
                    "broker version {version} below required {}",
                    self.min_broker_version
                ));
                false
            }
            Err(err) => {
                self.crash
                    .terminal(&format!("unparseable broker version '{advertised}': {err}"));
                false
            }
        }
    }

    /// The broker completed the first handshake and assigned our framework
    /// id.
    pub async fn registered(&self, framework_id: FrameworkId, master: MasterInfo) {
        if !self.version_acceptable(&master.version) {
            return;
        }
        tracing::info!(framework = %framework_id, master = %master.id, "registered with broker");
        let event = InputEvent::FrameworkRegistered {
            framework_id,
            master_id: master.id,
            version: master.version,
            fault_domain: master.fault_domain,
        };
        if let Err(rejection) = self.authority.send(event).await {
            tracing::warn!(%rejection, "registration event not delivered");
        }
    }

    /// The broker re-handshook, typically after a master failover.
    pub async fn reregistered(&self, master: MasterInfo) {
        if !self.version_acceptable(&master.version) {
            return;
        }
        tracing::info!(master = %master.id, "re-registered with broker");
        let event = InputEvent::FrameworkReregistered {
            master_id: master.id,
            version: master.version,
            fault_domain: master.fault_domain,
        };
        if let Err(rejection) = self.authority.send(event).await {
            tracing::warn!(%rejection, "re-registration event not delivered");
        }
    }

    /// The broker connection dropped; the SDK will reconnect on its own.
    pub fn disconnected(&self) {
        tracing::warn!("broker connection lost");
    }

    /// The broker reported an unrecoverable framework-level error.
    pub fn error(&self, message: &str) {
        self.crash.terminal(&format!("broker framework error: {message}"));
    }

    /// A batch of resource offers arrived. Offers are independent and are
    /// reconciled with bounded concurrency.
    pub async fn resource_offers(&self, offers: Vec<Offer>) {
        const MAX_IN_FLIGHT_OFFERS: usize = 4;

        stream::iter(offers)
            .for_each_concurrent(MAX_IN_FLIGHT_OFFERS, |offer| async {
                if let Err(err) = self.reconciler.handle_offer(offer).await {
                    tracing::warn!(error = %err, "offer handling failed");
                }
            })
            .await;
    }

    /// A task status update arrived.
    pub async fn status_update(&self, status: TaskStatus) {
        self.tracker.handle_status(status).await;
    }

    /// An executor sent a framework message. Logged only.
    pub fn framework_message(&self, agent_id: &AgentId, bytes: usize) {
        tracing::debug!(agent = %agent_id, bytes, "framework message ignored");
    }

    /// The broker withdrew an offer; pending reservations for it roll back.
    pub async fn offer_rescinded(&self, offer_id: OfferId) {
        tracing::debug!(offer = %offer_id, "offer rescinded");
        if let Err(rejection) = self
            .authority
            .send(InputEvent::OfferRescinded { offer_id })
            .await
        {
            tracing::warn!(%rejection, "rescind event not delivered");
        }
    }

    /// An agent was lost. Task fates arrive as status updates; logged only.
    pub fn agent_lost(&self, agent_id: &AgentId) {
        tracing::warn!(agent = %agent_id, "agent lost");
    }

    /// An executor terminated. Task fates arrive as status updates; logged
    /// only.
    pub fn executor_lost(&self, agent_id: &AgentId, status: i32) {
        tracing::warn!(agent = %agent_id, status, "executor lost");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::StateAuthority;
    use crate::broker::memory::RecordingDriver;
    use crate::broker::BrokerDriver;
    use crate::config::SchedulerConfig;
    use crate::journal::memory::InMemoryJournal;
    use crate::journal::Journal;
    use crate::protocol::{Effect, Notification};
    use crate::snapshot::SnapshotCell;
    use std::sync::atomic::{AtomicI32, Ordering};
    use tokio::sync::mpsc;

    struct Harness {
        bridge: BrokerBridge,
        effects: mpsc::Receiver<Effect>,
        handle: AuthorityHandle,
        exit_code: Arc<AtomicI32>,
        snapshots: SnapshotCell,
    }

    fn harness() -> Harness {
        let journal: Arc<dyn Journal> = Arc::new(InMemoryJournal::new());
        let snapshots = SnapshotCell::new();
        let (effect_tx, effects) = mpsc::channel(64);
        let config = SchedulerConfig::default();
        let (authority, handle) =
            StateAuthority::new(&config, journal, snapshots.clone(), effect_tx);
        tokio::spawn(authority.run());

        let driver = Arc::new(RecordingDriver::new());
        let tracker = InstanceTracker::new(
            handle.clone(),
            Arc::clone(&driver) as Arc<dyn BrokerDriver>,
            snapshots.clone(),
        );
        let reconciler = Arc::new(OfferReconciler::new(
            handle.clone(),
            snapshots.clone(),
            driver as Arc<dyn BrokerDriver>,
            &config,
        ));

        let exit_code = Arc::new(AtomicI32::new(-1));
        let seen = Arc::clone(&exit_code);
        let crash = CrashHandler::with_exit(move |code| {
            seen.store(code, Ordering::SeqCst);
        });

        let bridge = BrokerBridge::new(
            handle.clone(),
            tracker,
            reconciler,
            Version::new(1, 8, 0),
            crash,
        );
        Harness {
            bridge,
            effects,
            handle,
            exit_code,
            snapshots,
        }
    }

    fn master(version: &str) -> MasterInfo {
        MasterInfo {
            id: "master-1".to_string(),
            version: version.to_string(),
            fault_domain: None,
        }
    }

    async fn activate(harness: &mut Harness) {
        harness
            .handle
            .send(InputEvent::LeadershipAcquired { fencing_token: 1 })
            .await
            .expect("send");
        let effect = harness.effects.recv().await.expect("effect");
        assert!(matches!(
            effect,
            Effect::Notify {
                event: Notification::LeaderElected { .. }
            }
        ));
    }

    #[tokio::test]
    async fn registration_persists_framework_id() {
        let mut harness = harness();
        activate(&mut harness).await;

        harness
            .bridge
            .registered(FrameworkId::new("fw-1"), master("1.11.0"))
            .await;

        // The registration is journaled.
        let effect = harness.effects.recv().await.expect("effect");
        assert!(matches!(effect, Effect::Persist { .. }));

        let snapshot = harness.snapshots.load();
        let registration = snapshot.framework().expect("registered");
        assert_eq!(registration.framework_id, FrameworkId::new("fw-1"));
        assert_eq!(registration.master_id, "master-1");
        assert_eq!(harness.exit_code.load(Ordering::SeqCst), -1);
    }

    #[tokio::test]
    async fn old_broker_version_triggers_crash_without_registration() {
        let mut harness = harness();
        activate(&mut harness).await;

        harness
            .bridge
            .registered(FrameworkId::new("fw-1"), master("1.2.0"))
            .await;

        assert_eq!(
            harness.exit_code.load(Ordering::SeqCst),
            crate::crash::EXIT_TERMINAL
        );
        assert!(harness.snapshots.load().framework().is_none());
    }

    #[tokio::test]
    async fn unparseable_version_triggers_crash() {
        let mut harness = harness();
        activate(&mut harness).await;

        harness
            .bridge
            .registered(FrameworkId::new("fw-1"), master("not-a-version"))
            .await;

        assert_eq!(
            harness.exit_code.load(Ordering::SeqCst),
            crate::crash::EXIT_TERMINAL
        );
    }

    #[tokio::test]
    async fn framework_error_triggers_crash() {
        let harness = harness();
        harness.bridge.error("framework removed");
        assert_eq!(
            harness.exit_code.load(Ordering::SeqCst),
            crate::crash::EXIT_TERMINAL
        );
    }

    #[tokio::test]
    async fn reregistration_updates_master_id() {
        let mut harness = harness();
        activate(&mut harness).await;

        harness
            .bridge
            .registered(FrameworkId::new("fw-1"), master("1.11.0"))
            .await;
        let _ = harness.effects.recv().await.expect("persist");

        let mut next_master = master("1.11.0");
        next_master.id = "master-2".to_string();
        harness.bridge.reregistered(next_master).await;
        let _ = harness.effects.recv().await.expect("persist");

        let snapshot = harness.snapshots.load();
        assert_eq!(
            snapshot.framework().expect("registered").master_id,
            "master-2"
        );
    }
}
