//! Bosun scheduler service.
//!
//! Wires the state authority, effect router, tracker, reconciler, and
//! leadership gate for single-process operation. Highly-available mode
//! requires an external persistence-coordinator binding and is rejected at
//! startup here.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use bosun_authority::authority::StateAuthority;
use bosun_authority::broker::{BrokerDriver, OfferFilters, TaskInfo, TaskStatus};
use bosun_authority::config::SchedulerConfig;
use bosun_authority::crash::{CrashHandler, EXIT_GRACEFUL, EXIT_MISCONFIGURED};
use bosun_authority::effects::{EffectRouter, RetryPolicy};
use bosun_authority::error::Result;
use bosun_authority::journal::memory::InMemoryJournal;
use bosun_authority::journal::Journal;
use bosun_authority::leader::gate::LeadershipGate;
use bosun_authority::leader::memory::InMemoryLeaderElector;
use bosun_authority::leader::LeaderElector;
use bosun_authority::protocol::{InputEvent, Notification};
use bosun_authority::reconciler::OfferReconciler;
use bosun_authority::snapshot::SnapshotCell;
use bosun_authority::tracker::InstanceTracker;
use bosun_core::observability::{init_logging, LogOptions};
use bosun_core::{OfferId, TaskId};

/// Broker driver for standalone operation: every outbound call is logged
/// and acknowledged. Replace with a real SDK binding for cluster use.
struct StandaloneDriver;

#[async_trait]
impl BrokerDriver for StandaloneDriver {
    async fn accept_offer(
        &self,
        offer_id: &OfferId,
        launches: &[TaskInfo],
        filters: OfferFilters,
    ) -> Result<()> {
        tracing::info!(offer = %offer_id, launches = launches.len(), refuse = filters.refuse_seconds, "accept offer");
        Ok(())
    }

    async fn decline_offer(&self, offer_id: &OfferId, filters: OfferFilters) -> Result<()> {
        tracing::info!(offer = %offer_id, refuse = filters.refuse_seconds, "decline offer");
        Ok(())
    }

    async fn kill_task(&self, task_id: &TaskId) -> Result<()> {
        tracing::info!(task = %task_id, "kill task");
        Ok(())
    }

    async fn kill_raw_task(&self, task_id: &str) -> Result<()> {
        tracing::info!(task = %task_id, "kill orphan task");
        Ok(())
    }

    async fn reconcile_tasks(&self, statuses: &[TaskStatus]) -> Result<()> {
        tracing::info!(tasks = statuses.len(), "reconcile tasks");
        Ok(())
    }
}

fn instance_identity() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    format!("{host}:{}", std::process::id())
}

#[tokio::main]
async fn main() {
    init_logging(&LogOptions::from_env());

    let config = match SchedulerConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            std::process::exit(EXIT_MISCONFIGURED);
        }
    };
    if config.highly_available {
        tracing::error!(
            "highly-available mode requires an external coordinator binding; \
             run with BOSUN_HIGHLY_AVAILABLE=false"
        );
        std::process::exit(EXIT_MISCONFIGURED);
    }

    let crash = CrashHandler::process();
    let journal: Arc<dyn Journal> = Arc::new(InMemoryJournal::new());
    let snapshots = SnapshotCell::new();
    let (effect_tx, effect_rx) = mpsc::channel(config.command_queue_capacity);

    let (authority, handle) =
        StateAuthority::new(&config, journal, snapshots.clone(), effect_tx);

    let driver: Arc<dyn BrokerDriver> = Arc::new(StandaloneDriver);
    let (router, _responses, notifications) = EffectRouter::new(
        effect_rx,
        Arc::clone(&driver),
        handle.clone(),
        RetryPolicy::default(),
    );
    let tracker = InstanceTracker::new(handle.clone(), Arc::clone(&driver), snapshots.clone());
    let _reconciler = Arc::new(OfferReconciler::new(
        handle.clone(),
        snapshots.clone(),
        Arc::clone(&driver),
        &config,
    ));

    let elector: Arc<dyn LeaderElector> = Arc::new(InMemoryLeaderElector::default());
    let gate = LeadershipGate::new(elector, handle.clone(), tracker, instance_identity());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut authority_task = tokio::spawn(authority.run());
    let router_task = tokio::spawn(router.run());
    let gate_crash = crash.clone();
    let gate_task = tokio::spawn(async move {
        if let Err(err) = gate.run(shutdown_rx).await {
            gate_crash.terminal(&format!("leadership gate failed: {err}"));
        }
    });

    tracing::info!("bosun scheduler running, ctrl-c to stop");
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                crash.terminal(&format!("signal handler failed: {err}"));
                return;
            }
        }
        joined = &mut authority_task => {
            // The pipeline died without a shutdown event: terminal tier.
            // Announce, release leadership, and let the detached exit fire.
            let _ = notifications.send(Notification::SchedulerDisconnected);
            let _ = shutdown_tx.send(true);
            match joined {
                Ok(Err(err)) => crash.terminal(&format!("state authority failed: {err}")),
                Ok(Ok(())) => crash.terminal("state authority stopped unexpectedly"),
                Err(join_err) => crash.terminal(&format!("state authority panicked: {join_err}")),
            }
            return;
        }
    }

    tracing::info!("shutting down");
    let _ = shutdown_tx.send(true);
    let _ = gate_task.await;
    let _ = handle.send(InputEvent::Shutdown).await;
    let _ = authority_task.await;
    let _ = router_task.await;

    std::process::exit(EXIT_GRACEFUL);
}
