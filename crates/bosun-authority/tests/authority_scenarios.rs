//! End-to-end scenarios for the state authority pipeline: command
//! validation, offer round-trips, goal downgrades, leadership loss, and
//! queue back-pressure, exercised through the public surface.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;

use bosun_authority::authority::{AuthorityHandle, StateAuthority};
use bosun_authority::broker::memory::RecordingDriver;
use bosun_authority::broker::{BrokerDriver, Offer};
use bosun_authority::config::SchedulerConfig;
use bosun_authority::instance::{Condition, Goal};
use bosun_authority::journal::memory::InMemoryJournal;
use bosun_authority::journal::Journal;
use bosun_authority::protocol::{
    Command, Effect, InputEvent, Notification, RejectionKind,
};
use bosun_authority::reconciler::OfferReconciler;
use bosun_authority::snapshot::SnapshotCell;
use bosun_authority::spec::{ResourceRequirements, RunSpec, RunSpecRef};
use bosun_core::{AgentId, InstanceId, OfferId, RequestId};

struct Pipeline {
    handle: AuthorityHandle,
    effects: mpsc::Receiver<Effect>,
    snapshots: SnapshotCell,
    reconciler: OfferReconciler,
    driver: Arc<RecordingDriver>,
    task: tokio::task::JoinHandle<bosun_authority::error::Result<()>>,
}

fn pipeline() -> Pipeline {
    let config = SchedulerConfig::default();
    let journal: Arc<dyn Journal> = Arc::new(InMemoryJournal::new());
    let snapshots = SnapshotCell::new();
    let (effect_tx, effects) = mpsc::channel(256);
    let (authority, handle) =
        StateAuthority::new(&config, journal, snapshots.clone(), effect_tx);
    let task = tokio::spawn(authority.run());

    let driver = Arc::new(RecordingDriver::new());
    let reconciler = OfferReconciler::new(
        handle.clone(),
        snapshots.clone(),
        Arc::clone(&driver) as Arc<dyn BrokerDriver>,
        &config,
    );

    Pipeline {
        handle,
        effects,
        snapshots,
        reconciler,
        driver,
        task,
    }
}

impl Pipeline {
    async fn acquire(&mut self) {
        self.handle
            .send(InputEvent::LeadershipAcquired { fencing_token: 1 })
            .await
            .expect("pipeline alive");
        let effect = self.effects.recv().await.expect("effect");
        assert!(matches!(
            effect,
            Effect::Notify {
                event: Notification::LeaderElected { .. }
            }
        ));
    }

    fn submit(&self, request: &str, command: Command) {
        self.handle
            .try_submit(InputEvent::CommandRequest {
                request_id: RequestId::new(request),
                command,
            })
            .expect("queue has capacity");
    }

    /// Receives effects until the next command outcome, returning it.
    async fn next_outcome(&mut self) -> Effect {
        loop {
            let effect = self.effects.recv().await.expect("effect stream open");
            if effect.is_command_outcome() {
                return effect;
            }
        }
    }

    async fn expect_accepted(&mut self, request: &str) {
        match self.next_outcome().await {
            Effect::CommandAccepted { request_id } => {
                assert_eq!(request_id, RequestId::new(request));
            }
            Effect::CommandFailure {
                request_id,
                rejection,
            } => panic!("request {request_id} rejected: {rejection}"),
            _ => unreachable!(),
        }
    }

    async fn shutdown(mut self) -> Vec<Effect> {
        self.handle
            .send(InputEvent::Shutdown)
            .await
            .expect("pipeline alive");
        self.task.await.expect("join").expect("clean run");

        let mut rest = Vec::new();
        while let Some(effect) = self.effects.recv().await {
            rest.push(effect);
        }
        rest
    }
}

fn svc_spec() -> RunSpec {
    RunSpec::new(RunSpecRef::new("/svc", "v1"), "./server --port 8080")
        .with_resources(ResourceRequirements::new(0.5, 256.0, 0.0))
}

fn offer(id: &str, agent: &str) -> Offer {
    Offer {
        id: OfferId::new(id),
        agent_id: AgentId::new(agent),
        resources: ResourceRequirements::new(1.0, 1024.0, 0.0),
        attributes: std::collections::BTreeMap::new(),
        domain: None,
    }
}

fn status(instance: InstanceId, incarnation: u64, condition: Condition) -> InputEvent {
    InputEvent::StatusUpdate {
        instance_id: instance,
        incarnation,
        condition,
        agent_id: None,
        timestamp: Utc::now(),
    }
}

#[tokio::test]
async fn rejects_add_instance_for_unknown_run_spec() {
    let mut pipeline = pipeline();
    pipeline.acquire().await;

    pipeline.submit(
        "1011",
        Command::AddInstance {
            id: InstanceId::generate(),
            spec_ref: RunSpecRef::new("/lol", "blue"),
            goal: Goal::Running,
        },
    );

    match pipeline.next_outcome().await {
        Effect::CommandFailure {
            request_id,
            rejection,
        } => {
            assert_eq!(request_id, RequestId::new("1011"));
            assert_eq!(rejection.kind, RejectionKind::NoRunSpec);
            assert_eq!(rejection.reason, "No runSpec /lol#blue");
        }
        other => panic!("expected failure, got {other:?}"),
    }

    // End of stream: nothing after the single failure.
    let rest = pipeline.shutdown().await;
    assert!(rest.is_empty(), "unexpected trailing effects: {rest:?}");
}

#[tokio::test]
async fn accepts_and_launches_on_matching_offer() {
    let mut pipeline = pipeline();
    pipeline.acquire().await;

    let instance_id = InstanceId::generate();
    pipeline.submit("put", Command::PutRunSpec { spec: svc_spec() });
    pipeline.submit(
        "add",
        Command::AddInstance {
            id: instance_id,
            spec_ref: RunSpecRef::new("/svc", "v1"),
            goal: Goal::Running,
        },
    );
    pipeline.expect_accepted("put").await;
    pipeline.expect_accepted("add").await;

    pipeline
        .reconciler
        .handle_offer(offer("O", "A"))
        .await
        .expect("offer handled");

    // The reservation command flows through the pipeline: expect its launch
    // batch and the zero-refuse accept.
    let mut launches = Vec::new();
    let accept = loop {
        match pipeline.effects.recv().await.expect("effect") {
            Effect::LaunchTask { agent_id, task } => launches.push((agent_id, task)),
            Effect::AcceptOffer {
                offer_id,
                refuse_seconds,
            } => break (offer_id, refuse_seconds),
            _ => {}
        }
    };

    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].0, AgentId::new("A"));
    assert_eq!(launches[0].1.task_id.instance_id(), instance_id);
    assert_eq!(accept.0, OfferId::new("O"));
    assert!(accept.1.abs() < f64::EPSILON);

    let snapshot = pipeline.snapshots.load();
    let instance = snapshot.instance(instance_id).expect("present");
    assert_eq!(instance.condition, Condition::Provisioned);
    assert_eq!(instance.agent_id, Some(AgentId::new("A")));

    // Nothing was declined.
    assert!(pipeline.driver.calls().is_empty());

    pipeline.shutdown().await;
}

#[tokio::test]
async fn rejects_delete_run_spec_with_dependents() {
    let mut pipeline = pipeline();
    pipeline.acquire().await;

    pipeline.submit("put", Command::PutRunSpec { spec: svc_spec() });
    pipeline.submit(
        "add",
        Command::AddInstance {
            id: InstanceId::generate(),
            spec_ref: RunSpecRef::new("/svc", "v1"),
            goal: Goal::Running,
        },
    );
    pipeline.expect_accepted("put").await;
    pipeline.expect_accepted("add").await;

    pipeline.submit(
        "del",
        Command::DeleteRunSpec {
            reference: RunSpecRef::new("/svc", "v1"),
        },
    );
    match pipeline.next_outcome().await {
        Effect::CommandFailure { rejection, .. } => {
            assert_eq!(rejection.kind, RejectionKind::RunSpecInUse);
        }
        other => panic!("expected failure, got {other:?}"),
    }

    pipeline.shutdown().await;
}

#[tokio::test]
async fn goal_downgrade_kills_then_decommission_forgets() {
    let mut pipeline = pipeline();
    pipeline.acquire().await;

    let instance_id = InstanceId::generate();
    pipeline.submit("put", Command::PutRunSpec { spec: svc_spec() });
    pipeline.submit(
        "add",
        Command::AddInstance {
            id: instance_id,
            spec_ref: RunSpecRef::new("/svc", "v1"),
            goal: Goal::Running,
        },
    );
    pipeline.expect_accepted("put").await;
    pipeline.expect_accepted("add").await;

    // Observed running.
    pipeline
        .handle
        .try_submit(status(instance_id, 1, Condition::Running))
        .expect("submit");

    pipeline.submit(
        "stop",
        Command::UpdateInstanceGoal {
            id: instance_id,
            goal: Goal::Stopped,
        },
    );
    pipeline.expect_accepted("stop").await;

    // The downgrade emits a kill for incarnation 1.
    let kill = loop {
        match pipeline.effects.recv().await.expect("effect") {
            Effect::KillTask {
                instance_id: id,
                incarnation,
                ..
            } => break (id, incarnation),
            _ => {}
        }
    };
    assert_eq!(kill, (instance_id, 1));

    // The kill lands; goal is Stopped, so no replacement is seated.
    pipeline
        .handle
        .try_submit(status(instance_id, 1, Condition::Finished))
        .expect("submit");

    pipeline.submit(
        "decommission",
        Command::UpdateInstanceGoal {
            id: instance_id,
            goal: Goal::Decommissioned,
        },
    );
    pipeline.expect_accepted("decommission").await;

    pipeline.submit("forget", Command::ForgetInstance { id: instance_id });
    pipeline.expect_accepted("forget").await;

    let snapshot = pipeline.snapshots.load();
    assert!(snapshot.instance(instance_id).is_none());
    assert_eq!(snapshot.instance_count(), 0);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn leadership_loss_fails_queued_commands() {
    let mut pipeline = pipeline();
    pipeline.acquire().await;

    pipeline.submit("c1", Command::PutRunSpec { spec: svc_spec() });
    pipeline
        .handle
        .try_submit(InputEvent::LeadershipLost)
        .expect("submit");
    pipeline.submit(
        "c2",
        Command::PutRunSpec {
            spec: RunSpec::new(RunSpecRef::new("/other", "v1"), "./run"),
        },
    );
    pipeline.submit(
        "c3",
        Command::DeleteRunSpec {
            reference: RunSpecRef::new("/svc", "v1"),
        },
    );

    match pipeline.next_outcome().await {
        Effect::CommandAccepted { request_id } => {
            assert_eq!(request_id, RequestId::new("c1"));
        }
        other => panic!("first command should commit, got {other:?}"),
    }
    for expected in ["c2", "c3"] {
        match pipeline.next_outcome().await {
            Effect::CommandFailure {
                request_id,
                rejection,
            } => {
                assert_eq!(request_id, RequestId::new(expected));
                assert_eq!(rejection.kind, RejectionKind::LeadershipLost);
            }
            other => panic!("expected leadership failure, got {other:?}"),
        }
    }

    // Effects are suppressed while leadership is lost: nothing but the two
    // failures after c1's commit.
    let rest = pipeline.shutdown().await;
    assert!(rest.is_empty(), "unexpected trailing effects: {rest:?}");
}

#[tokio::test]
async fn rejects_goal_upgrade_from_decommissioned() {
    let mut pipeline = pipeline();
    pipeline.acquire().await;

    let instance_id = InstanceId::generate();
    pipeline.submit("put", Command::PutRunSpec { spec: svc_spec() });
    pipeline.submit(
        "add",
        Command::AddInstance {
            id: instance_id,
            spec_ref: RunSpecRef::new("/svc", "v1"),
            goal: Goal::Running,
        },
    );
    pipeline.submit(
        "down",
        Command::UpdateInstanceGoal {
            id: instance_id,
            goal: Goal::Decommissioned,
        },
    );
    pipeline.expect_accepted("put").await;
    pipeline.expect_accepted("add").await;
    pipeline.expect_accepted("down").await;

    pipeline.submit(
        "up",
        Command::UpdateInstanceGoal {
            id: instance_id,
            goal: Goal::Running,
        },
    );
    match pipeline.next_outcome().await {
        Effect::CommandFailure { rejection, .. } => {
            assert_eq!(rejection.kind, RejectionKind::InvalidGoalTransition);
        }
        other => panic!("expected failure, got {other:?}"),
    }

    pipeline.shutdown().await;
}

#[tokio::test]
async fn full_queue_rejects_synchronously_without_losing_events() {
    let config = SchedulerConfig {
        command_queue_capacity: 2,
        ..SchedulerConfig::default()
    };

    let journal: Arc<dyn Journal> = Arc::new(InMemoryJournal::new());
    let snapshots = SnapshotCell::new();
    let (effect_tx, _effects) = mpsc::channel(16);
    // Not spawned: the queue fills without a consumer.
    let (_authority, handle) = StateAuthority::new(&config, journal, snapshots, effect_tx);

    handle
        .try_submit(InputEvent::CommandRequest {
            request_id: RequestId::new("a"),
            command: Command::PutRunSpec { spec: svc_spec() },
        })
        .expect("first fits");
    handle
        .try_submit(InputEvent::CommandRequest {
            request_id: RequestId::new("b"),
            command: Command::PutRunSpec { spec: svc_spec() },
        })
        .expect("second fits");

    let rejection = handle
        .try_submit(InputEvent::CommandRequest {
            request_id: RequestId::new("c"),
            command: Command::PutRunSpec { spec: svc_spec() },
        })
        .expect_err("third overflows");
    assert_eq!(rejection.kind, RejectionKind::QueueFull);
}

#[tokio::test]
async fn unknown_status_update_emits_reap_without_state_change() {
    let mut pipeline = pipeline();
    pipeline.acquire().await;

    let ghost = InstanceId::generate();
    pipeline
        .handle
        .try_submit(status(ghost, 2, Condition::Running))
        .expect("submit");

    let effect = pipeline.effects.recv().await.expect("effect");
    match effect {
        Effect::UnknownInstance { task_id } => {
            assert_eq!(task_id.instance_id(), ghost);
            assert_eq!(task_id.incarnation(), 2);
        }
        other => panic!("expected unknown-instance effect, got {other:?}"),
    }

    let snapshot = pipeline.snapshots.load();
    assert_eq!(snapshot.instance_count(), 0);
    assert_eq!(snapshot.version(), 0);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn terminal_failure_with_running_goal_schedules_replacement() {
    let mut pipeline = pipeline();
    pipeline.acquire().await;

    let instance_id = InstanceId::generate();
    pipeline.submit("put", Command::PutRunSpec { spec: svc_spec() });
    pipeline.submit(
        "add",
        Command::AddInstance {
            id: instance_id,
            spec_ref: RunSpecRef::new("/svc", "v1"),
            goal: Goal::Running,
        },
    );
    pipeline.expect_accepted("put").await;
    pipeline.expect_accepted("add").await;

    // First offer launches incarnation 1.
    pipeline
        .reconciler
        .handle_offer(offer("O1", "A"))
        .await
        .expect("offer handled");
    loop {
        if let Effect::AcceptOffer { .. } = pipeline.effects.recv().await.expect("effect") {
            break;
        }
    }

    // It crashes.
    pipeline
        .handle
        .try_submit(status(instance_id, 1, Condition::Failed))
        .expect("submit");

    // The replacement is re-seated and the next offer launches incarnation 2.
    pipeline
        .reconciler
        .handle_offer(offer("O2", "B"))
        .await
        .expect("offer handled");
    let relaunched = loop {
        match pipeline.effects.recv().await.expect("effect") {
            Effect::LaunchTask { task, .. } => break task,
            _ => {}
        }
    };
    assert_eq!(relaunched.task_id.instance_id(), instance_id);
    assert_eq!(relaunched.task_id.incarnation(), 2);

    pipeline.shutdown().await;
}
