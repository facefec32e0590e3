use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use skyfsm_core::error::{CoreError, Domain, ErrorKind, Result};
use skyfsm_core::mission::{
    ActionKind, ActionSpec, EventKind, GeoPoint, MissionBuilder, MissionDefinition, Target,
};
use skyfsm_runtime::action::{Action, ActionContext, ActionFactory};
use skyfsm_runtime::compute::{ComputeResult, Detection, MemoryResultStore, ResultStore};
use skyfsm_runtime::config::{FailsafeKind, RuntimeConfig};
use skyfsm_runtime::scheduler::{MissionEvent, MissionStatus, Scheduler};
use skyfsm_runtime::trigger::TriggerSource;
use skyfsm_runtime::vehicle::{SimVehicle, VehicleError};
use skyfsm_runtime::watcher::ActiveWatchers;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn fast() -> RuntimeConfig {
    RuntimeConfig::default()
        .with_poll_interval(ms(10))
        .with_teardown_grace(ms(200))
}

fn scheduler(mission: MissionDefinition, vehicle: Arc<SimVehicle>) -> Scheduler {
    Scheduler::new(Arc::new(mission), vehicle, Arc::new(MemoryResultStore::new())).with_config(fast())
}

fn drain(rx: &mut broadcast::Receiver<MissionEvent>) -> Vec<MissionEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

#[tokio::test(start_paused = true)]
async fn instant_actions_visit_every_state_in_order() {
    let mission = MissionBuilder::new()
        .action("A", ActionKind::TakeOff { altitude: 10.0 })
        .action("B", ActionKind::Land)
        .transition("A", "done", "B")
        .transition("B", "done", "TERMINATE")
        .build()
        .unwrap();
    let sched = scheduler(mission, Arc::new(SimVehicle::new(Duration::ZERO)));
    let active = sched.active_watchers();
    let mut events = sched.subscribe();

    let outcome = sched.run(CancellationToken::new()).await.unwrap();

    assert_eq!(outcome.status, MissionStatus::Terminated);
    assert_eq!(outcome.path(), vec!["A", "B", "TERMINATE"]);
    assert!(active.is_empty());

    let events = drain(&mut events);
    assert_eq!(
        events.first(),
        Some(&MissionEvent::StateEntered {
            state: "A".into(),
            visit: 1
        })
    );
    assert_eq!(events.last(), Some(&MissionEvent::Terminated { states_visited: 2 }));
    assert!(events.contains(&MissionEvent::TransitionTaken {
        from: "A".into(),
        event: "done".into(),
        source: TriggerSource::Action,
        to: Target::State("B".into()),
    }));
}

#[tokio::test(start_paused = true)]
async fn watcher_interrupts_patrol_and_lost_returns_to_detect() {
    let wp = |lat| GeoPoint {
        lat,
        lon: 8.54,
        alt: 20.0,
    };
    let mission = MissionBuilder::new()
        .action(
            "detect",
            ActionKind::Patrol {
                waypoints: vec![wp(47.39), wp(47.40)],
                dwell_seconds: 1.0,
                loops: None,
            },
        )
        .action(
            "track",
            ActionKind::Track {
                source: "cam".into(),
                class: "person".into(),
                gain: Default::default(),
                max_speed: 2.0,
                lost_timeout_seconds: None,
            },
        )
        .event(
            "person_detected",
            EventKind::ObjectDetected {
                source: "cam".into(),
                class: "person".into(),
                min_confidence: 0.5,
            },
        )
        .event(
            "lost",
            EventKind::ObjectLost {
                source: "cam".into(),
                class: "person".into(),
                min_confidence: 0.5,
                grace_seconds: 0.5,
            },
        )
        .transition("detect", "person_detected", "track")
        .transition("track", "lost", "detect")
        .build()
        .unwrap();

    let vehicle = Arc::new(SimVehicle::new(Duration::ZERO));
    let store = Arc::new(MemoryResultStore::new());
    let sched = Scheduler::new(Arc::new(mission), vehicle.clone(), store.clone()).with_config(fast());
    let active = sched.active_watchers();
    let mut events = sched.subscribe();

    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(ms(1_500)).await;
        store.publish(
            "cam",
            ComputeResult::new(vec![Detection::new("person", 0.9).at(0.1, 0.0)]),
        );
        tokio::time::sleep(ms(1_500)).await;
        store.clear_result("cam");
        tokio::time::sleep(ms(3_000)).await;
        stopper.cancel();
    });

    let outcome = sched.run(cancel).await.unwrap();
    assert_eq!(outcome.status, MissionStatus::Stopped);
    assert_eq!(outcome.path(), vec!["detect", "track", "detect"]);
    assert!(active.is_empty());
    assert!(vehicle.count("set_global_position") >= 2);
    assert!(vehicle.count("set_velocity") > 0);

    let taken: Vec<(String, TriggerSource)> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            MissionEvent::TransitionTaken { event, source, .. } => Some((event, source)),
            _ => None,
        })
        .collect();
    assert_eq!(
        taken,
        vec![
            ("person_detected".to_string(), TriggerSource::Watcher),
            ("lost".to_string(), TriggerSource::Watcher),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn missing_transition_runs_failsafe_once_and_halts() {
    let mission = MissionBuilder::new()
        .action("A", ActionKind::TakeOff { altitude: 10.0 })
        .action("B", ActionKind::Elevate {
            climb: 2.0,
            speed: 1.0,
        })
        .transition("A", "done", "B")
        .build()
        .unwrap();
    let vehicle = Arc::new(SimVehicle::new(Duration::ZERO));
    let sched = scheduler(mission, vehicle.clone());
    let mut events = sched.subscribe();

    let err = sched.run(CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::TransitionNotFound);
    assert_eq!(err.transition_context(), Some(("B", "done")));
    assert_eq!(vehicle.count("hover"), 1);

    let events = drain(&mut events);
    let failsafes = events
        .iter()
        .filter(|e| matches!(e, MissionEvent::FailsafeInvoked { .. }))
        .count();
    assert_eq!(failsafes, 1);
    assert!(events.contains(&MissionEvent::Fatal {
        state: "B".into(),
        event: Some("done".into()),
        kind: ErrorKind::TransitionNotFound,
    }));
    assert_eq!(
        events.last(),
        Some(&MissionEvent::FailsafeInvoked {
            kind: FailsafeKind::Hover,
            ok: true
        })
    );
}

#[tokio::test(start_paused = true)]
async fn action_failure_without_error_row_is_fatal() {
    let mission = MissionBuilder::new()
        .action("A", ActionKind::Land)
        .transition("A", "done", "TERMINATE")
        .build()
        .unwrap();
    let vehicle = Arc::new(SimVehicle::new(Duration::ZERO));
    vehicle.fail_with("land", VehicleError::Disconnected);
    let sched = scheduler(mission, vehicle.clone())
        .with_config(fast().with_failsafe(FailsafeKind::ReturnToHome));

    let err = sched.run(CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::TransitionNotFound);
    assert_eq!(err.transition_context(), Some(("A", "error")));
    assert!(err.message.contains("disconnected"));
    assert_eq!(vehicle.count("return_to_home"), 1);
}

/// Counts instantiations per state; fails the nth instance of one state and
/// refuses to run twice, so a reused instance shows up as an error.
struct CountingFactory {
    created: Mutex<HashMap<String, u32>>,
    fail: (&'static str, u32),
    broken: Option<&'static str>,
}

impl CountingFactory {
    fn new(fail: (&'static str, u32)) -> Self {
        Self {
            created: Mutex::new(HashMap::new()),
            fail,
            broken: None,
        }
    }

    fn created(&self, state: &str) -> u32 {
        self.created.lock().unwrap().get(state).copied().unwrap_or(0)
    }
}

struct OneShot {
    fresh: bool,
    fail: bool,
    announce: Option<&'static str>,
}

#[async_trait]
impl Action for OneShot {
    fn kind(&self) -> &'static str {
        "one_shot"
    }

    async fn execute(&mut self, ctx: &ActionContext) -> Result<()> {
        if !self.fresh {
            return Err(boom("action instance reused"));
        }
        self.fresh = false;
        if let Some(event) = self.announce {
            ctx.announce(event);
        }
        if self.fail {
            return Err(boom("scripted failure"));
        }
        Ok(())
    }
}

fn boom(msg: &'static str) -> CoreError {
    CoreError::error()
        .domain(Domain::Action)
        .kind(ErrorKind::ActionExecution)
        .msg(msg)
        .build()
}

impl ActionFactory for CountingFactory {
    fn create(&self, spec: &ActionSpec) -> Result<Box<dyn Action>> {
        if self.broken == Some(spec.id.as_str()) {
            return Err(boom("cannot build action"));
        }
        let mut created = self.created.lock().unwrap();
        let n = created.entry(spec.id.clone()).or_insert(0);
        *n += 1;
        Ok(Box::new(OneShot {
            fresh: true,
            fail: spec.id == self.fail.0 && *n == self.fail.1,
            announce: match &spec.kind {
                ActionKind::Hover { .. } => Some("spotted"),
                _ => None,
            },
        }))
    }
}

#[tokio::test(start_paused = true)]
async fn revisited_states_get_fresh_actions_and_error_rows_transition() {
    let mission = MissionBuilder::new()
        .action("A", ActionKind::Idle)
        .action("B", ActionKind::Idle)
        .transition("A", "done", "B")
        .transition("B", "done", "A")
        .transition("A", "error", "TERMINATE")
        .build()
        .unwrap();
    let factory = Arc::new(CountingFactory::new(("A", 3)));
    let sched = scheduler(mission, Arc::new(SimVehicle::new(Duration::ZERO)))
        .with_actions(factory.clone());
    let mut events = sched.subscribe();

    let outcome = sched.run(CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.path(), vec!["A", "B", "A", "B", "A", "TERMINATE"]);
    assert_eq!(factory.created("A"), 3);
    assert_eq!(factory.created("B"), 2);

    let visits: Vec<(String, u32)> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            MissionEvent::StateEntered { state, visit } => Some((state, visit)),
            _ => None,
        })
        .collect();
    assert_eq!(visits.last(), Some(&("A".to_string(), 3)));
}

#[tokio::test(start_paused = true)]
async fn first_trigger_wins_and_later_ones_are_discarded() {
    let mission = MissionBuilder::new()
        .action("A", ActionKind::Hover { seconds: None })
        .action("B", ActionKind::Idle)
        .action("C", ActionKind::Idle)
        .event("spotted", EventKind::External)
        .transition("A", "spotted", "B")
        .transition("A", "done", "C")
        .transition("B", "done", "TERMINATE")
        .transition("C", "done", "TERMINATE")
        .build()
        .unwrap();
    let sched = scheduler(mission, Arc::new(SimVehicle::new(Duration::ZERO)))
        .with_actions(Arc::new(CountingFactory::new(("-", 0))));

    let outcome = sched.run(CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.path(), vec!["A", "B", "TERMINATE"]);
}

#[tokio::test(start_paused = true)]
async fn action_build_failure_raises_error_event() {
    let mission = MissionBuilder::new()
        .action("A", ActionKind::Idle)
        .action("B", ActionKind::Idle)
        .transition("A", "error", "B")
        .transition("B", "done", "TERMINATE")
        .build()
        .unwrap();
    let mut factory = CountingFactory::new(("-", 0));
    factory.broken = Some("A");
    let sched = scheduler(mission, Arc::new(SimVehicle::new(Duration::ZERO)))
        .with_actions(Arc::new(factory));

    let outcome = sched.run(CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.path(), vec!["A", "B", "TERMINATE"]);
}

/// Ignores cancellation entirely.
struct Stubborn;

#[async_trait]
impl Action for Stubborn {
    fn kind(&self) -> &'static str {
        "stubborn"
    }

    async fn execute(&mut self, _ctx: &ActionContext) -> Result<()> {
        tokio::time::sleep(Duration::from_secs(3_600)).await;
        Ok(())
    }
}

struct StubbornFirst;

impl ActionFactory for StubbornFirst {
    fn create(&self, spec: &ActionSpec) -> Result<Box<dyn Action>> {
        if spec.id == "A" {
            Ok(Box::new(Stubborn))
        } else {
            Ok(Box::new(OneShot {
                fresh: true,
                fail: false,
                announce: None,
            }))
        }
    }
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_cancel_degrades_instead_of_hanging() {
    let mission = MissionBuilder::new()
        .action("A", ActionKind::Idle)
        .action("B", ActionKind::Idle)
        .event("tick", EventKind::Timer { seconds: 1.0 })
        .transition("A", "tick", "B")
        .transition("B", "done", "TERMINATE")
        .build()
        .unwrap();
    let sched = scheduler(mission, Arc::new(SimVehicle::new(Duration::ZERO)))
        .with_actions(Arc::new(StubbornFirst));
    let mut events = sched.subscribe();

    let started = tokio::time::Instant::now();
    let outcome = sched.run(CancellationToken::new()).await.unwrap();
    assert!(outcome.terminated());
    assert!(started.elapsed() < Duration::from_secs(60));

    let events = drain(&mut events);
    assert!(events.contains(&MissionEvent::TeardownDegraded {
        state: "A".into(),
        unit: "action:A".into(),
    }));
    assert!(events.contains(&MissionEvent::StateExited {
        state: "A".into(),
        stopped_watchers: 0,
    }));
}

/// Panics on its first run.
struct Faulty;

#[async_trait]
impl Action for Faulty {
    fn kind(&self) -> &'static str {
        "faulty"
    }

    async fn execute(&mut self, _ctx: &ActionContext) -> Result<()> {
        panic!("motor controller fault");
    }
}

struct FaultyFirst;

impl ActionFactory for FaultyFirst {
    fn create(&self, spec: &ActionSpec) -> Result<Box<dyn Action>> {
        if spec.id == "A" {
            Ok(Box::new(Faulty))
        } else {
            Ok(Box::new(OneShot {
                fresh: true,
                fail: false,
                announce: None,
            }))
        }
    }
}

#[tokio::test(start_paused = true)]
async fn panicking_action_takes_the_error_row() {
    let mission = MissionBuilder::new()
        .action("A", ActionKind::Idle)
        .action("B", ActionKind::Idle)
        .transition("A", "done", "TERMINATE")
        .transition("A", "error", "B")
        .transition("B", "done", "TERMINATE")
        .build()
        .unwrap();
    let sched = scheduler(mission, Arc::new(SimVehicle::new(Duration::ZERO)))
        .with_actions(Arc::new(FaultyFirst));
    let mut events = sched.subscribe();

    let outcome = tokio::time::timeout(Duration::from_secs(5), sched.run(CancellationToken::new()))
        .await
        .expect("mission should not hang on a panicking action")
        .unwrap();
    assert_eq!(outcome.path(), vec!["A", "B", "TERMINATE"]);
    assert!(drain(&mut events).contains(&MissionEvent::TransitionTaken {
        from: "A".into(),
        event: "error".into(),
        source: TriggerSource::Action,
        to: Target::State("B".into()),
    }));
}

#[tokio::test(start_paused = true)]
async fn panicking_action_without_error_row_runs_failsafe() {
    let mission = MissionBuilder::new()
        .action("A", ActionKind::Idle)
        .transition("A", "done", "TERMINATE")
        .build()
        .unwrap();
    let vehicle = Arc::new(SimVehicle::new(Duration::ZERO));
    let sched = scheduler(mission, vehicle.clone()).with_actions(Arc::new(FaultyFirst));

    let err = tokio::time::timeout(Duration::from_secs(5), sched.run(CancellationToken::new()))
        .await
        .expect("mission should not hang on a panicking action")
        .unwrap_err();
    assert_eq!(err.transition_context(), Some(("A", "error")));
    assert!(err.message.contains("motor controller fault"));
    assert_eq!(vehicle.count("hover"), 1);
}

/// Records when each state's action is built (with the watchers registered
/// at that moment) and when it finishes acknowledging cancellation.
struct Journal {
    log: Arc<Mutex<Vec<String>>>,
    active: ActiveWatchers,
}

impl ActionFactory for Journal {
    fn create(&self, spec: &ActionSpec) -> Result<Box<dyn Action>> {
        let watching: Vec<String> = self
            .active
            .snapshot()
            .into_iter()
            .map(|(event, _)| event)
            .collect();
        self.log
            .lock()
            .unwrap()
            .push(format!("start {} {watching:?}", spec.id));
        Ok(Box::new(SlowToStop {
            log: self.log.clone(),
        }))
    }
}

/// Runs until cancelled, then takes a while to wind down.
struct SlowToStop {
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Action for SlowToStop {
    fn kind(&self) -> &'static str {
        "slow_to_stop"
    }

    async fn execute(&mut self, ctx: &ActionContext) -> Result<()> {
        ctx.cancelled().await;
        tokio::time::sleep(ms(50)).await;
        self.log
            .lock()
            .unwrap()
            .push(format!("stopped {}", ctx.state()));
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn losers_are_joined_before_the_next_state_starts() {
    let mission = MissionBuilder::new()
        .action("A", ActionKind::Idle)
        .action("B", ActionKind::Idle)
        .action("C", ActionKind::Idle)
        .event("tick", EventKind::Timer { seconds: 1.0 })
        .event("tock", EventKind::Timer { seconds: 1.0 })
        .event("slow", EventKind::Timer { seconds: 50.0 })
        .transition("A", "tick", "B")
        .transition("A", "slow", "C")
        .transition("B", "tock", "TERMINATE")
        .transition("B", "slow", "C")
        .transition("C", "done", "TERMINATE")
        .build()
        .unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    let sched = scheduler(mission, Arc::new(SimVehicle::new(Duration::ZERO)));
    let active = sched.active_watchers();
    let sched = sched.with_actions(Arc::new(Journal {
        log: log.clone(),
        active: active.clone(),
    }));
    let mut events = sched.subscribe();

    let outcome = sched.run(CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.path(), vec!["A", "B", "TERMINATE"]);
    assert!(active.is_empty());

    // Each state sees only its own watchers, and the previous action has
    // finished winding down before the next one is built.
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            r#"start A ["slow", "tick"]"#.to_string(),
            "stopped A".to_string(),
            r#"start B ["slow", "tock"]"#.to_string(),
            "stopped B".to_string(),
        ]
    );

    let exits: Vec<(String, usize)> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            MissionEvent::StateExited {
                state,
                stopped_watchers,
            } => Some((state, stopped_watchers)),
            _ => None,
        })
        .collect();
    assert_eq!(exits, vec![("A".to_string(), 1), ("B".to_string(), 1)]);
}
