//! End-to-end tick scenarios over the scripted in-memory session store:
//! graduated response, fail-closed behavior, circuit-breaker lifecycle,
//! and idempotent termination.

mod common;

use common::{session, MockSessionControl, Sample, StalledSessionControl};
use pg_governor::constants::events;
use pg_governor::events::{EventPublisher, GovernorEvent, Severity};
use pg_governor::monitor::{MonitoringLoop, TickOutcome};
use pg_governor::telemetry::SessionState;
use pg_governor::{Action, GovernorConfig, ShedMode};
use std::sync::Arc;
use std::time::Duration;

fn drain(receiver: &mut tokio::sync::broadcast::Receiver<GovernorEvent>) -> Vec<GovernorEvent> {
    let mut collected = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        collected.push(event);
    }
    collected
}

fn governor_with(
    script: Vec<Sample>,
    sessions: Vec<pg_governor::ConnectionRecord>,
) -> (MonitoringLoop, Arc<MockSessionControl>, EventPublisher) {
    let publisher = EventPublisher::new(256);
    let mock = Arc::new(MockSessionControl::new(script, sessions));
    let store: Arc<dyn pg_governor::SessionControl> = mock.clone();
    let governor = MonitoringLoop::new(GovernorConfig::default(), store, publisher.clone());
    (governor, mock, publisher)
}

#[tokio::test]
async fn spike_that_self_resolves_costs_nothing_but_one_cleanup() {
    // Ratio sequence [0.68, 0.89, 0.72]: stable, one idle cleanup, then
    // back to informational only; no destructive follow-up, no paging.
    let (mut governor, mock, publisher) = governor_with(
        vec![
            Sample::Ratio(0.68),
            Sample::Ratio(0.89),
            Sample::Ratio(0.72),
        ],
        vec![
            session(1, SessionState::Idle, 400),
            session(2, SessionState::Idle, 50),
            session(3, SessionState::Active, 5),
        ],
    );
    let mut receiver = publisher.subscribe();

    assert!(matches!(governor.tick().await.unwrap(), TickOutcome::Stable));
    match governor.tick().await.unwrap() {
        TickOutcome::Intervened { action, result } => {
            assert!(matches!(action, Action::Optimize { .. }));
            // Only the long-idle session qualifies.
            assert_eq!(result.connections_terminated, 1);
            assert_eq!(result.terminated[0].process_id, 1);
        }
        other => panic!("expected optimize intervention, got {other:?}"),
    }
    assert!(matches!(governor.tick().await.unwrap(), TickOutcome::Warned));

    assert_eq!(mock.terminate_calls(), 1);
    let emitted = drain(&mut receiver);
    assert!(emitted.iter().all(|e| e.severity != Severity::Page));
}

#[tokio::test]
async fn warn_band_never_terminates() {
    let (mut governor, mock, publisher) = governor_with(
        vec![Sample::Ratio(0.75)],
        vec![session(1, SessionState::Idle, 900)],
    );
    let mut receiver = publisher.subscribe();

    assert!(matches!(governor.tick().await.unwrap(), TickOutcome::Warned));
    assert_eq!(mock.terminate_calls(), 0);

    let emitted = drain(&mut receiver);
    assert!(emitted
        .iter()
        .any(|e| e.event == events::CONNECTION_SATURATION_WARNING));
}

#[tokio::test]
async fn critical_shed_is_bounded_and_ordered() {
    let mut sessions = vec![
        session(1, SessionState::Idle, 10),
        session(2, SessionState::Idle, 400),
        session(3, SessionState::Idle, 50),
        session(4, SessionState::IdleInTransaction, 20),
        session(5, SessionState::IdleInTransaction, 600),
    ];
    for pid in 6..=12 {
        sessions.push(session(pid, SessionState::Active, 5));
    }
    let (mut governor, mock, _publisher) =
        governor_with(vec![Sample::Ratio(0.97)], sessions);

    match governor.tick().await.unwrap() {
        TickOutcome::Intervened { action, result } => {
            assert_eq!(
                action,
                Action::ShedLoad {
                    mode: ShedMode::Critical,
                    limit: 5
                }
            );
            assert_eq!(result.connections_terminated, 5);
            let order: Vec<i32> = result.terminated.iter().map(|r| r.process_id).collect();
            assert_eq!(order, vec![2, 3, 1, 5, 4]);
        }
        other => panic!("expected shed intervention, got {other:?}"),
    }
    // Active sessions untouched: five non-active candidates sufficed.
    assert!(mock
        .remaining_sessions()
        .iter()
        .all(|s| s.state == SessionState::Active));
}

#[tokio::test]
async fn three_ineffective_sheds_trip_the_breaker() {
    // Plenty of idle sessions so every shed finds candidates.
    let sessions: Vec<_> = (1..=30)
        .map(|pid| session(pid, SessionState::Idle, i64::from(pid) * 10))
        .collect();
    let (mut governor, mock, publisher) = governor_with(
        vec![
            Sample::Ratio(0.97),
            Sample::Ratio(0.97),
            Sample::Ratio(0.97),
            Sample::Ratio(0.97),
        ],
        sessions,
    );
    let mut receiver = publisher.subscribe();

    for _ in 0..2 {
        assert!(matches!(
            governor.tick().await.unwrap(),
            TickOutcome::Intervened { .. }
        ));
        assert!(!governor.breaker().is_open());
    }

    // Third ineffective intervention trips the breaker.
    assert!(matches!(
        governor.tick().await.unwrap(),
        TickOutcome::Intervened { .. }
    ));
    assert!(governor.breaker().is_open());

    // Fourth tick: monitoring continues, action is suppressed.
    assert!(matches!(
        governor.tick().await.unwrap(),
        TickOutcome::Suppressed
    ));
    assert_eq!(mock.terminate_calls(), 3);

    let emitted = drain(&mut receiver);
    assert_eq!(
        emitted
            .iter()
            .filter(|e| e.event == events::CIRCUIT_BREAKER_ENGAGED)
            .count(),
        1
    );
    assert!(emitted
        .iter()
        .any(|e| e.event == events::INTERVENTION_SUPPRESSED));
}

#[tokio::test]
async fn open_breaker_closes_after_ten_stable_ticks() {
    let sessions: Vec<_> = (1..=30)
        .map(|pid| session(pid, SessionState::Idle, i64::from(pid) * 10))
        .collect();
    let mut script = vec![
        Sample::Ratio(0.97),
        Sample::Ratio(0.97),
        Sample::Ratio(0.97),
    ];
    script.extend((0..10).map(|_| Sample::Ratio(0.68)));
    script.push(Sample::Ratio(0.97));
    let (mut governor, mock, publisher) = governor_with(script, sessions);
    let mut receiver = publisher.subscribe();

    for _ in 0..3 {
        governor.tick().await.unwrap();
    }
    assert!(governor.breaker().is_open());
    let calls_while_tripping = mock.terminate_calls();

    for _ in 0..10 {
        governor.tick().await.unwrap();
    }
    assert!(!governor.breaker().is_open());
    assert_eq!(governor.breaker().consecutive_failures(), 0);
    assert_eq!(mock.terminate_calls(), calls_while_tripping);

    // Autonomous action resumes once closed.
    assert!(matches!(
        governor.tick().await.unwrap(),
        TickOutcome::Intervened { .. }
    ));

    let emitted = drain(&mut receiver);
    assert!(emitted.iter().any(|e| e.event == events::CIRCUIT_BREAKER_RESET));
}

#[tokio::test]
async fn collection_failure_fails_closed() {
    // Previous tick was critical; the failed collection still touches nothing.
    let sessions: Vec<_> = (1..=10)
        .map(|pid| session(pid, SessionState::Idle, 500))
        .collect();
    let (mut governor, mock, publisher) = governor_with(
        vec![Sample::Ratio(0.97), Sample::Unreachable],
        sessions,
    );
    let mut receiver = publisher.subscribe();

    governor.tick().await.unwrap();
    let calls_before = mock.terminate_calls();

    assert!(matches!(
        governor.tick().await.unwrap(),
        TickOutcome::Skipped { .. }
    ));
    assert_eq!(mock.terminate_calls(), calls_before);

    let emitted = drain(&mut receiver);
    assert!(emitted
        .iter()
        .any(|e| e.event == events::TELEMETRY_GATHERING_FAILED));
}

#[tokio::test]
async fn persistent_collection_failures_escalate_once_per_streak() {
    let (mut governor, _mock, publisher) = governor_with(
        vec![Sample::Unreachable, Sample::Unreachable, Sample::Unreachable],
        Vec::new(),
    );
    let mut receiver = publisher.subscribe();

    for _ in 0..3 {
        assert!(matches!(
            governor.tick().await.unwrap(),
            TickOutcome::Skipped { .. }
        ));
    }

    let emitted = drain(&mut receiver);
    assert_eq!(
        emitted
            .iter()
            .filter(|e| e.event == events::TELEMETRY_FAILURE_STREAK)
            .count(),
        1
    );
}

#[tokio::test]
async fn terminating_vanished_sessions_is_not_an_error() {
    let publisher = EventPublisher::new(256);
    let mock = Arc::new(
        MockSessionControl::new(
            vec![Sample::Ratio(0.97)],
            vec![
                session(1, SessionState::Idle, 500),
                session(2, SessionState::Idle, 300),
            ],
        )
        .with_ghosts(vec![1]),
    );
    let store: Arc<dyn pg_governor::SessionControl> = mock.clone();
    let mut governor = MonitoringLoop::new(GovernorConfig::default(), store, publisher);

    match governor.tick().await.unwrap() {
        TickOutcome::Intervened { result, .. } => {
            assert!(result.succeeded);
            // The vanished session simply isn't there to terminate.
            assert_eq!(result.connections_terminated, 1);
            assert_eq!(result.terminated[0].process_id, 2);
        }
        other => panic!("expected successful intervention, got {other:?}"),
    }
}

#[tokio::test]
async fn long_queries_are_terminated_above_the_critical_duration() {
    let (mut governor, mock, publisher) = governor_with(
        vec![Sample::RatioWithMaxDuration(0.50, 50)],
        vec![
            session(1, SessionState::Active, 50),
            session(2, SessionState::Active, 10),
        ],
    );
    let mut receiver = publisher.subscribe();

    assert!(matches!(governor.tick().await.unwrap(), TickOutcome::Stable));
    let terminated = mock.terminated();
    assert_eq!(terminated.len(), 1);
    assert_eq!(terminated[0].process_id, 1);

    let emitted = drain(&mut receiver);
    assert!(emitted
        .iter()
        .any(|e| e.event == events::LONG_QUERIES_TERMINATED));
}

#[tokio::test]
async fn stalled_collection_times_out_instead_of_hanging() {
    let config = GovernorConfig {
        db_timeout_seconds: 1,
        ..GovernorConfig::default()
    };
    let store: Arc<dyn pg_governor::SessionControl> = Arc::new(StalledSessionControl {
        delay: Duration::from_secs(3600),
    });
    let mut governor = MonitoringLoop::new(config, store, EventPublisher::new(16));

    // Virtual time lets the timeout fire without waiting a wall-clock second.
    tokio::time::pause();
    let outcome = governor.tick().await.unwrap();
    assert!(matches!(outcome, TickOutcome::Skipped { .. }));
}
