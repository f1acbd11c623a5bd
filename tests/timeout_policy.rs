use batch_warden::timeout::{ProgressState, TimeoutKind, TimeoutPolicy};
use std::time::{Duration, Instant};

fn policy(stall: Option<u64>) -> TimeoutPolicy {
    TimeoutPolicy {
        begin_processing: Duration::from_secs(300),
        stall: stall.map(Duration::from_secs),
        exit: Duration::from_secs(600),
    }
}

#[test]
fn begin_processing_fires_only_without_any_checkpoint() {
    let t0 = Instant::now();
    let p = policy(None);
    let mut state = ProgressState::new(t0);

    assert_eq!(p.evaluate(&state, t0 + Duration::from_secs(300)), None);
    assert_eq!(
        p.evaluate(&state, t0 + Duration::from_millis(300_001)),
        Some(TimeoutKind::BeginProcessing)
    );

    state.checkpoint = Some(1);
    state.checkpoint_changed_at = t0 + Duration::from_secs(10);
    assert_eq!(p.evaluate(&state, t0 + Duration::from_secs(3_000)), None);
}

#[test]
fn stall_fires_within_one_tick_of_the_bound_and_not_before() {
    let t0 = Instant::now();
    let tick = Duration::from_millis(250);
    let stall = 60;
    let p = policy(Some(stall));
    let mut state = ProgressState::new(t0);
    state.checkpoint = Some(4);
    state.checkpoint_changed_at = t0 + Duration::from_secs(5);

    // Walk the loop at tick resolution and note the first firing.
    let mut now = state.checkpoint_changed_at;
    let fired_at = loop {
        if let Some(kind) = p.evaluate(&state, now) {
            assert_eq!(kind, TimeoutKind::Stalled);
            break now;
        }
        now += tick;
        assert!(now < t0 + Duration::from_secs(1_000), "stall never fired");
    };
    let waited = fired_at - state.checkpoint_changed_at;
    assert!(waited > Duration::from_secs(stall));
    assert!(waited <= Duration::from_secs(stall) + tick);
}

#[test]
fn stall_is_disabled_without_a_configured_bound() {
    let t0 = Instant::now();
    let p = policy(None);
    let mut state = ProgressState::new(t0);
    state.checkpoint = Some(2);
    assert_eq!(p.evaluate(&state, t0 + Duration::from_secs(10_000)), None);
}

#[test]
fn exit_timeout_counts_from_when_artifacts_appeared() {
    let t0 = Instant::now();
    let p = policy(None);
    let mut state = ProgressState::new(t0);
    state.checkpoint = Some(3);
    let seen = t0 + Duration::from_secs(100);
    state.artifacts_seen_at = Some(seen);

    assert_eq!(p.evaluate(&state, seen + Duration::from_secs(600)), None);
    assert_eq!(
        p.evaluate(&state, seen + Duration::from_secs(601)),
        Some(TimeoutKind::Exit)
    );
}

#[test]
fn begin_processing_outranks_the_other_timeouts() {
    let t0 = Instant::now();
    let p = TimeoutPolicy {
        begin_processing: Duration::from_secs(1),
        stall: Some(Duration::from_secs(1)),
        exit: Duration::from_secs(1),
    };
    let mut state = ProgressState::new(t0);
    state.artifacts_seen_at = Some(t0);
    assert_eq!(
        p.evaluate(&state, t0 + Duration::from_secs(5)),
        Some(TimeoutKind::BeginProcessing)
    );

    state.checkpoint = Some(1);
    assert_eq!(
        p.evaluate(&state, t0 + Duration::from_secs(5)),
        Some(TimeoutKind::Stalled)
    );
}
