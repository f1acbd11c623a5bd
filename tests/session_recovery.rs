#![cfg(unix)]

use batch_warden::config::{Config, SessionReuse, ZeroProgressMode};
use batch_warden::error::SupervisorError;
use batch_warden::output::{OutputLine, StreamKind};
use batch_warden::plan::UnitGroup;
use batch_warden::report::GroupOutcome;
use batch_warden::supervisor::Supervisor;
use batch_warden::timeout::TimeoutKind;
use batch_warden::units::{Locator, UnitOptions, WorkUnit, WorkUnitList};
use std::path::Path;

fn config(dir: &Path) -> Config {
    let mut cfg = Config::default();
    cfg.paths.data_dir = dir.join("data").display().to_string();
    cfg.worker.executable = env!("CARGO_BIN_EXE_batch-warden").to_string();
    cfg.worker.args = vec!["demo-worker".into()];
    cfg.worker.show_stdout = true;
    cfg.supervisor.poll_interval_ms = 20;
    cfg.supervisor.checkpoint_interval_ms = 50;
    cfg.supervisor.begin_processing_timeout_seconds = 20;
    cfg.supervisor.final_drain_ms = 500;
    cfg.dialogs.enabled = false;
    cfg
}

/// Units 1..=n; `directives[i]` scripts the demo worker for unit i+1.
fn group(dir: &Path, directives: &[&str], with_markers: bool) -> UnitGroup {
    let n = directives.len() as u32;
    let units = directives
        .iter()
        .enumerate()
        .map(|(i, d)| {
            let index = i as u32 + 1;
            let export = dir.join(format!("export-{index}"));
            WorkUnit {
                progress_index: index,
                progress_max: n,
                session_id: "test-session".into(),
                capability: "default".into(),
                locator: Locator::File {
                    path: dir.join(format!("doc-{index}.rvt")),
                },
                options: UnitOptions {
                    task_data: Some(d.to_string()),
                    export_folder: with_markers.then(|| export.clone()),
                    ..UnitOptions::default()
                },
                associated_data: Vec::new(),
                completion_marker: with_markers.then(|| export.join("snapshot.json")),
            }
        })
        .collect();
    UnitGroup {
        capability: "default".into(),
        units: WorkUnitList::new(units),
    }
}

fn supervisor(cfg: &Config) -> Supervisor<Vec<OutputLine>> {
    Supervisor::with_sink(cfg, "test-session", Vec::new()).unwrap()
}

#[test]
fn crash_after_first_unit_resumes_from_the_next_one() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let mut sup = supervisor(&cfg);

    let report = sup
        .run_group(&group(dir.path(), &["crash_after", "", ""], true))
        .unwrap();

    assert_eq!(report.outcome, GroupOutcome::Completed);
    assert!(report.unresolved.is_empty());
    assert!(report.failed.is_empty());
    assert_eq!(report.completed, vec![1, 2, 3]);
    assert_eq!(report.last_checkpoint, Some(3));

    assert_eq!(report.sessions.len(), 2);
    let (a, b) = (&report.sessions[0], &report.sessions[1]);
    assert_eq!(a.checkpoint, Some(1));
    assert_eq!(a.next_index, Some(2));
    assert_eq!(a.exit_code, Some(3));
    assert_eq!(b.floor, 2);
    assert_eq!(b.slice, vec![2, 3]);
    assert_eq!(b.next_index, Some(4));

    let channel: Vec<_> = sup
        .sink()
        .iter()
        .filter(|l| l.stream == StreamKind::Channel)
        .map(|l| l.text.clone())
        .collect();
    assert!(channel.iter().any(|l| l.starts_with("processing unit 1 of 3")));
    assert!(channel.iter().any(|l| l.starts_with("processing unit 3 of 3")));
    assert!(sup.sink().iter().any(|l| l.stream == StreamKind::Stdout));

    // Unit lists and checkpoints are cleaned up after each session.
    let leftovers = std::fs::read_dir(sup.data_dir()).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[test]
fn worker_that_never_starts_is_killed_and_the_group_abandoned() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.supervisor.begin_processing_timeout_seconds = 1;
    let mut sup = supervisor(&cfg);

    let report = sup
        .run_group(&group(dir.path(), &["hang_before", "", ""], false))
        .unwrap();

    assert_eq!(report.outcome, GroupOutcome::Aborted);
    assert_eq!(report.unresolved, vec![1, 2, 3]);
    assert_eq!(report.sessions.len(), 1);
    let s = &report.sessions[0];
    assert_eq!(s.timed_out, Some(TimeoutKind::BeginProcessing));
    assert!(s.killed);
    assert_eq!(s.checkpoint, None);
    assert_eq!(s.next_index, None);
}

#[test]
fn crash_mid_unit_marks_it_failed_and_moves_on() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let mut sup = supervisor(&cfg);

    let report = sup
        .run_group(&group(dir.path(), &["", "crash_during", ""], true))
        .unwrap();

    assert_eq!(report.outcome, GroupOutcome::Completed);
    assert_eq!(report.completed, vec![1, 3]);
    assert_eq!(report.failed, vec![2]);
    assert_eq!(report.sessions[1].slice, vec![3]);
}

#[test]
fn stalled_unit_is_killed_after_the_processing_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.supervisor.processing_timeout_seconds = 1;
    let mut sup = supervisor(&cfg);

    let report = sup
        .run_group(&group(dir.path(), &["", "hang_during", ""], false))
        .unwrap();

    assert_eq!(report.sessions[0].timed_out, Some(TimeoutKind::Stalled));
    assert_eq!(report.failed, vec![2]);
    assert_eq!(report.completed, vec![1, 3]);
    assert_eq!(report.outcome, GroupOutcome::Completed);
}

#[test]
fn lingering_worker_is_killed_by_the_exit_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.supervisor.exit_timeout_seconds = 1;
    let mut sup = supervisor(&cfg);

    let report = sup
        .run_group(&group(dir.path(), &["", "linger"], true))
        .unwrap();

    assert_eq!(report.sessions.len(), 1);
    assert_eq!(report.sessions[0].timed_out, Some(TimeoutKind::Exit));
    assert_eq!(report.completed, vec![1, 2]);
    assert!(report.failed.is_empty());
}

#[test]
fn retry_policy_relaunches_the_same_units_then_gives_up() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.supervisor.zero_progress = ZeroProgressMode::Retry;
    cfg.supervisor.zero_progress_retries = 2;
    cfg.supervisor.begin_processing_timeout_seconds = 1;
    let mut sup = supervisor(&cfg);

    let report = sup
        .run_group(&group(dir.path(), &["hang_before", "", ""], false))
        .unwrap();

    assert_eq!(report.sessions.len(), 3);
    for s in &report.sessions {
        assert_eq!(s.slice, vec![1, 2, 3]);
        assert_eq!(s.floor, 1);
        assert_eq!(s.timed_out, Some(TimeoutKind::BeginProcessing));
        assert_eq!(s.next_index, None);
    }
    assert_eq!(report.unresolved, vec![1, 2, 3]);
    assert!(report.completed.is_empty());
    assert_eq!(report.outcome, GroupOutcome::Aborted);
}

/// A worker that writes `checkpoint` into its progress file and exits 0.
fn scripted_checkpoint(cfg: &mut Config, checkpoint: &str) {
    cfg.worker.executable = "/bin/sh".into();
    cfg.worker.args = vec![
        "-c".into(),
        r#"printf %s "$1" > "${BATCH_WARDEN__WORK_UNIT_LIST_PATH%.json}.progress""#.into(),
        "sh".into(),
        checkpoint.into(),
    ];
}

#[test]
fn checkpoint_outside_the_launched_units_counts_as_no_progress() {
    for bogus in ["4294967295", "7"] {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        scripted_checkpoint(&mut cfg, bogus);
        let mut sup = supervisor(&cfg);

        let report = sup
            .run_group(&group(dir.path(), &["", ""], false))
            .unwrap();

        assert_eq!(report.sessions.len(), 1, "checkpoint {bogus}");
        let s = &report.sessions[0];
        assert_eq!(s.checkpoint, Some(bogus.parse().unwrap()));
        assert_eq!(s.next_index, None);
        assert!(s.completed.is_empty());
        assert_eq!(report.unresolved, vec![1, 2]);
        assert_eq!(report.outcome, GroupOutcome::Aborted);
    }
}

#[test]
fn checkpoint_inside_the_launched_units_is_trusted() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    scripted_checkpoint(&mut cfg, "2");
    let mut sup = supervisor(&cfg);

    let report = sup
        .run_group(&group(dir.path(), &["", ""], false))
        .unwrap();

    assert_eq!(report.sessions.len(), 1);
    assert_eq!(report.sessions[0].next_index, Some(3));
    assert_eq!(report.completed, vec![1, 2]);
    assert_eq!(report.outcome, GroupOutcome::Completed);
}

#[test]
fn fresh_per_unit_launches_one_worker_per_unit() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.supervisor.session_reuse = SessionReuse::FreshPerUnit;
    let mut sup = supervisor(&cfg);

    let report = sup.run_group(&group(dir.path(), &["", "", ""], false)).unwrap();
    let slices: Vec<_> = report.sessions.iter().map(|s| s.slice.clone()).collect();
    assert_eq!(slices, vec![vec![1], vec![2], vec![3]]);
    assert_eq!(report.outcome, GroupOutcome::Completed);
}

#[test]
fn skip_unit_policy_gives_up_on_one_unit_only() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.supervisor.zero_progress = ZeroProgressMode::SkipUnit;
    cfg.supervisor.begin_processing_timeout_seconds = 1;
    let mut sup = supervisor(&cfg);

    let report = sup
        .run_group(&group(dir.path(), &["hang_before", "", ""], false))
        .unwrap();

    assert_eq!(report.unresolved, vec![1]);
    assert_eq!(report.completed, vec![2, 3]);
    assert_eq!(report.outcome, GroupOutcome::Partial);
}

#[test]
fn launch_failure_is_fatal_to_the_group() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.worker.executable = dir.path().join("no-such-worker").display().to_string();
    let mut sup = supervisor(&cfg);

    let err = sup
        .run_group(&group(dir.path(), &[""], false))
        .unwrap_err();
    assert!(matches!(err, SupervisorError::Launch { .. }));
    let leftovers = std::fs::read_dir(sup.data_dir()).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[test]
fn harness_mode_records_pids_and_events() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    let harness_dir = dir.path().join("harness");
    cfg.paths.harness_dir = harness_dir.display().to_string();
    let mut sup = supervisor(&cfg);

    let report = sup
        .run_group(&group(dir.path(), &["crash_after", ""], false))
        .unwrap();
    assert_eq!(report.sessions.len(), 2);

    let session_id = std::fs::read_to_string(harness_dir.join("session_id.txt")).unwrap();
    assert_eq!(session_id, "test-session");
    let pids = std::fs::read_to_string(harness_dir.join("worker_pids.txt")).unwrap();
    assert_eq!(pids.lines().count(), 2);

    let events: Vec<serde_json::Value> = std::fs::read_to_string(harness_dir.join("events.jsonl"))
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let kinds: Vec<_> = events.iter().map(|e| e["event"].as_str().unwrap().to_string()).collect();
    assert_eq!(kinds.iter().filter(|k| *k == "launched").count(), 2);
    assert!(kinds.contains(&"resuming".to_string()));
    assert_eq!(kinds.last().map(String::as_str), Some("group_finished"));
    assert!(events.iter().all(|e| e["at"].is_string()));
}
