use batch_warden::config::{Config, SessionReuse, ZeroProgressMode, ZeroProgressPolicy};
use batch_warden::dialog::DialogAction;
use std::time::Duration;

#[test]
fn parse_example_config() {
    let raw = include_str!("../batch-warden.example.toml");
    let cfg: Config = toml::from_str(raw).expect("parse TOML");
    cfg.validate().expect("example config is valid");
    assert!(!cfg.paths.data_dir.is_empty());
    assert_eq!(cfg.worker.args, vec!["demo-worker".to_string()]);
    assert_eq!(cfg.supervisor.session_reuse, SessionReuse::SameSession);

    let settings = cfg.supervisor_settings();
    assert_eq!(settings.monitor.poll_interval, Duration::from_millis(250));
    assert_eq!(settings.monitor.unresponsive_threshold, Duration::from_secs(10));
    assert_eq!(settings.checkpoint_interval, Duration::from_secs(5));
    assert_eq!(settings.timeouts.begin_processing, Duration::from_secs(300));
    assert_eq!(settings.timeouts.exit, Duration::from_secs(600));
    assert_eq!(settings.timeouts.stall, None);
    assert_eq!(settings.zero_progress, ZeroProgressPolicy::Abandon);
}

#[test]
fn partial_sections_fall_back_to_defaults() {
    let raw = r#"
[supervisor]
processing_timeout_seconds = 90
zero_progress = "retry"
zero_progress_retries = 3
session_reuse = "fresh_per_unit"

[worker]
executable = "/opt/host/bin/host"
"#;
    let cfg: Config = toml::from_str(raw).expect("parse TOML");
    assert_eq!(cfg.supervisor.poll_interval_ms, 250);
    assert_eq!(cfg.supervisor.zero_progress, ZeroProgressMode::Retry);
    assert_eq!(cfg.worker.ignore_stderr_patterns, vec!["^log4cplus:".to_string()]);
    assert_eq!(cfg.units.completion_marker, "snapshot.json");

    let settings = cfg.supervisor_settings();
    assert_eq!(settings.timeouts.stall, Some(Duration::from_secs(90)));
    assert_eq!(settings.session_reuse, SessionReuse::FreshPerUnit);
    assert_eq!(settings.zero_progress, ZeroProgressPolicy::Retry { max_attempts: 3 });
}

#[test]
fn dialog_rules_parse_every_action_shape() {
    let raw = r#"
[[dialogs.rules]]
title = "Missing Third-Party Updaters"
button_count = 2
action = { click = "Continue" }

[[dialogs.rules]]
title = "Unresolved References"
action = "close"

[[dialogs.rules]]
title = "Loading.*"
action = "ignore"
"#;
    let cfg: Config = toml::from_str(raw).expect("parse TOML");
    let actions: Vec<_> = cfg.dialogs.rules.iter().map(|r| r.action.clone()).collect();
    assert_eq!(
        actions,
        vec![
            DialogAction::Click("Continue".into()),
            DialogAction::Close,
            DialogAction::Ignore
        ]
    );
    assert_eq!(cfg.dialogs.rules[0].button_count, Some(2));
    assert_eq!(cfg.dialogs.rules[1].button_count, None);
}

#[test]
fn validation_rejects_broken_settings() {
    let mut cfg = Config::default();
    cfg.supervisor.poll_interval_ms = 0;
    assert!(cfg.validate().is_err());

    let mut cfg = Config::default();
    cfg.supervisor.zero_progress = ZeroProgressMode::Retry;
    cfg.supervisor.zero_progress_retries = 0;
    assert!(cfg.validate().is_err());

    assert!(Config::default().validate().is_ok());
}
