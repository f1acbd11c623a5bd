use crate::{
    error::SupervisorError,
    monitor::MonitorSettings,
    timeout::TimeoutPolicy,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: Global,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub supervisor: Supervisor,
    #[serde(default)]
    pub units: Units,
    #[serde(default)]
    pub dialogs: Dialogs,
    #[serde(default)]
    pub hooks: Hooks,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub debug: Debug,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> std::result::Result<(), SupervisorError> {
        if self.supervisor.poll_interval_ms == 0 {
            return Err(SupervisorError::Config(
                "supervisor.poll_interval_ms must be > 0".into(),
            ));
        }
        if self.paths.data_dir.trim().is_empty() {
            return Err(SupervisorError::Config("paths.data_dir is empty".into()));
        }
        if self.supervisor.zero_progress == ZeroProgressMode::Retry
            && self.supervisor.zero_progress_retries == 0
        {
            return Err(SupervisorError::Config(
                "supervisor.zero_progress = \"retry\" needs zero_progress_retries > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn supervisor_settings(&self) -> SupervisorSettings {
        let s = &self.supervisor;
        SupervisorSettings {
            monitor: MonitorSettings {
                poll_interval: Duration::from_millis(s.poll_interval_ms),
                unresponsive_threshold: Duration::from_secs(s.unresponsive_threshold_seconds),
            },
            checkpoint_interval: Duration::from_millis(s.checkpoint_interval_ms),
            timeouts: TimeoutPolicy {
                begin_processing: Duration::from_secs(s.begin_processing_timeout_seconds),
                stall: (s.processing_timeout_seconds > 0)
                    .then(|| Duration::from_secs(s.processing_timeout_seconds)),
                exit: Duration::from_secs(s.exit_timeout_seconds),
            },
            session_reuse: s.session_reuse,
            zero_progress: match s.zero_progress {
                ZeroProgressMode::Abandon => ZeroProgressPolicy::Abandon,
                ZeroProgressMode::SkipUnit => ZeroProgressPolicy::SkipUnit,
                ZeroProgressMode::Retry => ZeroProgressPolicy::Retry {
                    max_attempts: s.zero_progress_retries,
                },
            },
            final_drain: Duration::from_millis(s.final_drain_ms),
            keep_session_files: self.paths.keep_session_files,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Global {
    pub batch_name: String,
    pub print_summary: bool,
}
impl Default for Global {
    fn default() -> Self {
        Self {
            batch_name: "default".into(),
            print_summary: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    /// Unit lists and checkpoint files.
    pub data_dir: String,
    pub out_dir: String,
    pub scripts_dir: String,
    /// Empty disables harness mode.
    pub harness_dir: String,
    pub keep_session_files: bool,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            data_dir: ".batch-warden-data".into(),
            out_dir: "out".into(),
            scripts_dir: "scripts".into(),
            harness_dir: "".into(),
            keep_session_files: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub executable: String,
    #[serde(default)]
    pub executables: BTreeMap<String, String>,
    #[serde(default)]
    pub args: Vec<String>,
    pub working_dir: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub task_script: String,
    pub show_stdout: bool,
    pub show_error_messages: bool,
    pub ignore_stderr_patterns: Vec<String>,
}
impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            executable: "".into(),
            executables: Default::default(),
            args: Vec::new(),
            working_dir: "".into(),
            env: Default::default(),
            task_script: "".into(),
            show_stdout: false,
            show_error_messages: true,
            ignore_stderr_patterns: vec!["^log4cplus:".into()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionReuse {
    /// One worker for every remaining unit of a group.
    SameSession,
    /// A fresh worker per unit.
    FreshPerUnit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroProgressMode {
    Abandon,
    SkipUnit,
    Retry,
}

/// What the group loop does when a worker exits without recording any
/// checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZeroProgressPolicy {
    /// Report every remaining unit of the group as unresolved.
    Abandon,
    /// Report the first pending unit as unresolved and carry on after it.
    SkipUnit,
    /// Relaunch on the same slice, then abandon.
    Retry { max_attempts: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Supervisor {
    pub poll_interval_ms: u64,
    pub unresponsive_threshold_seconds: u64,
    pub checkpoint_interval_ms: u64,
    pub begin_processing_timeout_seconds: u64,
    /// Per-unit stall bound; 0 disables it.
    pub processing_timeout_seconds: u64,
    pub exit_timeout_seconds: u64,
    pub session_reuse: SessionReuse,
    pub zero_progress: ZeroProgressMode,
    pub zero_progress_retries: u32,
    pub final_drain_ms: u64,
}
impl Default for Supervisor {
    fn default() -> Self {
        Self {
            poll_interval_ms: 250,
            unresponsive_threshold_seconds: 10,
            checkpoint_interval_ms: 5_000,
            begin_processing_timeout_seconds: 5 * 60,
            processing_timeout_seconds: 0,
            exit_timeout_seconds: 10 * 60,
            session_reuse: SessionReuse::SameSession,
            zero_progress: ZeroProgressMode::Abandon,
            zero_progress_retries: 1,
            final_drain_ms: 500,
        }
    }
}

/// Typed, ready-to-use view of `[supervisor]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    pub monitor: MonitorSettings,
    pub checkpoint_interval: Duration,
    pub timeouts: TimeoutPolicy,
    pub session_reuse: SessionReuse,
    pub zero_progress: ZeroProgressPolicy,
    pub final_drain: Duration,
    pub keep_session_files: bool,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Config::default().supervisor_settings()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Units {
    pub default_capability: String,
    pub skip_missing_files: bool,
    pub order_by_size: bool,
    pub completion_marker: String,
}
impl Default for Units {
    fn default() -> Self {
        Self {
            default_capability: "default".into(),
            skip_missing_files: true,
            order_by_size: true,
            completion_marker: "snapshot.json".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Dialogs {
    pub enabled: bool,
    pub use_default_rules: bool,
    #[serde(default)]
    pub rules: Vec<DialogRuleConfig>,
    pub fallback_labels: Vec<String>,
}
impl Default for Dialogs {
    fn default() -> Self {
        Self {
            enabled: true,
            use_default_rules: true,
            rules: Vec::new(),
            fallback_labels: crate::dialog::DEFAULT_FALLBACK_LABELS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogRuleConfig {
    /// Regex matched against the whole dialog title.
    pub title: String,
    #[serde(default)]
    pub button_count: Option<usize>,
    pub action: crate::dialog::DialogAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Hooks {
    #[serde(default)]
    pub pre: Vec<String>,
    #[serde(default)]
    pub post: Vec<String>,
    pub timeout_seconds: u64,
}
impl Default for Hooks {
    fn default() -> Self {
        Self {
            pre: Vec::new(),
            post: Vec::new(),
            timeout_seconds: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: true,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Debug {
    pub dump_effective_config: bool,
}
impl Default for Debug {
    fn default() -> Self {
        Self {
            dump_effective_config: true,
        }
    }
}
