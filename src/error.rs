use std::path::PathBuf;

/// Failures that escape the supervision core. Everything else that goes wrong
/// while a worker runs is logged and folded into the recovery state machine.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("failed to launch worker `{executable}`: {source}")]
    Launch {
        executable: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create worker output channel: {0}")]
    Channel(#[source] std::io::Error),

    #[error("work unit list {}: {source}", .path.display())]
    UnitList {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("hook `{command}` failed: {reason}")]
    Hook { command: String, reason: String },
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
