use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutKind {
    /// The worker never recorded a checkpoint.
    BeginProcessing,
    /// The checkpoint stopped moving.
    Stalled,
    /// Every completion artifact exists but the worker is still alive.
    Exit,
}

impl TimeoutKind {
    pub fn describe(&self) -> &'static str {
        match self {
            TimeoutKind::BeginProcessing => {
                "Timed-out waiting for the worker to begin task / file processing"
            }
            TimeoutKind::Stalled => "Timed-out waiting for the worker task / file to be processed",
            TimeoutKind::Exit => "Timed-out waiting for the worker process to exit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub begin_processing: Duration,
    /// Per-unit bound; `None` disables stall detection.
    pub stall: Option<Duration>,
    pub exit: Duration,
}

/// What the supervisor knows about one worker's progress at a given tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressState {
    pub launched_at: Instant,
    pub checkpoint: Option<u32>,
    pub checkpoint_changed_at: Instant,
    pub artifacts_seen_at: Option<Instant>,
}

impl ProgressState {
    pub fn new(launched_at: Instant) -> Self {
        Self {
            launched_at,
            checkpoint: None,
            checkpoint_changed_at: launched_at,
            artifacts_seen_at: None,
        }
    }
}

impl TimeoutPolicy {
    /// First timeout that applies, in priority order.
    pub fn evaluate(&self, state: &ProgressState, now: Instant) -> Option<TimeoutKind> {
        if state.checkpoint.is_none()
            && now.saturating_duration_since(state.launched_at) > self.begin_processing
        {
            return Some(TimeoutKind::BeginProcessing);
        }

        if let (Some(stall), Some(_)) = (self.stall, state.checkpoint) {
            if now.saturating_duration_since(state.checkpoint_changed_at) > stall {
                return Some(TimeoutKind::Stalled);
            }
        }

        if let Some(seen) = state.artifacts_seen_at {
            if now.saturating_duration_since(seen) > self.exit {
                return Some(TimeoutKind::Exit);
            }
        }

        None
    }
}
