use crate::{plan::SkippedUnit, timeout::TimeoutKind};
use serde::{Deserialize, Serialize};

/// One supervised launch of one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub pid: u32,
    pub capability: String,
    /// Starting progress index handed to the worker.
    pub floor: u32,
    pub slice: Vec<u32>,
    pub started: String,
    pub finished: String,
    pub checkpoint: Option<u32>,
    /// `checkpoint + 1`; `None` when the worker made no usable progress.
    pub next_index: Option<u32>,
    pub timed_out: Option<TimeoutKind>,
    pub killed: bool,
    pub exit_code: Option<i32>,
    pub completed: Vec<u32>,
    pub failed: Vec<u32>,
    pub unresponsive_episodes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupOutcome {
    Completed,
    Partial,
    Aborted,
}

impl GroupOutcome {
    pub fn classify(unresolved: usize, total: usize) -> Self {
        if unresolved == 0 {
            GroupOutcome::Completed
        } else if unresolved >= total {
            GroupOutcome::Aborted
        } else {
            GroupOutcome::Partial
        }
    }
}

/// Final result for one capability group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupReport {
    pub capability: String,
    pub unit_count: usize,
    pub last_checkpoint: Option<u32>,
    pub outcome: GroupOutcome,
    pub completed: Vec<u32>,
    /// Started but interrupted; not retried.
    pub failed: Vec<u32>,
    /// Never attempted because the group was given up on.
    pub unresolved: Vec<u32>,
    pub sessions: Vec<SessionSummary>,
}

impl GroupReport {
    pub fn new(capability: &str, unit_count: usize) -> Self {
        Self {
            capability: capability.to_string(),
            unit_count,
            last_checkpoint: None,
            outcome: GroupOutcome::Completed,
            completed: Vec::new(),
            failed: Vec::new(),
            unresolved: Vec::new(),
            sessions: Vec::new(),
        }
    }

    pub fn record_session(&mut self, session: SessionSummary) {
        if let Some(cp) = session.checkpoint {
            self.last_checkpoint = Some(self.last_checkpoint.map_or(cp, |prev| prev.max(cp)));
        }
        self.completed.extend(&session.completed);
        self.failed.extend(&session.failed);
        self.sessions.push(session);
    }

    pub fn finish(&mut self) {
        self.completed.sort_unstable();
        self.failed.sort_unstable();
        self.unresolved.sort_unstable();
        self.outcome = GroupOutcome::classify(self.unresolved.len(), self.unit_count);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub session_id: String,
    pub batch_name: String,
    pub started: String,
    pub finished: String,
    pub skipped: Vec<SkippedUnit>,
    pub groups: Vec<GroupReport>,
    pub hook_errors: Vec<String>,
}

impl BatchReport {
    pub fn all_completed(&self) -> bool {
        self.groups.iter().all(|g| g.outcome == GroupOutcome::Completed)
    }

    pub fn unresolved_count(&self) -> usize {
        self.groups.iter().map(|g| g.unresolved.len()).sum()
    }
}
