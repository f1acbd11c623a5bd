//! Checkpoint store: the progress index of the last unit a worker began.
//!
//! The worker is the only writer. The supervisor only reads, and treats a
//! missing or unparseable file as "no progress yet".

use crate::{units::UnitListHandle, util::write_atomic};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::debug;

const CHECKPOINT_FILE_EXTENSION: &str = "progress";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointHandle(PathBuf);

impl CheckpointHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

/// `Session.WorkUnits.<id>.json` -> `Session.WorkUnits.<id>.progress`
pub fn derive_checkpoint_location(handle: &UnitListHandle) -> CheckpointHandle {
    CheckpointHandle(handle.path().with_extension(CHECKPOINT_FILE_EXTENSION))
}

pub fn read_checkpoint(handle: &CheckpointHandle) -> Option<u32> {
    let raw = std::fs::read_to_string(handle.path()).ok()?;
    parse_checkpoint(&raw)
}

pub fn parse_checkpoint(raw: &str) -> Option<u32> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok()
}

pub fn write_checkpoint(handle: &CheckpointHandle, index: u32) -> std::io::Result<()> {
    write_atomic(handle.path(), index.to_string().as_bytes())
}

/// Supervisor-side view of one worker's checkpoint, polled on a coarse interval.
#[derive(Debug, Clone)]
pub struct CheckpointWatch {
    handle: CheckpointHandle,
    interval: std::time::Duration,
    last_polled: Instant,
    value: Option<u32>,
    changed_at: Instant,
}

impl CheckpointWatch {
    pub fn new(handle: CheckpointHandle, interval: std::time::Duration, now: Instant) -> Self {
        Self {
            handle,
            interval,
            last_polled: now,
            value: None,
            changed_at: now,
        }
    }

    pub fn handle(&self) -> &CheckpointHandle {
        &self.handle
    }

    pub fn value(&self) -> Option<u32> {
        self.value
    }

    pub fn changed_at(&self) -> Instant {
        self.changed_at
    }

    /// Reads the store if the poll interval has elapsed. Returns the new value
    /// when it advanced.
    pub fn poll(&mut self, now: Instant) -> Option<u32> {
        if now.saturating_duration_since(self.last_polled) <= self.interval {
            return None;
        }
        self.last_polled = now;
        let read = read_checkpoint(&self.handle);
        self.observe(read, now)
    }

    /// Folds one read into the watch. Values never move backwards.
    pub fn observe(&mut self, read: Option<u32>, now: Instant) -> Option<u32> {
        let value = read?;
        match self.value {
            Some(current) if value == current => None,
            Some(current) if value < current => {
                debug!(current, read = value, "ignoring checkpoint regression");
                None
            }
            _ => {
                self.value = Some(value);
                self.changed_at = now;
                Some(value)
            }
        }
    }

    /// Unconditional read used once the worker is gone.
    pub fn read_final(&mut self, now: Instant) -> Option<u32> {
        let read = read_checkpoint(&self.handle);
        self.observe(read, now);
        self.value
    }
}
