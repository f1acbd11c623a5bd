//! Harness mode: structured side-files for external test drivers.

use crate::{timeout::TimeoutKind, util::{ensure_dir, now_rfc3339}};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const SESSION_ID_FILENAME: &str = "session_id.txt";
pub const WORKER_PIDS_FILENAME: &str = "worker_pids.txt";
pub const EVENTS_FILENAME: &str = "events.jsonl";

pub const BUSY_MONITOR_PREFIX: &str = "[ WORKER BUSY MONITOR ] ";
pub const DIALOG_HANDLER_PREFIX: &str = "[ DIALOG HANDLER ] ";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HarnessEvent {
    Launched {
        capability: String,
        pid: u32,
        floor: u32,
        slice: Vec<u32>,
    },
    Checkpoint {
        pid: u32,
        index: u32,
    },
    BeginUnresponsive {
        pid: u32,
    },
    EndUnresponsive {
        pid: u32,
        seconds: f64,
    },
    TimedOut {
        pid: u32,
        timeout: TimeoutKind,
    },
    Killed {
        pid: u32,
    },
    Exited {
        pid: u32,
        exit_code: Option<i32>,
        checkpoint: Option<u32>,
        next_index: Option<u32>,
    },
    Resuming {
        capability: String,
        next_index: u32,
    },
    GroupFinished {
        capability: String,
        unresolved: usize,
    },
}

#[derive(Debug, Clone)]
pub struct Harness {
    dir: PathBuf,
}

impl Harness {
    pub fn open(dir: &Path, session_id: &str) -> Result<Self> {
        ensure_dir(dir)?;
        std::fs::write(dir.join(SESSION_ID_FILENAME), session_id)
            .with_context(|| format!("writing {SESSION_ID_FILENAME}"))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_worker_pid(&self, pid: u32) {
        self.append(WORKER_PIDS_FILENAME, &pid.to_string());
    }

    pub fn record(&self, event: HarnessEvent) {
        let line = match serde_json::to_value(&event) {
            Ok(serde_json::Value::Object(mut obj)) => {
                obj.insert("at".into(), now_rfc3339().into());
                serde_json::Value::Object(obj).to_string()
            }
            Ok(other) => other.to_string(),
            Err(err) => {
                debug!("could not encode harness event: {err}");
                return;
            }
        };
        self.append(EVENTS_FILENAME, &line);
    }

    fn append(&self, name: &str, line: &str) {
        let path = self.dir.join(name);
        let res = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| writeln!(f, "{line}"));
        if let Err(err) = res {
            debug!("harness write to {} failed: {err}", path.display());
        }
    }
}
