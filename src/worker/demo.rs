//! Reference worker used for smoke tests.
//!
//! It honours the launch contract and fakes document work. Each unit's
//! `task_data` may carry comma-separated directives that script failures:
//! `hang_before`, `hang_during`, `crash_during`, `crash_after`, `linger`,
//! `sleep=<ms>`, `stderr=<text>`.

use super::context::WorkerContext;
use crate::{units::WorkUnit, util::write_atomic};
use anyhow::{Context, Result};
use std::time::Duration;

pub const EXIT_CRASHED: i32 = 3;
pub const EXIT_SUPERVISOR_GONE: i32 = 4;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Directives {
    pub hang_before: bool,
    pub hang_during: bool,
    pub crash_during: bool,
    pub crash_after: bool,
    pub linger: bool,
    pub sleep_ms: u64,
    pub stderr: Option<String>,
}

impl Directives {
    pub fn parse(raw: &str) -> Self {
        let mut d = Directives::default();
        for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match item.split_once('=') {
                Some(("sleep", ms)) => d.sleep_ms = ms.trim().parse().unwrap_or(0),
                Some(("stderr", text)) => d.stderr = Some(text.to_string()),
                _ => match item {
                    "hang_before" => d.hang_before = true,
                    "hang_during" => d.hang_during = true,
                    "crash_during" => d.crash_during = true,
                    "crash_after" => d.crash_after = true,
                    "linger" => d.linger = true,
                    _ => {}
                },
            }
        }
        d
    }

    fn of(unit: &WorkUnit) -> Self {
        Self::parse(unit.options.task_data.as_deref().unwrap_or(""))
    }
}

/// Runs the demo worker against the current environment; returns the exit code.
pub fn run() -> Result<i32> {
    let mut ctx = WorkerContext::from_env().context("demo worker launch environment")?;
    let pending = ctx.pending_units();
    println!(
        "demo worker pid={} starting at index {} with {} unit(s)",
        std::process::id(),
        ctx.progress_index(),
        pending.len()
    );

    let mut linger = false;
    for unit in &pending {
        if !ctx.supervisor_alive() {
            eprintln!("supervisor is no longer running; aborting");
            return Ok(EXIT_SUPERVISOR_GONE);
        }
        let directives = Directives::of(unit);
        linger |= directives.linger;

        if directives.hang_before {
            return Ok(hang(&ctx));
        }
        ctx.begin_unit(unit).context("write checkpoint")?;
        ctx.output(&format!(
            "processing unit {} of {}: {}",
            unit.progress_index,
            unit.progress_max,
            unit.locator.describe()
        ));
        if let Some(text) = &directives.stderr {
            eprintln!("{text}");
        }
        if directives.sleep_ms > 0 {
            std::thread::sleep(Duration::from_millis(directives.sleep_ms));
        }
        if directives.crash_during {
            return Ok(EXIT_CRASHED);
        }
        if directives.hang_during {
            return Ok(hang(&ctx));
        }
        if let Some(marker) = &unit.completion_marker {
            if let Some(parent) = marker.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let body = serde_json::json!({ "progress_index": unit.progress_index });
            write_atomic(marker, body.to_string().as_bytes())?;
        }
        ctx.output(&format!("finished unit {}", unit.progress_index));
        if directives.crash_after {
            return Ok(EXIT_CRASHED);
        }
    }

    if linger {
        return Ok(hang(&ctx));
    }
    Ok(0)
}

/// Stops making progress until killed or orphaned.
fn hang(ctx: &WorkerContext) -> i32 {
    loop {
        std::thread::sleep(Duration::from_millis(200));
        if !ctx.supervisor_alive() {
            return EXIT_SUPERVISOR_GONE;
        }
    }
}
