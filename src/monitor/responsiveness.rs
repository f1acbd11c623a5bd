use crate::procstat::read_proc_stat;
use std::sync::Arc;

/// Asks the OS whether a process can currently service its input.
///
/// `None` means the answer is unknown; callers treat that as responsive so a
/// flaky query never raises a false alarm.
pub trait ResponsivenessProbe: Send + Sync {
    fn is_responding(&self, pid: u32) -> Option<bool>;
}

/// Reads the scheduler state from `/proc/<pid>/stat`. Stopped, traced and
/// uninterruptible-sleep processes count as unresponsive.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcStateProbe;

impl ResponsivenessProbe for ProcStateProbe {
    fn is_responding(&self, pid: u32) -> Option<bool> {
        let stat = read_proc_stat(pid)?;
        Some(state_is_responsive(stat.state))
    }
}

pub fn state_is_responsive(state: char) -> bool {
    !matches!(state, 'T' | 't' | 'D')
}

/// Never knows; every process looks responsive.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnknownProbe;

impl ResponsivenessProbe for UnknownProbe {
    fn is_responding(&self, _pid: u32) -> Option<bool> {
        None
    }
}

pub fn default_probe() -> Arc<dyn ResponsivenessProbe> {
    if cfg!(target_os = "linux") {
        Arc::new(ProcStateProbe)
    } else {
        Arc::new(UnknownProbe)
    }
}

pub fn probe_name() -> &'static str {
    if cfg!(target_os = "linux") {
        "proc_state"
    } else {
        "unknown"
    }
}
