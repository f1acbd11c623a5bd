use crate::procstat::read_proc_stat;
use std::fmt;
use std::str::FromStr;

/// A process id plus its start time, so a recycled pid is not mistaken for
/// the original process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessIdentity {
    pub pid: u32,
    /// Clock ticks since boot; 0 when the platform cannot tell.
    pub start_ticks: u64,
}

impl ProcessIdentity {
    pub fn of(pid: u32) -> Self {
        let start_ticks = read_proc_stat(pid).map(|s| s.start_ticks).unwrap_or(0);
        Self { pid, start_ticks }
    }

    pub fn current() -> Self {
        Self::of(std::process::id())
    }

    pub fn is_running(&self) -> bool {
        if cfg!(target_os = "linux") {
            return match read_proc_stat(self.pid) {
                Some(stat) => {
                    stat.state != 'Z' && (self.start_ticks == 0 || stat.start_ticks == self.start_ticks)
                }
                None => false,
            };
        }
        pid_exists(self.pid)
    }
}

#[cfg(unix)]
fn pid_exists(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    // Signal 0 only checks for existence; EPERM still means it exists.
    matches!(kill(Pid::from_raw(raw), None), Ok(()) | Err(Errno::EPERM))
}

#[cfg(not(unix))]
fn pid_exists(_pid: u32) -> bool {
    true
}

impl fmt::Display for ProcessIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.pid, self.start_ticks)
    }
}

impl FromStr for ProcessIdentity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (pid, ticks) = s
            .trim()
            .split_once('|')
            .ok_or_else(|| anyhow::anyhow!("process identity without '|': {s:?}"))?;
        Ok(Self {
            pid: pid.parse()?,
            start_ticks: ticks.parse()?,
        })
    }
}
