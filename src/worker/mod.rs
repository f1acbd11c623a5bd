pub mod context;
pub mod demo;
pub mod env;
pub mod identity;

use crate::{
    config::WorkerConfig,
    error::{Result, SupervisorError},
    monitor::{MonitoredProcess, ResponsivenessProbe},
    output::OutputChannel,
    util::expand_tilde,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const REAP_POLL: Duration = Duration::from_millis(20);

pub use context::WorkerContext;
pub use env::LaunchEnvironment;
pub use identity::ProcessIdentity;

/// How to start a worker for one capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl WorkerCommand {
    pub fn for_capability(cfg: &WorkerConfig, capability: &str) -> Result<Self> {
        let raw = cfg
            .executables
            .get(capability)
            .map(String::as_str)
            .unwrap_or(cfg.executable.as_str())
            .trim();
        if raw.is_empty() {
            return Err(SupervisorError::Config(format!(
                "no worker executable configured for capability '{capability}'"
            )));
        }
        Ok(Self {
            executable: resolve_executable(raw),
            args: cfg.args.clone(),
            working_dir: (!cfg.working_dir.trim().is_empty()).then(|| expand_tilde(&cfg.working_dir)),
            env: cfg.env.clone(),
        })
    }

    pub fn launch(
        &self,
        launch_env: &LaunchEnvironment,
        channel: Option<&OutputChannel>,
        probe: Arc<dyn ResponsivenessProbe>,
    ) -> Result<WorkerProcess> {
        let mut cmd = Command::new(&self.executable);
        cmd.args(&self.args);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        launch_env.apply(&mut cmd);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        #[cfg(unix)]
        if let Some(fd) = channel.and_then(OutputChannel::client_fd) {
            crate::output::channel::map_into_child(&mut cmd, fd);
        }
        #[cfg(not(unix))]
        let _ = channel;

        debug!("spawning worker {} {:?}", self.executable.display(), self.args);
        let child = cmd.spawn().map_err(|source| SupervisorError::Launch {
            executable: self.executable.display().to_string(),
            source,
        })?;
        Ok(WorkerProcess::new(child, probe))
    }
}

/// `"self"` is the running batch-warden binary, handy for the demo worker.
fn resolve_executable(raw: &str) -> PathBuf {
    if raw == "self" {
        if let Ok(exe) = std::env::current_exe() {
            return exe;
        }
    }
    expand_tilde(raw)
}

pub fn executable_exists(path: &Path) -> bool {
    if path.components().count() > 1 {
        return path.is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(path).is_file()))
        .unwrap_or(false)
}

/// Supervisor-side handle for one launched worker.
pub struct WorkerProcess {
    child: Child,
    pid: u32,
    probe: Arc<dyn ResponsivenessProbe>,
    status: Option<ExitStatus>,
    query_failed: bool,
}

impl WorkerProcess {
    fn new(child: Child, probe: Arc<dyn ResponsivenessProbe>) -> Self {
        let pid = child.id();
        Self {
            child,
            pid,
            probe,
            status: None,
            query_failed: false,
        }
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Unconditional termination.
    pub fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill()
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.status
    }

    /// Waits up to `limit` for the process to be reaped. Used only after a kill.
    pub fn wait_for(&mut self, limit: Duration) -> Option<ExitStatus> {
        let deadline = Instant::now() + limit;
        while self.status.is_none() {
            match self.child.try_wait() {
                Ok(Some(status)) => self.status = Some(status),
                Ok(None) if Instant::now() < deadline => std::thread::sleep(REAP_POLL),
                Ok(None) => {
                    warn!(pid = self.pid, "worker not reaped after {limit:?}");
                    break;
                }
                Err(err) => {
                    debug!(pid = self.pid, "try_wait failed: {err}");
                    break;
                }
            }
        }
        self.status
    }
}

impl MonitoredProcess for WorkerProcess {
    fn id(&self) -> u32 {
        self.pid
    }

    fn has_exited(&mut self) -> bool {
        if self.status.is_some() || self.query_failed {
            return true;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.status = Some(status);
                true
            }
            Ok(None) => false,
            Err(err) => {
                debug!(pid = self.pid, "try_wait failed, treating worker as gone: {err}");
                self.query_failed = true;
                true
            }
        }
    }

    fn is_responding(&mut self) -> bool {
        self.probe.is_responding(self.pid).unwrap_or(true)
    }
}
