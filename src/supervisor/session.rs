//! One supervised worker launch: Launching, Monitoring, a timeout or a plain
//! exit, then Finalizing.

use super::Supervisor;
use crate::{
    checkpoint::CheckpointWatch,
    dialog::DialogDismisser,
    error::{Result, SupervisorError},
    harness::{Harness, HarnessEvent, BUSY_MONITOR_PREFIX},
    monitor::{monitor_process, MonitoredProcess, UnresponsiveObserver},
    output::{LineDrain, LineFilter, OutputChannel, OutputLine, OutputSink, StreamKind},
    report::SessionSummary,
    timeout::{ProgressState, TimeoutKind, TimeoutPolicy},
    units::{write_unit_list, UnitListHandle, WorkUnitList},
    util::{expand_tilde, now_rfc3339, remove_file_quietly},
    worker::{LaunchEnvironment, WorkerCommand, WorkerProcess},
};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const REAP_TIMEOUT: Duration = Duration::from_secs(5);

impl<S: OutputSink> Supervisor<S> {
    /// Launches one worker on `slice` and supervises it until it is gone.
    pub fn run_session(&mut self, capability: &str, slice: &WorkUnitList) -> Result<SessionSummary> {
        let floor = slice.first_index().unwrap_or(1);
        let started = now_rfc3339();

        // Launching
        let command = WorkerCommand::for_capability(&self.cfg.worker, capability)?;
        let unit_list = write_unit_list(&self.data_dir, slice)?;
        let checkpoint = unit_list.checkpoint();
        remove_file_quietly(checkpoint.path());

        let mut channel = match OutputChannel::create() {
            Ok(channel) => channel,
            Err(err) => {
                self.remove_session_files(&unit_list);
                return Err(SupervisorError::Channel(err));
            }
        };
        let launch_env = LaunchEnvironment {
            scripts_folder: expand_tilde(&self.cfg.paths.scripts_dir),
            task_script: expand_tilde(&self.cfg.worker.task_script),
            unit_list: unit_list.path().to_path_buf(),
            progress_index: floor,
            output_pipe_handle: channel.client_handle_string().unwrap_or_default(),
            supervisor_identity: self.identity.clone(),
            harness_folder: self.harness.as_ref().map(|h| h.dir().to_path_buf()),
        };
        let mut worker = match command.launch(&launch_env, Some(&channel), self.probe.clone()) {
            Ok(worker) => worker,
            Err(err) => {
                self.remove_session_files(&unit_list);
                return Err(err);
            }
        };
        channel.release_client_handle();
        let launched_at = Instant::now();
        let pid = worker.id();

        info!(
            capability,
            pid,
            floor,
            units = slice.len(),
            "launched worker {}",
            command.executable.display()
        );
        if let Some(h) = &self.harness {
            h.record_worker_pid(pid);
            h.record(HarnessEvent::Launched {
                capability: capability.to_string(),
                pid,
                floor,
                slice: slice.indices(),
            });
        }

        // Monitoring
        let streams = WorkerStreams {
            channel: channel.into_drain(),
            stdout: worker
                .take_stdout()
                .map(|s| LineDrain::spawn("stdout", s))
                .unwrap_or_else(|| LineDrain::closed("stdout")),
            stderr: worker
                .take_stderr()
                .map(|s| LineDrain::spawn("stderr", s))
                .unwrap_or_else(|| LineDrain::closed("stderr")),
        };
        let mut session = SessionMonitor {
            pid,
            streams,
            watch: CheckpointWatch::new(checkpoint, self.settings.checkpoint_interval, launched_at),
            progress: ProgressState::new(launched_at),
            timeouts: self.settings.timeouts,
            markers: slice.completion_markers(),
            artifact_check_interval: self.settings.checkpoint_interval,
            last_artifact_check: None,
            timed_out: None,
            killed: false,
            filter: &self.filter,
            sink: &mut self.sink,
            dismisser: self.dismisser.as_mut(),
            harness: self.harness.as_ref(),
        };
        let mut busy = BusyMonitor {
            pid,
            prefix: if self.harness.is_some() { BUSY_MONITOR_PREFIX } else { "" },
            harness: self.harness.as_ref(),
            episodes: 0,
        };

        monitor_process(
            &mut worker,
            &self.settings.monitor,
            |w| session.tick(w),
            &mut busy,
        );

        // Finalizing
        if worker.exit_status().is_none() {
            // Exit could not be confirmed; make sure nothing is left running.
            if let Err(err) = worker.kill() {
                warn!(pid, "failed to kill worker: {err}");
            }
            worker.wait_for(REAP_TIMEOUT);
        }
        session.streams.drain_remaining(self.settings.final_drain, pid, session.filter, session.sink);

        let now = Instant::now();
        let last = session.watch.read_final(now);
        let ceiling = slice.last_index().unwrap_or(floor);
        let accepted = last.filter(|cp| (floor..=ceiling).contains(cp));
        if last.is_some() && accepted.is_none() {
            warn!(pid, checkpoint = ?last, floor, ceiling, "ignoring checkpoint outside the launched units");
        }
        let next_index = accepted.and_then(|cp| cp.checked_add(1));
        let exit_code = worker.exit_status().and_then(|s| s.code());
        let clean_exit = session.timed_out.is_none()
            && worker.exit_status().is_some_and(|s| s.success());
        let (completed, failed) = settle_units(slice, next_index.and(accepted), clean_exit);

        match (session.timed_out, next_index) {
            (Some(kind), _) => warn!(pid, checkpoint = ?last, "worker stopped after timeout: {}", kind.describe()),
            (None, Some(_)) => info!(pid, checkpoint = ?last, exit_code = ?exit_code, "worker exited"),
            (None, None) => warn!(pid, exit_code = ?exit_code, "worker exited without recording any progress"),
        }
        if !failed.is_empty() {
            warn!(pid, ?failed, "unit interrupted without a completion artifact; not retrying it");
        }
        if let Some(h) = &self.harness {
            h.record(HarnessEvent::Exited {
                pid,
                exit_code,
                checkpoint: last,
                next_index,
            });
        }

        let summary = SessionSummary {
            pid,
            capability: capability.to_string(),
            floor,
            slice: slice.indices(),
            started,
            finished: now_rfc3339(),
            checkpoint: last,
            next_index,
            timed_out: session.timed_out,
            killed: session.killed,
            exit_code,
            completed,
            failed,
            unresponsive_episodes: busy.episodes,
        };
        self.remove_session_files(&unit_list);
        Ok(summary)
    }

    fn remove_session_files(&self, unit_list: &UnitListHandle) {
        if self.settings.keep_session_files {
            return;
        }
        remove_file_quietly(unit_list.checkpoint().path());
        remove_file_quietly(unit_list.path());
    }
}

/// Splits a finished launch's slice into completed and failed units.
///
/// Everything before the checkpoint was finished. The checkpointed unit
/// counts as finished after a clean exit or when its completion marker
/// exists; otherwise it failed. Units after it are left pending.
pub fn settle_units(
    slice: &WorkUnitList,
    checkpoint: Option<u32>,
    clean_exit: bool,
) -> (Vec<u32>, Vec<u32>) {
    let Some(cp) = checkpoint else {
        return (Vec::new(), Vec::new());
    };
    let mut completed = Vec::new();
    let mut failed = Vec::new();
    for unit in slice.units() {
        if unit.progress_index < cp {
            completed.push(unit.progress_index);
        } else if unit.progress_index == cp {
            let marked = unit.completion_marker.as_ref().is_some_and(|m| m.exists());
            if clean_exit || marked {
                completed.push(cp);
            } else {
                failed.push(cp);
            }
        }
    }
    (completed, failed)
}

struct WorkerStreams {
    channel: LineDrain,
    stdout: LineDrain,
    stderr: LineDrain,
}

impl WorkerStreams {
    fn drain<S: OutputSink + ?Sized>(&mut self, pid: u32, filter: &LineFilter, sink: &mut S) {
        for (kind, drain) in [
            (StreamKind::Channel, &mut self.channel),
            (StreamKind::Stdout, &mut self.stdout),
            (StreamKind::Stderr, &mut self.stderr),
        ] {
            emit_lines(kind, drain.drain_available_lines(), pid, filter, sink);
        }
    }

    /// One shared budget for all three streams.
    fn drain_remaining<S: OutputSink + ?Sized>(
        &mut self,
        budget: Duration,
        pid: u32,
        filter: &LineFilter,
        sink: &mut S,
    ) {
        let deadline = Instant::now() + budget;
        for (kind, drain) in [
            (StreamKind::Channel, &mut self.channel),
            (StreamKind::Stdout, &mut self.stdout),
            (StreamKind::Stderr, &mut self.stderr),
        ] {
            let left = deadline.saturating_duration_since(Instant::now());
            emit_lines(kind, drain.drain_remaining(left), pid, filter, sink);
        }
    }
}

fn emit_lines<S: OutputSink + ?Sized>(
    stream: StreamKind,
    lines: Vec<String>,
    pid: u32,
    filter: &LineFilter,
    sink: &mut S,
) {
    for line in lines {
        if let Some(text) = filter.accept(stream, &line) {
            sink.emit(&OutputLine { stream, pid, text });
        }
    }
}

struct SessionMonitor<'a, S: OutputSink> {
    pid: u32,
    streams: WorkerStreams,
    watch: CheckpointWatch,
    progress: ProgressState,
    timeouts: TimeoutPolicy,
    /// Fixed at launch from the launch's slice.
    markers: Option<Vec<PathBuf>>,
    artifact_check_interval: Duration,
    last_artifact_check: Option<Instant>,
    timed_out: Option<TimeoutKind>,
    killed: bool,
    filter: &'a LineFilter,
    sink: &'a mut S,
    dismisser: &'a mut dyn DialogDismisser,
    harness: Option<&'a Harness>,
}

impl<S: OutputSink> SessionMonitor<'_, S> {
    fn tick(&mut self, worker: &mut WorkerProcess) {
        let now = Instant::now();
        self.streams.drain(self.pid, self.filter, self.sink);

        if let Some(index) = self.watch.poll(now) {
            info!(pid = self.pid, checkpoint = index, "worker began unit {index}");
            if let Some(h) = self.harness {
                h.record(HarnessEvent::Checkpoint {
                    pid: self.pid,
                    index,
                });
            }
        }
        self.progress.checkpoint = self.watch.value();
        self.progress.checkpoint_changed_at = self.watch.changed_at();
        self.check_artifacts(now);

        if let Some(kind) = self.timeouts.evaluate(&self.progress, now) {
            self.force_terminate(worker, kind);
            return;
        }

        if let Err(err) = self.dismisser.dismiss_blocking_dialogs(self.pid) {
            warn!(pid = self.pid, "dialog handler failed: {err:#}");
        }
    }

    fn check_artifacts(&mut self, now: Instant) {
        if self.progress.artifacts_seen_at.is_some() {
            return;
        }
        let Some(markers) = &self.markers else {
            return;
        };
        if self
            .last_artifact_check
            .is_some_and(|at| now.saturating_duration_since(at) <= self.artifact_check_interval)
        {
            return;
        }
        self.last_artifact_check = Some(now);
        if markers.iter().all(|m| m.exists()) {
            info!(pid = self.pid, "all completion artifacts present; waiting for worker to exit");
            self.progress.artifacts_seen_at = Some(now);
        }
    }

    fn force_terminate(&mut self, worker: &mut WorkerProcess, kind: TimeoutKind) {
        if self.timed_out.is_none() {
            warn!(pid = self.pid, timeout = ?kind, "{}", kind.describe());
            self.timed_out = Some(kind);
            if let Some(h) = self.harness {
                h.record(HarnessEvent::TimedOut {
                    pid: self.pid,
                    timeout: kind,
                });
            }
        }
        if self.killed {
            return;
        }
        match worker.kill() {
            Ok(()) => {
                warn!(pid = self.pid, "killed worker");
                self.killed = true;
                if let Some(h) = self.harness {
                    h.record(HarnessEvent::Killed { pid: self.pid });
                }
            }
            // Retried on the next tick while the process is still around.
            Err(err) => warn!(pid = self.pid, "failed to kill worker: {err}"),
        }
    }
}

struct BusyMonitor<'a> {
    pid: u32,
    prefix: &'static str,
    harness: Option<&'a Harness>,
    episodes: u32,
}

impl UnresponsiveObserver for BusyMonitor<'_> {
    fn on_begin_unresponsive(&mut self) {
        self.episodes += 1;
        warn!(pid = self.pid, "{}worker is not responding", self.prefix);
        if let Some(h) = self.harness {
            h.record(HarnessEvent::BeginUnresponsive { pid: self.pid });
        }
    }

    fn on_end_unresponsive(&mut self, duration: Duration) {
        info!(
            pid = self.pid,
            "{}worker is responding again after {:.1}s",
            self.prefix,
            duration.as_secs_f64()
        );
        debug!(pid = self.pid, episodes = self.episodes, "unresponsive episode closed");
        if let Some(h) = self.harness {
            h.record(HarnessEvent::EndUnresponsive {
                pid: self.pid,
                seconds: duration.as_secs_f64(),
            });
        }
    }
}
