//! Worker-side half of the launch contract.
//!
//! One `WorkerContext` lives for the whole worker process and is passed to
//! whatever drives the units; there is no global "current unit" state.

use super::{env::LaunchEnvironment, identity::ProcessIdentity};
use crate::{
    checkpoint::{write_checkpoint, CheckpointHandle},
    error::Result,
    output::channel::attach_writer,
    units::{read_unit_list, UnitListHandle, WorkUnit, WorkUnitList},
};
use std::fs::File;
use std::io::Write;

pub struct WorkerContext {
    env: LaunchEnvironment,
    units: WorkUnitList,
    checkpoint: CheckpointHandle,
    channel: Option<File>,
    supervisor: Option<ProcessIdentity>,
}

impl WorkerContext {
    pub fn from_env() -> anyhow::Result<Self> {
        let env = LaunchEnvironment::from_process_env()?;
        Ok(Self::from_environment(env)?)
    }

    pub fn from_environment(env: LaunchEnvironment) -> Result<Self> {
        let handle = UnitListHandle::new(&env.unit_list);
        let units = read_unit_list(&handle)?;
        // A missing channel only costs us log lines.
        let channel = (!env.output_pipe_handle.is_empty())
            .then(|| attach_writer(&env.output_pipe_handle).ok())
            .flatten();
        let supervisor = env.supervisor_identity.parse().ok();
        Ok(Self {
            checkpoint: handle.checkpoint(),
            env,
            units,
            channel,
            supervisor,
        })
    }

    pub fn environment(&self) -> &LaunchEnvironment {
        &self.env
    }

    pub fn progress_index(&self) -> u32 {
        self.env.progress_index
    }

    /// Units at or above the starting index, in order.
    pub fn pending_units(&self) -> Vec<WorkUnit> {
        self.units.from_index(self.env.progress_index).into_iter().collect()
    }

    /// Records `unit` as the last one started. Must precede any work on it.
    pub fn begin_unit(&self, unit: &WorkUnit) -> std::io::Result<()> {
        write_checkpoint(&self.checkpoint, unit.progress_index)
    }

    /// Writes one line to the supervisor. A dead reader detaches the channel.
    pub fn output(&mut self, line: &str) {
        let Some(channel) = self.channel.as_mut() else {
            return;
        };
        let written = channel
            .write_all(line.as_bytes())
            .and_then(|_| channel.write_all(b"\n"))
            .and_then(|_| channel.flush());
        if written.is_err() {
            self.channel = None;
        }
    }

    pub fn has_output_channel(&self) -> bool {
        self.channel.is_some()
    }

    /// False once the launching supervisor is gone; the worker should stop.
    pub fn supervisor_alive(&self) -> bool {
        self.supervisor.map(|s| s.is_running()).unwrap_or(true)
    }
}
