//! Environment-passed launch contract between supervisor and worker.

use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;

pub const ENV_PREFIX: &str = "BATCH_WARDEN__";

pub const SCRIPTS_FOLDER_PATH: &str = "SCRIPTS_FOLDER_PATH";
pub const TASK_SCRIPT_PATH: &str = "TASK_SCRIPT_PATH";
pub const WORK_UNIT_LIST_PATH: &str = "WORK_UNIT_LIST_PATH";
pub const PROGRESS_INDEX: &str = "PROGRESS_INDEX";
pub const OUTPUT_PIPE_HANDLE: &str = "OUTPUT_PIPE_HANDLE";
pub const SUPERVISOR_PROCESS_ID: &str = "SUPERVISOR_PROCESS_ID";
pub const HARNESS_FOLDER_PATH: &str = "HARNESS_FOLDER_PATH";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchEnvironment {
    pub scripts_folder: PathBuf,
    pub task_script: PathBuf,
    pub unit_list: PathBuf,
    /// Worker only processes units with an index at or above this.
    pub progress_index: u32,
    pub output_pipe_handle: String,
    pub supervisor_identity: String,
    pub harness_folder: Option<PathBuf>,
}

pub fn variable_name(key: &str) -> String {
    format!("{ENV_PREFIX}{key}")
}

impl LaunchEnvironment {
    pub fn vars(&self) -> Vec<(String, String)> {
        let mut vars = vec![
            (
                variable_name(SCRIPTS_FOLDER_PATH),
                self.scripts_folder.display().to_string(),
            ),
            (
                variable_name(TASK_SCRIPT_PATH),
                self.task_script.display().to_string(),
            ),
            (
                variable_name(WORK_UNIT_LIST_PATH),
                self.unit_list.display().to_string(),
            ),
            (variable_name(PROGRESS_INDEX), self.progress_index.to_string()),
            (
                variable_name(OUTPUT_PIPE_HANDLE),
                self.output_pipe_handle.clone(),
            ),
            (
                variable_name(SUPERVISOR_PROCESS_ID),
                self.supervisor_identity.clone(),
            ),
        ];
        if let Some(dir) = &self.harness_folder {
            vars.push((variable_name(HARNESS_FOLDER_PATH), dir.display().to_string()));
        }
        vars
    }

    pub fn apply(&self, cmd: &mut Command) {
        cmd.env_remove(variable_name(HARNESS_FOLDER_PATH));
        for (k, v) in self.vars() {
            cmd.env(k, v);
        }
    }

    /// Worker side: rebuilds the contract from `(name, value)` pairs.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: BTreeMap<String, String> = vars
            .into_iter()
            .filter_map(|(k, v)| k.strip_prefix(ENV_PREFIX).map(|k| (k.to_string(), v)))
            .collect();
        let required = |key: &str| {
            vars.get(key)
                .cloned()
                .ok_or_else(|| anyhow!("missing {}", variable_name(key)))
        };

        let progress_raw = required(PROGRESS_INDEX)?;
        let progress_index = progress_raw
            .trim()
            .parse()
            .with_context(|| format!("bad {}: {progress_raw:?}", variable_name(PROGRESS_INDEX)))?;

        Ok(Self {
            scripts_folder: PathBuf::from(vars.get(SCRIPTS_FOLDER_PATH).cloned().unwrap_or_default()),
            task_script: PathBuf::from(vars.get(TASK_SCRIPT_PATH).cloned().unwrap_or_default()),
            unit_list: PathBuf::from(required(WORK_UNIT_LIST_PATH)?),
            progress_index,
            output_pipe_handle: vars.get(OUTPUT_PIPE_HANDLE).cloned().unwrap_or_default(),
            supervisor_identity: vars.get(SUPERVISOR_PROCESS_ID).cloned().unwrap_or_default(),
            harness_folder: vars
                .get(HARNESS_FOLDER_PATH)
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        })
    }

    pub fn from_process_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }
}
