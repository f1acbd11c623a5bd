use crate::{
    checkpoint::CheckpointHandle,
    error::{Result, SupervisorError},
    util::{ensure_dir, write_atomic},
};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const UNIT_LIST_FILENAME_PREFIX: &str = "Session.WorkUnits.";
const UNIT_LIST_FILE_EXTENSION: &str = "json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Locator {
    File { path: PathBuf },
    Cloud { project_id: String, model_id: String },
}

impl Locator {
    pub fn is_cloud(&self) -> bool {
        matches!(self, Locator::Cloud { .. })
    }

    pub fn describe(&self) -> String {
        match self {
            Locator::File { path } => path.display().to_string(),
            Locator::Cloud {
                project_id,
                model_id,
            } => format!("cloud project={project_id} model={model_id}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOptions {
    #[serde(default)]
    pub open_in_ui: bool,
    #[serde(default)]
    pub export_folder: Option<PathBuf>,
    #[serde(default)]
    pub task_data: Option<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// One document assignment. Immutable once written to a unit list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub progress_index: u32,
    pub progress_max: u32,
    pub session_id: String,
    pub capability: String,
    pub locator: Locator,
    #[serde(default)]
    pub options: UnitOptions,
    #[serde(default)]
    pub associated_data: Vec<String>,
    /// File whose existence means the worker finished this unit.
    #[serde(default)]
    pub completion_marker: Option<PathBuf>,
}

/// Work units ordered by progress index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkUnitList {
    units: Vec<WorkUnit>,
}

impl WorkUnitList {
    pub fn new(mut units: Vec<WorkUnit>) -> Self {
        units.sort_by_key(|u| u.progress_index);
        units.dedup_by_key(|u| u.progress_index);
        Self { units }
    }

    pub fn units(&self) -> &[WorkUnit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn first_index(&self) -> Option<u32> {
        self.units.first().map(|u| u.progress_index)
    }

    pub fn last_index(&self) -> Option<u32> {
        self.units.last().map(|u| u.progress_index)
    }

    pub fn indices(&self) -> Vec<u32> {
        self.units.iter().map(|u| u.progress_index).collect()
    }

    /// Units with `progress_index >= floor`.
    pub fn from_index(&self, floor: u32) -> WorkUnitList {
        WorkUnitList {
            units: self
                .units
                .iter()
                .filter(|u| u.progress_index >= floor)
                .cloned()
                .collect(),
        }
    }

    /// Splits off the first `n` units; `self` keeps the rest.
    pub fn take_front(&mut self, n: usize) -> WorkUnitList {
        let n = n.min(self.units.len());
        let rest = self.units.split_off(n);
        let front = std::mem::replace(&mut self.units, rest);
        WorkUnitList { units: front }
    }

    /// Completion markers for every unit, or `None` when any unit has none.
    pub fn completion_markers(&self) -> Option<Vec<PathBuf>> {
        if self.units.is_empty() {
            return None;
        }
        self.units
            .iter()
            .map(|u| u.completion_marker.clone())
            .collect()
    }
}

impl IntoIterator for WorkUnitList {
    type Item = WorkUnit;
    type IntoIter = std::vec::IntoIter<WorkUnit>;

    fn into_iter(self) -> Self::IntoIter {
        self.units.into_iter()
    }
}

/// Location of a persisted unit list. The checkpoint location derives from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitListHandle(PathBuf);

impl UnitListHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn checkpoint(&self) -> CheckpointHandle {
        crate::checkpoint::derive_checkpoint_location(self)
    }
}

pub fn unique_unit_list_path(data_dir: &Path) -> PathBuf {
    data_dir.join(format!(
        "{UNIT_LIST_FILENAME_PREFIX}{}.{UNIT_LIST_FILE_EXTENSION}",
        uuid::Uuid::new_v4()
    ))
}

/// Persists `units` under a fresh unique name in `data_dir`.
pub fn write_unit_list(data_dir: &Path, units: &WorkUnitList) -> Result<UnitListHandle> {
    let path = unique_unit_list_path(data_dir);
    let write = || -> anyhow::Result<()> {
        ensure_dir(data_dir)?;
        let bytes = serde_json::to_vec_pretty(units)?;
        write_atomic(&path, &bytes).with_context(|| "write unit list")?;
        Ok(())
    };
    write().map_err(|source| SupervisorError::UnitList {
        path: path.clone(),
        source,
    })?;
    Ok(UnitListHandle(path))
}

pub fn read_unit_list(handle: &UnitListHandle) -> Result<WorkUnitList> {
    let read = || -> anyhow::Result<WorkUnitList> {
        let raw = std::fs::read(handle.path()).with_context(|| "read unit list")?;
        let units: Vec<WorkUnit> = serde_json::from_slice(&raw).with_context(|| "parse unit list")?;
        Ok(WorkUnitList::new(units))
    };
    read().map_err(|source| SupervisorError::UnitList {
        path: handle.path().to_path_buf(),
        source,
    })
}
