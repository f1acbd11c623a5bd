use crate::{
    config::Units,
    units::{Locator, UnitOptions, WorkUnit, WorkUnitList},
};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One requested unit as written in a units file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitSpec {
    pub path: Option<PathBuf>,
    pub cloud: Option<CloudSpec>,
    pub capability: Option<String>,
    pub associated_data: Vec<String>,
    pub open_in_ui: bool,
    pub export_folder: Option<PathBuf>,
    pub task_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudSpec {
    pub project_id: String,
    pub model_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct UnitsFile {
    #[serde(default, rename = "unit")]
    units: Vec<UnitSpec>,
}

/// Reads a units file: TOML with `[[unit]]` tables when the extension is
/// `.toml`, otherwise tab-separated text (path, then associated data).
pub fn load_unit_specs(path: &Path) -> Result<Vec<UnitSpec>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading units file: {}", path.display()))?;
    let is_toml = path
        .extension()
        .and_then(|s| s.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("toml"));
    if is_toml {
        parse_units_toml(&raw).with_context(|| format!("parsing units file: {}", path.display()))
    } else {
        Ok(parse_units_text(&raw))
    }
}

pub fn parse_units_toml(raw: &str) -> Result<Vec<UnitSpec>> {
    let file: UnitsFile = toml::from_str(raw)?;
    for (i, spec) in file.units.iter().enumerate() {
        match (&spec.path, &spec.cloud) {
            (Some(_), None) | (None, Some(_)) => {}
            _ => return Err(anyhow!("unit #{} needs exactly one of `path` or `cloud`", i + 1)),
        }
    }
    Ok(file.units)
}

pub fn parse_units_text(raw: &str) -> Vec<UnitSpec> {
    raw.lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .filter_map(|line| {
            let mut cols = line.split('\t').map(str::trim);
            let path = cols.next().filter(|p| !p.is_empty())?;
            Some(UnitSpec {
                path: Some(PathBuf::from(path)),
                associated_data: cols.map(str::to_string).collect(),
                ..UnitSpec::default()
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedUnit {
    pub locator: String,
    pub reason: String,
}

/// Units sharing one worker capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitGroup {
    pub capability: String,
    pub units: WorkUnitList,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPlan {
    pub session_id: String,
    pub total: u32,
    pub groups: Vec<UnitGroup>,
    pub skipped: Vec<SkippedUnit>,
}

impl BatchPlan {
    pub fn build(cfg: &Units, session_id: &str, specs: Vec<UnitSpec>) -> BatchPlan {
        let mut skipped = Vec::new();
        let mut by_capability: BTreeMap<String, Vec<(u64, UnitSpec)>> = BTreeMap::new();

        for spec in specs {
            let size = match (&spec.path, &spec.cloud) {
                (Some(path), _) => match std::fs::metadata(path) {
                    Ok(meta) => meta.len(),
                    Err(_) if cfg.skip_missing_files => {
                        warn!("skipping missing file: {}", path.display());
                        skipped.push(SkippedUnit {
                            locator: path.display().to_string(),
                            reason: "file does not exist".into(),
                        });
                        continue;
                    }
                    Err(_) => 0,
                },
                _ => 0,
            };
            let capability = spec
                .capability
                .clone()
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| cfg.default_capability.clone());
            by_capability.entry(capability).or_default().push((size, spec));
        }

        let total = by_capability.values().map(Vec::len).sum::<usize>() as u32;
        let mut next_index = 1u32;
        let mut groups = Vec::new();

        for (capability, mut entries) in by_capability {
            if cfg.order_by_size {
                // Stable, so equal sizes keep file order.
                entries.sort_by_key(|(size, _)| *size);
            }
            let units = entries
                .into_iter()
                .filter_map(|(_, spec)| {
                    let unit = make_unit(cfg, session_id, &capability, next_index, total, spec)?;
                    next_index += 1;
                    Some(unit)
                })
                .collect();
            debug!(capability, "planned group");
            groups.push(UnitGroup {
                capability,
                units: WorkUnitList::new(units),
            });
        }

        BatchPlan {
            session_id: session_id.to_string(),
            total,
            groups,
            skipped,
        }
    }

    pub fn unit_count(&self) -> usize {
        self.groups.iter().map(|g| g.units.len()).sum()
    }
}

fn make_unit(
    cfg: &Units,
    session_id: &str,
    capability: &str,
    progress_index: u32,
    progress_max: u32,
    spec: UnitSpec,
) -> Option<WorkUnit> {
    let locator = match (spec.path, spec.cloud) {
        (Some(path), _) => Locator::File { path },
        (None, Some(cloud)) => Locator::Cloud {
            project_id: cloud.project_id,
            model_id: cloud.model_id,
        },
        (None, None) => return None,
    };
    let completion_marker = spec
        .export_folder
        .as_ref()
        .filter(|_| !cfg.completion_marker.trim().is_empty())
        .map(|dir| dir.join(&cfg.completion_marker));
    Some(WorkUnit {
        progress_index,
        progress_max,
        session_id: session_id.to_string(),
        capability: capability.to_string(),
        locator,
        options: UnitOptions {
            open_in_ui: spec.open_in_ui,
            export_folder: spec.export_folder,
            task_data: spec.task_data,
            extra: BTreeMap::new(),
        },
        associated_data: spec.associated_data,
        completion_marker,
    })
}
