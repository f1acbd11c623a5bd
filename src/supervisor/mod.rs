//! Session Supervisor: launches workers group by group, watches them, and
//! resumes from the last checkpoint until every unit is settled.

pub mod group;
pub mod session;

use crate::{
    config::{Config, SupervisorSettings},
    dialog::{DialogDismisser, DialogPolicy, DisabledDismisser, NoDialogs, PolicyDismisser},
    error::Result,
    harness::{Harness, DIALOG_HANDLER_PREFIX},
    hooks::run_hook,
    monitor::{default_probe, ResponsivenessProbe},
    output::{LineFilter, OutputSink, TracingSink},
    plan::BatchPlan,
    report::BatchReport,
    util::{expand_tilde, now_rfc3339},
    worker::ProcessIdentity,
};
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub use group::next_slice;
pub use session::settle_units;

pub struct Supervisor<S: OutputSink = TracingSink> {
    cfg: Config,
    settings: SupervisorSettings,
    session_id: String,
    data_dir: PathBuf,
    identity: String,
    filter: LineFilter,
    sink: S,
    dismisser: Box<dyn DialogDismisser>,
    probe: Arc<dyn ResponsivenessProbe>,
    harness: Option<Harness>,
}

impl Supervisor<TracingSink> {
    pub fn new(cfg: &Config, session_id: &str) -> anyhow::Result<Self> {
        Self::with_sink(cfg, session_id, TracingSink)
    }
}

impl<S: OutputSink> Supervisor<S> {
    pub fn with_sink(cfg: &Config, session_id: &str, sink: S) -> anyhow::Result<Self> {
        cfg.validate()?;
        let harness = if cfg.paths.harness_dir.trim().is_empty() {
            None
        } else {
            let dir = expand_tilde(&cfg.paths.harness_dir);
            Some(Harness::open(&dir, session_id).with_context(|| "opening harness folder")?)
        };

        let dismisser: Box<dyn DialogDismisser> = if cfg.dialogs.enabled {
            let policy = DialogPolicy::from_config(&cfg.dialogs)?;
            let prefix = if harness.is_some() { DIALOG_HANDLER_PREFIX } else { "" };
            Box::new(PolicyDismisser::new(policy, NoDialogs).with_prefix(prefix))
        } else {
            Box::new(DisabledDismisser)
        };

        Ok(Self {
            settings: cfg.supervisor_settings(),
            session_id: session_id.to_string(),
            data_dir: expand_tilde(&cfg.paths.data_dir),
            identity: ProcessIdentity::current().to_string(),
            filter: LineFilter::new(&cfg.worker)?,
            sink,
            dismisser,
            probe: default_probe(),
            harness,
            cfg: cfg.clone(),
        })
    }

    pub fn with_dismisser(mut self, dismisser: Box<dyn DialogDismisser>) -> Self {
        self.dismisser = dismisser;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn ResponsivenessProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn harness(&self) -> Option<&Harness> {
        self.harness.as_ref()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Runs every group of `plan` in order, bracketed by the configured hooks.
    /// Only launch, unit list and pre-hook failures come back as errors.
    pub fn run_batch(&mut self, plan: &BatchPlan) -> Result<BatchReport> {
        let hook_timeout = Duration::from_secs(self.cfg.hooks.timeout_seconds);
        for command in self.cfg.hooks.pre.clone() {
            run_hook(&command, hook_timeout)?;
        }

        let mut report = BatchReport {
            session_id: self.session_id.clone(),
            batch_name: self.cfg.global.batch_name.clone(),
            started: now_rfc3339(),
            finished: String::new(),
            skipped: plan.skipped.clone(),
            groups: Vec::new(),
            hook_errors: Vec::new(),
        };

        info!(
            session_id = %self.session_id,
            groups = plan.groups.len(),
            units = plan.unit_count(),
            "starting batch"
        );
        for group in &plan.groups {
            let group_report = self.run_group(group)?;
            report.groups.push(group_report);
        }

        for command in self.cfg.hooks.post.clone() {
            if let Err(err) = run_hook(&command, hook_timeout) {
                error!("{err}");
                report.hook_errors.push(err.to_string());
            }
        }

        report.finished = now_rfc3339();
        let unresolved = report.unresolved_count();
        if unresolved > 0 {
            warn!(unresolved, "batch finished with unresolved units");
        } else {
            info!("batch finished; all units settled");
        }
        Ok(report)
    }
}
