//! Table-driven handling of blocking dialogs raised inside a worker.
//!
//! Each tick the supervisor asks a [`DialogDismisser`] to clear whatever
//! modal windows the worker is stuck on. The shipped [`PolicyDismisser`]
//! classifies every dialog against a rule table and acts on the verdict.
//! Enumerating and clicking windows is platform work behind [`DialogSource`].
//! Nothing in here is ever fatal to the monitor tick.

use crate::config::Dialogs;
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

pub const DEFAULT_FALLBACK_LABELS: &[&str] = &[
    "OK",
    "Close",
    "No",
    "Always Load",
    "Fermer",
    "Schließen",
    "Cerrar",
    "Chiudi",
    "Non",
    "Nein",
    "Ja",
    "Oui",
];

pub const HOST_ERROR_WINDOW_TITLE: &str = "Batch Warden Error";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogInfo {
    pub handle: u64,
    pub title: String,
    pub buttons: Vec<String>,
    pub static_text: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogAction {
    /// Goes away on its own.
    Ignore,
    Click(String),
    Close,
    /// Log the dialog once per worker and leave it up.
    ReportOnce,
    /// Log everything and try the priority list of common labels.
    Fallback,
}

#[derive(Debug, Clone)]
pub struct DialogRule {
    title: Regex,
    button_count: Option<usize>,
    action: DialogAction,
}

impl DialogRule {
    pub fn new(title: &str, button_count: Option<usize>, action: DialogAction) -> Result<Self> {
        let title = Regex::new(&format!("^(?:{title})$"))
            .with_context(|| format!("dialog rule title: {title}"))?;
        Ok(Self {
            title,
            button_count,
            action,
        })
    }

    fn matches(&self, dialog: &DialogInfo) -> bool {
        self.title.is_match(&dialog.title)
            && self
                .button_count
                .is_none_or(|count| count == dialog.buttons.len())
    }
}

#[derive(Debug, Clone)]
pub struct DialogPolicy {
    rules: Vec<DialogRule>,
    fallback_labels: Vec<String>,
}

impl DialogPolicy {
    pub fn from_config(cfg: &Dialogs) -> Result<Self> {
        let mut rules = cfg
            .rules
            .iter()
            .map(|r| DialogRule::new(&r.title, r.button_count, r.action.clone()))
            .collect::<Result<Vec<_>>>()?;
        if cfg.use_default_rules {
            rules.extend(default_rules()?);
        }
        Ok(Self {
            rules,
            fallback_labels: cfg.fallback_labels.clone(),
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::from_config(&Dialogs::default())
    }

    pub fn classify(&self, dialog: &DialogInfo) -> DialogAction {
        self.rules
            .iter()
            .find(|r| r.matches(dialog))
            .map(|r| r.action.clone())
            .unwrap_or(DialogAction::Fallback)
    }

    /// First priority label that matches exactly one button.
    pub fn fallback_target<'a>(&self, buttons: &'a [String]) -> Option<&'a str> {
        self.fallback_labels.iter().find_map(|label| {
            let mut hits = buttons.iter().filter(|b| button_text_matches(b, label));
            match (hits.next(), hits.next()) {
                (Some(only), None) => Some(only.as_str()),
                _ => None,
            }
        })
    }
}

fn default_rules() -> Result<Vec<DialogRule>> {
    Ok(vec![
        DialogRule::new("Model Upgrade", Some(0), DialogAction::Ignore)?,
        DialogRule::new(&regex::escape(HOST_ERROR_WINDOW_TITLE), None, DialogAction::ReportOnce)?,
        DialogRule::new(
            "Changes Not Saved",
            Some(4),
            DialogAction::Click("Do not save the project".into()),
        )?,
        DialogRule::new(
            "Close Project Without Saving",
            Some(3),
            DialogAction::Click("Relinquish all elements and worksets".into()),
        )?,
        DialogRule::new("Save File", Some(3), DialogAction::Click("No".into()))?,
        DialogRule::new(
            "Editable Elements",
            Some(3),
            DialogAction::Click("Relinquish elements and worksets".into()),
        )?,
        DialogRule::new("Autodesk Customer Involvement Program", None, DialogAction::Close)?,
    ])
}

/// Button captions often carry accelerator markers (`&OK`) and padding.
pub fn button_text_matches(button: &str, label: &str) -> bool {
    button.replace('&', "").trim().eq_ignore_ascii_case(label.trim())
}

/// Platform access to a worker's top-level dialogs.
pub trait DialogSource {
    fn enabled_dialogs(&mut self, pid: u32) -> Result<Vec<DialogInfo>>;
    fn click(&mut self, dialog: &DialogInfo, button: &str) -> Result<()>;
    fn close(&mut self, dialog: &DialogInfo) -> Result<()>;
}

/// Source for hosts without a window system to inspect.
#[derive(Debug, Default)]
pub struct NoDialogs;

impl DialogSource for NoDialogs {
    fn enabled_dialogs(&mut self, _pid: u32) -> Result<Vec<DialogInfo>> {
        Ok(Vec::new())
    }

    fn click(&mut self, dialog: &DialogInfo, button: &str) -> Result<()> {
        anyhow::bail!("cannot click '{button}' on '{}': no window system", dialog.title)
    }

    fn close(&mut self, dialog: &DialogInfo) -> Result<()> {
        anyhow::bail!("cannot close '{}': no window system", dialog.title)
    }
}

pub trait DialogDismisser {
    /// Best effort; the caller logs errors and carries on.
    fn dismiss_blocking_dialogs(&mut self, pid: u32) -> Result<()>;
}

/// Dismisser that never does anything.
#[derive(Debug, Default)]
pub struct DisabledDismisser;

impl DialogDismisser for DisabledDismisser {
    fn dismiss_blocking_dialogs(&mut self, _pid: u32) -> Result<()> {
        Ok(())
    }
}

pub struct PolicyDismisser<S: DialogSource> {
    policy: DialogPolicy,
    source: S,
    prefix: String,
    reported: HashSet<(u32, String)>,
}

impl<S: DialogSource> PolicyDismisser<S> {
    pub fn new(policy: DialogPolicy, source: S) -> Self {
        Self {
            policy,
            source,
            prefix: String::new(),
            reported: HashSet::new(),
        }
    }

    /// Prefix for every line this dismisser logs (harness mode).
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn click(&mut self, dialog: &DialogInfo, label: &str) -> Result<()> {
        let target = dialog
            .buttons
            .iter()
            .filter(|b| button_text_matches(b, label))
            .collect::<Vec<_>>();
        match target.as_slice() {
            [only] => {
                info!("{}sending button click to '{}' on '{}'", self.prefix, only, dialog.title);
                let only = (*only).clone();
                self.source.click(dialog, &only)
            }
            _ => {
                warn!(
                    "{}could not find a suitable button to click for '{}' dialog box; buttons: {:?}",
                    self.prefix, dialog.title, dialog.buttons
                );
                Ok(())
            }
        }
    }

    /// One dialog failing must not stop the others from being handled.
    fn log_failure(&self, dialog: &DialogInfo, outcome: Result<()>) {
        if let Err(err) = outcome {
            warn!("{}failed to dismiss '{}': {err:#}", self.prefix, dialog.title);
        }
    }

    fn fallback(&mut self, dialog: &DialogInfo) -> Result<()> {
        warn!(
            "{}dialog box detected: title='{}' buttons={:?} text={:?}",
            self.prefix, dialog.title, dialog.buttons, dialog.static_text
        );
        match self.policy.fallback_target(&dialog.buttons) {
            Some(label) => {
                info!("{}sending button click to '{}'", self.prefix, label);
                let label = label.to_string();
                self.source.click(dialog, &label)
            }
            None => {
                warn!("{}could not find a suitable button to click", self.prefix);
                Ok(())
            }
        }
    }
}

impl<S: DialogSource> DialogDismisser for PolicyDismisser<S> {
    fn dismiss_blocking_dialogs(&mut self, pid: u32) -> Result<()> {
        let dialogs = self.source.enabled_dialogs(pid)?;
        for dialog in dialogs {
            match self.policy.classify(&dialog) {
                DialogAction::Ignore => {}
                DialogAction::ReportOnce => {
                    if self.reported.insert((pid, dialog.title.clone())) {
                        warn!(
                            "{}'{}' window detected; processing has halted. text={:?}",
                            self.prefix, dialog.title, dialog.static_text
                        );
                    }
                }
                DialogAction::Click(label) => {
                    info!("{}'{}' dialog box detected", self.prefix, dialog.title);
                    let clicked = self.click(&dialog, &label);
                    self.log_failure(&dialog, clicked);
                }
                DialogAction::Close => {
                    info!("{}'{}' dialog box detected; sending close request", self.prefix, dialog.title);
                    let closed = self.source.close(&dialog);
                    self.log_failure(&dialog, closed);
                }
                DialogAction::Fallback => {
                    let handled = self.fallback(&dialog);
                    self.log_failure(&dialog, handled);
                }
            }
        }
        Ok(())
    }
}
