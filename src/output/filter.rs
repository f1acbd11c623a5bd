use super::StreamKind;
use crate::config::WorkerConfig;
use anyhow::{Context, Result};
use regex::Regex;

/// Decides which worker lines reach the sink and cleans them up on the way.
#[derive(Debug, Clone)]
pub struct LineFilter {
    show_stdout: bool,
    show_stderr: bool,
    ignore_stderr: Vec<Regex>,
}

impl LineFilter {
    pub fn new(cfg: &WorkerConfig) -> Result<Self> {
        let ignore_stderr = cfg
            .ignore_stderr_patterns
            .iter()
            .map(|p| Regex::new(p).with_context(|| format!("ignore_stderr_patterns: {p}")))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            show_stdout: cfg.show_stdout,
            show_stderr: cfg.show_error_messages,
            ignore_stderr,
        })
    }

    pub fn passthrough() -> Self {
        Self {
            show_stdout: true,
            show_stderr: true,
            ignore_stderr: Vec::new(),
        }
    }

    pub fn accept(&self, stream: StreamKind, line: &str) -> Option<String> {
        let keep = match stream {
            StreamKind::Channel => true,
            StreamKind::Stdout => self.show_stdout,
            StreamKind::Stderr => {
                self.show_stderr && !self.ignore_stderr.iter().any(|r| r.is_match(line))
            }
        };
        keep.then(|| sanitize_control_chars(line))
    }
}

/// Strips C0/C1 control characters except tab.
pub fn sanitize_control_chars(s: &str) -> String {
    s.chars()
        .filter(|&ch| ch == '\t' || !ch.is_control())
        .collect()
}
