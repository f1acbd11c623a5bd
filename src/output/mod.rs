pub mod channel;
pub mod drain;
pub mod filter;

use serde::{Deserialize, Serialize};
use tracing::info;

pub use channel::OutputChannel;
pub use drain::LineDrain;
pub use filter::LineFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// The dedicated script output pipe.
    Channel,
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    pub stream: StreamKind,
    pub pid: u32,
    pub text: String,
}

/// Where re-emitted worker output goes.
pub trait OutputSink {
    fn emit(&mut self, line: &OutputLine);
}

/// Logs worker lines through `tracing` under the `worker` target.
#[derive(Debug, Default)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn emit(&mut self, line: &OutputLine) {
        match line.stream {
            StreamKind::Channel => info!(target: "worker", pid = line.pid, "- {}", line.text),
            StreamKind::Stdout => {
                info!(target: "worker", pid = line.pid, "- [ WORKER MESSAGE ] : {}", line.text)
            }
            StreamKind::Stderr => {
                info!(target: "worker", pid = line.pid, "- [ WORKER ERROR MESSAGE ] : {}", line.text)
            }
        }
    }
}

impl OutputSink for Vec<OutputLine> {
    fn emit(&mut self, line: &OutputLine) {
        self.push(line.clone());
    }
}
