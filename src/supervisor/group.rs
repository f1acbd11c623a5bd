use super::Supervisor;
use crate::{
    config::{SessionReuse, ZeroProgressPolicy},
    error::Result,
    harness::HarnessEvent,
    output::OutputSink,
    plan::UnitGroup,
    report::GroupReport,
    units::WorkUnitList,
};
use tracing::{info, warn};

/// Units handed to the next worker of a group.
pub fn next_slice(pending: &WorkUnitList, reuse: SessionReuse) -> WorkUnitList {
    match reuse {
        SessionReuse::SameSession => pending.clone(),
        SessionReuse::FreshPerUnit => pending.clone().take_front(1),
    }
}

impl<S: OutputSink> Supervisor<S> {
    /// Processes one capability group, relaunching from the checkpoint
    /// after every worker exit until nothing is pending.
    pub fn run_group(&mut self, group: &UnitGroup) -> Result<GroupReport> {
        let capability = group.capability.as_str();
        let mut pending = group.units.clone();
        let mut report = GroupReport::new(capability, pending.len());
        let mut zero_progress_attempts = 0u32;

        info!(capability, units = pending.len(), "processing group");
        while !pending.is_empty() {
            let slice = next_slice(&pending, self.settings.session_reuse);
            let session = self.run_session(capability, &slice)?;
            let next_index = session.next_index;
            report.record_session(session);

            if let Some(next) = next_index {
                zero_progress_attempts = 0;
                pending = pending.from_index(next);
                if !pending.is_empty() {
                    info!(capability, next_index = next, "resuming group with a new worker");
                    if let Some(h) = &self.harness {
                        h.record(HarnessEvent::Resuming {
                            capability: capability.to_string(),
                            next_index: next,
                        });
                    }
                }
                continue;
            }

            warn!(capability, "worker did not initialize properly");
            match self.settings.zero_progress {
                ZeroProgressPolicy::Abandon => {
                    report.unresolved.extend(pending.indices());
                    break;
                }
                ZeroProgressPolicy::SkipUnit => {
                    let skipped = pending.take_front(1);
                    warn!(capability, units = ?skipped.indices(), "skipping unit after zero-progress worker");
                    report.unresolved.extend(skipped.indices());
                }
                ZeroProgressPolicy::Retry { max_attempts } => {
                    zero_progress_attempts += 1;
                    if zero_progress_attempts > max_attempts {
                        warn!(capability, attempts = max_attempts, "retries exhausted; abandoning group");
                        report.unresolved.extend(pending.indices());
                        break;
                    }
                    info!(
                        capability,
                        attempt = zero_progress_attempts,
                        "retrying group with the same units"
                    );
                }
            }
        }

        report.finish();
        if report.unresolved.is_empty() {
            info!(capability, completed = report.completed.len(), "group finished");
        } else {
            warn!(
                capability,
                unresolved = report.unresolved.len(),
                "group finished with unresolved units"
            );
        }
        if let Some(h) = &self.harness {
            h.record(HarnessEvent::GroupFinished {
                capability: capability.to_string(),
                unresolved: report.unresolved.len(),
            });
        }
        Ok(report)
    }
}
