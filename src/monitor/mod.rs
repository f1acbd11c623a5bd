//! Generic watchdog loop for a running process.

pub mod responsiveness;

use std::time::{Duration, Instant};

pub use responsiveness::{
    default_probe, probe_name, ProcStateProbe, ResponsivenessProbe, UnknownProbe,
};

pub trait MonitoredProcess {
    fn id(&self) -> u32;
    fn has_exited(&mut self) -> bool;
    /// Query failures must come back as `true`.
    fn is_responding(&mut self) -> bool;
}

pub trait UnresponsiveObserver {
    fn on_begin_unresponsive(&mut self);
    fn on_end_unresponsive(&mut self, duration: Duration);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub unresponsive_threshold: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Episode {
    Began,
    Ended(Duration),
}

/// Edge detector for unresponsive episodes. `Began` fires at most once per
/// episode, once the threshold is crossed; `Ended` follows only a `Began`.
#[derive(Debug, Clone)]
pub struct ResponsivenessTracker {
    threshold: Duration,
    responding: bool,
    unresponsive_since: Option<Instant>,
    notified: bool,
}

impl ResponsivenessTracker {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            responding: true,
            unresponsive_since: None,
            notified: false,
        }
    }

    pub fn in_notified_episode(&self) -> bool {
        self.notified
    }

    pub fn observe(&mut self, responding: bool, now: Instant) -> Option<Episode> {
        let was_responding = self.responding;
        self.responding = responding;

        if !responding {
            let since = *self.unresponsive_since.get_or_insert(now);
            if was_responding {
                self.notified = false;
            }
            if !self.notified && now.saturating_duration_since(since) >= self.threshold {
                self.notified = true;
                return Some(Episode::Began);
            }
            return None;
        }

        let since = self.unresponsive_since.take();
        if !was_responding && self.notified {
            self.notified = false;
            let started = since.unwrap_or(now);
            return Some(Episode::Ended(now.saturating_duration_since(started)));
        }
        None
    }

    /// Closes an open episode when the process is gone.
    pub fn finish(&mut self, now: Instant) -> Option<Episode> {
        if !self.notified {
            return None;
        }
        self.notified = false;
        self.responding = true;
        let started = self.unresponsive_since.take().unwrap_or(now);
        Some(Episode::Ended(now.saturating_duration_since(started)))
    }
}

/// Polls `process` until it exits, calling `tick` once per iteration and
/// reporting unresponsive episodes to `observer`.
pub fn monitor_process<P, F, O>(
    process: &mut P,
    settings: &MonitorSettings,
    mut tick: F,
    observer: &mut O,
) where
    P: MonitoredProcess,
    F: FnMut(&mut P),
    O: UnresponsiveObserver + ?Sized,
{
    let mut tracker = ResponsivenessTracker::new(settings.unresponsive_threshold);

    while !process.has_exited() {
        let responding = process.is_responding();
        match tracker.observe(responding, Instant::now()) {
            Some(Episode::Began) => observer.on_begin_unresponsive(),
            Some(Episode::Ended(d)) => observer.on_end_unresponsive(d),
            None => {}
        }

        tick(process);

        if process.has_exited() {
            break;
        }
        std::thread::sleep(settings.poll_interval);
    }

    if let Some(Episode::Ended(d)) = tracker.finish(Instant::now()) {
        observer.on_end_unresponsive(d);
    }
}
