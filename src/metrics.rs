use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Reports kept for inspection; older ones only survive in the totals.
pub const RECENT_REPORTS: usize = 64;

/// Outcome of handling one inbound event.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub command: String,
    pub duration: Duration,
    /// A collaborator or the store failed and the handler fell back.
    pub degraded: bool,
    pub replied: bool,
}

#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub handled: usize,
    pub degraded: usize,
    /// Events that produced no reply (unknown commands, empty questions).
    pub silent: usize,
    pub by_command: BTreeMap<String, usize>,
    pub mean_duration_ms: f64,
}

#[derive(Default)]
struct Totals {
    handled: usize,
    degraded: usize,
    silent: usize,
    by_command: BTreeMap<String, usize>,
    total_duration: Duration,
    recent: VecDeque<DispatchReport>,
}

impl Totals {
    fn record(&mut self, report: &DispatchReport) {
        self.handled += 1;
        if report.degraded {
            self.degraded += 1;
        }
        if !report.replied {
            self.silent += 1;
        }
        *self.by_command.entry(report.command.clone()).or_insert(0) += 1;
        self.total_duration += report.duration;

        if self.recent.len() == RECENT_REPORTS {
            self.recent.pop_front();
        }
        self.recent.push_back(report.clone());
    }
}

/// Running dispatch counters. Memory stays bounded however long the bot runs.
#[derive(Default, Clone)]
pub struct MetricsTracker {
    totals: Arc<Mutex<Totals>>,
}

impl MetricsTracker {
    pub fn start(&self, command: impl Into<String>) -> DispatchGuard {
        DispatchGuard {
            start: Instant::now(),
            command: command.into(),
            degraded: false,
            metrics: self.clone(),
        }
    }

    /// The most recent reports, oldest first.
    pub fn reports(&self) -> Vec<DispatchReport> {
        self.totals
            .lock()
            .map(|totals| totals.recent.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let Ok(totals) = self.totals.lock() else {
            return MetricsSnapshot::default();
        };
        if totals.handled == 0 {
            return MetricsSnapshot::default();
        }
        MetricsSnapshot {
            handled: totals.handled,
            degraded: totals.degraded,
            silent: totals.silent,
            by_command: totals.by_command.clone(),
            mean_duration_ms: totals.total_duration.as_secs_f64() * 1000.0
                / totals.handled as f64,
        }
    }
}

pub struct DispatchGuard {
    start: Instant,
    command: String,
    degraded: bool,
    metrics: MetricsTracker,
}

impl DispatchGuard {
    pub fn mark_degraded(&mut self) {
        self.degraded = true;
    }

    pub fn finish(self, replied: bool) -> DispatchReport {
        let report = DispatchReport {
            command: self.command,
            duration: self.start.elapsed(),
            degraded: self.degraded,
            replied,
        };
        if let Ok(mut totals) = self.metrics.totals.lock() {
            totals.record(&report);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_counts_per_command() {
        let tracker = MetricsTracker::default();
        tracker.start("echo").finish(true);
        let mut guard = tracker.start("fw");
        guard.mark_degraded();
        let report = guard.finish(true);
        assert!(report.degraded);
        tracker.start("okayayuss").finish(false);
        tracker.start("echo").finish(true);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.handled, 4);
        assert_eq!(snapshot.degraded, 1);
        assert_eq!(snapshot.silent, 1);
        assert_eq!(snapshot.by_command.get("echo"), Some(&2));
        assert_eq!(snapshot.by_command.get("fw"), Some(&1));
    }

    #[test]
    fn empty_snapshot_is_default() {
        assert_eq!(MetricsTracker::default().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn kept_reports_are_capped_while_totals_keep_counting() {
        let tracker = MetricsTracker::default();
        for i in 0..(RECENT_REPORTS * 10) {
            tracker.start(format!("cmd{}", i % 2)).finish(true);
        }

        let reports = tracker.reports();
        assert_eq!(reports.len(), RECENT_REPORTS);
        assert_eq!(tracker.snapshot().handled, RECENT_REPORTS * 10);
        assert_eq!(tracker.snapshot().by_command.len(), 2);
    }
}
