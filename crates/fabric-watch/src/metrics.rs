//! Tick Metrics
//!
//! Per-tick counters for the health loop, logged as one summary line.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Statistics from a single health tick
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickStats {
    /// Entities probed this tick
    pub probed: usize,

    /// Tracked entities whose debounced status is UP after the tick
    pub up: usize,

    /// Tracked entities whose debounced status is DOWN after the tick
    pub down: usize,

    /// Tracked entities still without a confirmed status after the tick
    pub unknown: usize,

    /// Confirmed transitions this tick
    pub changed: usize,

    /// Entities aged out of the catalog this tick
    pub aged: usize,

    /// Reports acknowledged by the controller
    pub reported: usize,

    /// Reports that will be retried next tick
    pub report_failures: usize,

    /// Catalog records that produced no entity
    pub skipped: usize,

    /// Probe results not collected before the channel closed
    pub missing: usize,

    /// Whether the snapshot was written
    pub persisted: bool,

    pub duration: Option<Duration>,
}

impl TickStats {
    /// Empty stats
    pub fn new() -> Self {
        Self::default()
    }

    /// One-line summary for the tick log
    pub fn summary(&self) -> String {
        format!(
            "Tick: {} probed | {} up | {} down | {} unknown | {} changed | {} aged | Reports: {} ok, {} failed",
            self.probed,
            self.up,
            self.down,
            self.unknown,
            self.changed,
            self.aged,
            self.reported,
            self.report_failures
        )
    }
}

/// Accumulates [`TickStats`] while a tick runs
#[derive(Debug, Clone)]
pub struct TickStatsBuilder {
    stats: TickStats,
    start_time: Instant,
}

impl TickStatsBuilder {
    /// Start timing a tick
    pub fn new() -> Self {
        Self {
            stats: TickStats::new(),
            start_time: Instant::now(),
        }
    }

    /// Count probe results collected
    pub fn record_probed(&mut self, count: usize) {
        self.stats.probed += count;
    }

    /// Table-wide status counts, taken once the tick has settled
    pub fn record_status_counts(&mut self, up: usize, down: usize, unknown: usize) {
        self.stats.up = up;
        self.stats.down = down;
        self.stats.unknown = unknown;
    }

    /// Count one confirmed transition
    pub fn record_change(&mut self) {
        self.stats.changed += 1;
    }

    /// Count entities aged out
    pub fn record_aged(&mut self, count: usize) {
        self.stats.aged += count;
    }

    /// Count one acknowledged report
    pub fn record_report(&mut self) {
        self.stats.reported += 1;
    }

    /// Count one report left pending
    pub fn record_report_failure(&mut self) {
        self.stats.report_failures += 1;
    }

    /// Count catalog records that produced no entity
    pub fn record_skipped(&mut self, count: usize) {
        self.stats.skipped += count;
    }

    /// Count probe results never collected
    pub fn record_missing(&mut self, count: usize) {
        self.stats.missing += count;
    }

    /// Note that the snapshot was written
    pub fn record_persisted(&mut self) {
        self.stats.persisted = true;
    }

    /// Stop the clock and return the stats
    pub fn finish(mut self) -> TickStats {
        self.stats.duration = Some(self.start_time.elapsed());
        self.stats
    }

    /// Stats so far
    pub fn stats(&self) -> &TickStats {
        &self.stats
    }
}

impl Default for TickStatsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
