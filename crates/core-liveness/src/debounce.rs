//! Debounce: asymmetric hysteresis over raw probe results
//!
//! A single reachable probe clears to UP immediately; only
//! `DOWN_THRESHOLD` consecutive unreachable probes declare DOWN. A single
//! flaky probe can therefore never flip status.

use crate::types::{Status, DOWN_THRESHOLD};
use serde::{Deserialize, Serialize};

/// Down-counter plus debounced status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Debounce {
    status: Status,
    down_count: u32,
}

impl Debounce {
    /// Start in UNKNOWN with a clean counter
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from a previously persisted state
    pub fn restored(status: Status, down_count: u32) -> Self {
        Self { status, down_count }
    }

    /// Debounced status
    pub fn status(&self) -> Status {
        self.status
    }

    /// Consecutive failures since the last success
    pub fn down_count(&self) -> u32 {
        self.down_count
    }

    /// Feed one probe outcome
    ///
    /// Returns the new status when the outcome confirmed a transition.
    pub fn observe(&mut self, reachable: bool) -> Option<Status> {
        if reachable {
            self.down_count = 0;
            if self.status != Status::Up {
                self.status = Status::Up;
                return Some(Status::Up);
            }
            return None;
        }

        self.down_count = self.down_count.saturating_add(1);
        if self.down_count >= DOWN_THRESHOLD && self.status != Status::Down {
            self.status = Status::Down;
            return Some(Status::Down);
        }
        None
    }

    /// Force DOWN regardless of the counter, returning the previous status
    pub fn force_down(&mut self) -> Status {
        let previous = self.status;
        self.status = Status::Down;
        self.down_count = self.down_count.max(DOWN_THRESHOLD);
        previous
    }
}
