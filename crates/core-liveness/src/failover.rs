//! Failover Selector: priority election among candidate endpoints
//!
//! ```text
//!          ┌──────────────────────┐  reachable, lowest priority
//!          │  No selection        │ ───────────────────────────┐
//!          │  (probe everyone)    │                            │
//!          └──────────▲───────────┘                            ▼
//!                     │                           ┌──────────────────────┐
//!   DOWN (3 strikes), │                           │  Selected            │
//!   hold cap reached, └───────────────────────────│  (probe selected)    │
//!   membership/priority change                    └──────────────────────┘
//! ```
//!
//! Priority is the 1-based position in the source list; 1 is preferred.

use crate::debounce::Debounce;
use crate::types::{ProbeResult, Status, HOLD_TICKS_CAP};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// One candidate endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    address: String,
    priority: u32,
    debounce: Debounce,
}

impl Candidate {
    /// Candidate address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Election priority, lower wins
    pub fn priority(&self) -> u32 {
        self.priority
    }

    /// Debounced status
    pub fn status(&self) -> Status {
        self.debounce.status()
    }

    /// Consecutive failed probes
    pub fn down_count(&self) -> u32 {
        self.debounce.down_count()
    }
}

/// What one tick did to the selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionOutcome {
    /// A new candidate was elected
    Elected(String),
    /// The current selection stays
    Retained(String),
    /// The selected candidate went DOWN; re-election next tick
    Lost(String),
    /// The hold time ran out; re-election next tick
    Expired(String),
    /// Election found no reachable candidate
    NoneReachable,
}

/// Selection state machine over a priority-ordered candidate list
#[derive(Debug, Default)]
pub struct FailoverSelector {
    candidates: Vec<Candidate>,
    selected: Option<String>,
    hold_ticks: u32,
}

impl FailoverSelector {
    /// Selector with no candidates
    pub fn new() -> Self {
        Self::default()
    }

    /// Align the candidate list with the latest source list
    ///
    /// Duplicate addresses keep their first position. Any membership or
    /// priority change clears the selection. Debounce state survives for
    /// candidates that remain. Returns whether anything changed.
    pub fn reconcile(&mut self, addresses: &[String]) -> bool {
        let mut ordered: Vec<&String> = Vec::with_capacity(addresses.len());
        for address in addresses {
            if !ordered.contains(&address) {
                ordered.push(address);
            }
        }

        let unchanged = ordered.len() == self.candidates.len()
            && ordered
                .iter()
                .zip(&self.candidates)
                .all(|(address, candidate)| **address == candidate.address);
        if unchanged {
            return false;
        }

        let mut previous: HashMap<String, Debounce> = self
            .candidates
            .drain(..)
            .map(|candidate| (candidate.address, candidate.debounce))
            .collect();

        self.candidates = ordered
            .into_iter()
            .enumerate()
            .map(|(index, address)| Candidate {
                address: address.clone(),
                priority: index as u32 + 1,
                debounce: previous.remove(address).unwrap_or_default(),
            })
            .collect();

        if let Some(selected) = self.selected.take() {
            info!(
                "Candidate set changed ({} candidates), dropping selection {}",
                self.candidates.len(),
                selected
            );
        }
        self.hold_ticks = 0;
        true
    }

    /// Addresses to probe this tick: everyone without a selection, else only the selected one
    pub fn probe_targets(&self) -> Vec<String> {
        match &self.selected {
            Some(selected) => vec![selected.clone()],
            None => self
                .candidates
                .iter()
                .map(|candidate| candidate.address.clone())
                .collect(),
        }
    }

    /// Feed this tick's probe results and advance the selection
    pub fn apply(&mut self, results: &[ProbeResult]) -> SelectionOutcome {
        let mut reachable_now: Vec<&str> = Vec::new();
        for result in results {
            let Some(candidate) = self
                .candidates
                .iter_mut()
                .find(|candidate| candidate.address == result.entity_id)
            else {
                continue;
            };
            if let Some(status) = candidate.debounce.observe(result.reachable) {
                debug!("Candidate {} is now {}", candidate.address, status);
            }
            if result.reachable {
                reachable_now.push(&result.entity_id);
            }
        }

        match self.selected.clone() {
            Some(selected) => self.hold(selected, &reachable_now),
            None => self.elect(&reachable_now),
        }
    }

    fn hold(&mut self, selected: String, reachable_now: &[&str]) -> SelectionOutcome {
        let status = self
            .candidates
            .iter()
            .find(|candidate| candidate.address == selected)
            .map(Candidate::status)
            .unwrap_or(Status::Down);

        if status == Status::Down {
            warn!("Selected candidate {} is DOWN, re-electing", selected);
            self.selected = None;
            self.hold_ticks = 0;
            return SelectionOutcome::Lost(selected);
        }

        if reachable_now.contains(&selected.as_str()) {
            self.hold_ticks += 1;
            if self.hold_ticks >= HOLD_TICKS_CAP {
                info!(
                    "Selected candidate {} held for {} ticks, forcing re-election",
                    selected, self.hold_ticks
                );
                self.selected = None;
                self.hold_ticks = 0;
                return SelectionOutcome::Expired(selected);
            }
        }
        SelectionOutcome::Retained(selected)
    }

    fn elect(&mut self, reachable_now: &[&str]) -> SelectionOutcome {
        // Candidates are kept in priority order
        let winner = self
            .candidates
            .iter()
            .find(|candidate| {
                candidate.status() == Status::Up && reachable_now.contains(&candidate.address())
            })
            .map(|candidate| candidate.address.clone());

        match winner {
            Some(address) => {
                self.selected = Some(address.clone());
                self.hold_ticks = 0;
                SelectionOutcome::Elected(address)
            }
            None => SelectionOutcome::NoneReachable,
        }
    }

    /// Currently selected address
    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Ticks since the last election
    pub fn hold_ticks(&self) -> u32 {
        self.hold_ticks
    }

    /// Candidates in priority order
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DOWN_THRESHOLD;

    fn addresses(list: &[&str]) -> Vec<String> {
        list.iter().map(|a| a.to_string()).collect()
    }

    fn results(selector: &FailoverSelector, up: &[&str]) -> Vec<ProbeResult> {
        selector
            .probe_targets()
            .into_iter()
            .map(|address| {
                if up.contains(&address.as_str()) {
                    ProbeResult::reachable(address, 1.0)
                } else {
                    ProbeResult::unreachable(address)
                }
            })
            .collect()
    }

    fn tick(selector: &mut FailoverSelector, up: &[&str]) -> SelectionOutcome {
        let results = results(selector, up);
        selector.apply(&results)
    }

    #[test]
    fn test_prefers_lowest_priority() {
        let mut selector = FailoverSelector::new();
        selector.reconcile(&addresses(&["10.0.0.1", "10.0.0.2"]));

        assert_eq!(
            tick(&mut selector, &["10.0.0.1", "10.0.0.2"]),
            SelectionOutcome::Elected("10.0.0.1".into())
        );
        assert_eq!(selector.probe_targets(), addresses(&["10.0.0.1"]));
    }

    #[test]
    fn test_skips_unreachable_preferred() {
        let mut selector = FailoverSelector::new();
        selector.reconcile(&addresses(&["c1", "c2"]));

        assert_eq!(
            tick(&mut selector, &["c2"]),
            SelectionOutcome::Elected("c2".into())
        );
    }

    #[test]
    fn test_never_elects_down_candidate() {
        let mut selector = FailoverSelector::new();
        selector.reconcile(&addresses(&["c1"]));
        for _ in 0..DOWN_THRESHOLD {
            assert_eq!(tick(&mut selector, &[]), SelectionOutcome::NoneReachable);
        }
        assert_eq!(selector.candidates()[0].status(), Status::Down);
        assert_eq!(selector.selected(), None);
    }

    #[test]
    fn test_lost_after_threshold_failures() {
        let mut selector = FailoverSelector::new();
        selector.reconcile(&addresses(&["c1", "c2"]));
        tick(&mut selector, &["c1", "c2"]);

        for _ in 0..DOWN_THRESHOLD - 1 {
            assert_eq!(tick(&mut selector, &[]), SelectionOutcome::Retained("c1".into()));
        }
        assert_eq!(tick(&mut selector, &[]), SelectionOutcome::Lost("c1".into()));
        assert_eq!(selector.selected(), None);

        // Next tick probes everyone again
        assert_eq!(selector.probe_targets(), addresses(&["c1", "c2"]));
        assert_eq!(
            tick(&mut selector, &["c2"]),
            SelectionOutcome::Elected("c2".into())
        );
    }

    #[test]
    fn test_unreachable_tick_does_not_extend_hold() {
        let mut selector = FailoverSelector::new();
        selector.reconcile(&addresses(&["c1"]));
        tick(&mut selector, &["c1"]);

        tick(&mut selector, &["c1"]);
        tick(&mut selector, &[]);
        assert_eq!(selector.hold_ticks(), 1);
    }

    #[test]
    fn test_hold_cap_forces_reelection() {
        let mut selector = FailoverSelector::new();
        selector.reconcile(&addresses(&["c1", "c2"]));
        tick(&mut selector, &["c2"]);

        for _ in 0..HOLD_TICKS_CAP - 1 {
            assert_eq!(tick(&mut selector, &["c2"]), SelectionOutcome::Retained("c2".into()));
        }
        assert_eq!(tick(&mut selector, &["c2"]), SelectionOutcome::Expired("c2".into()));

        // The preferred candidate recovered meanwhile and wins the re-election
        assert_eq!(
            tick(&mut selector, &["c1", "c2"]),
            SelectionOutcome::Elected("c1".into())
        );
    }

    #[test]
    fn test_membership_change_clears_selection() {
        let mut selector = FailoverSelector::new();
        selector.reconcile(&addresses(&["c1", "c2"]));
        tick(&mut selector, &["c2"]);

        assert!(!selector.reconcile(&addresses(&["c1", "c2"])));
        assert_eq!(selector.selected(), Some("c2"));

        assert!(selector.reconcile(&addresses(&["c1", "c2", "c3"])));
        assert_eq!(selector.selected(), None);
        assert_eq!(selector.hold_ticks(), 0);
    }

    #[test]
    fn test_priority_change_clears_selection_keeps_debounce() {
        let mut selector = FailoverSelector::new();
        selector.reconcile(&addresses(&["c1", "c2"]));
        tick(&mut selector, &["c1", "c2"]);

        assert!(selector.reconcile(&addresses(&["c2", "c1"])));
        assert_eq!(selector.selected(), None);
        assert_eq!(selector.candidates()[0].address(), "c2");
        assert_eq!(selector.candidates()[0].priority(), 1);
        assert_eq!(selector.candidates()[1].status(), Status::Up);
    }

    #[test]
    fn test_duplicate_addresses_keep_first_position() {
        let mut selector = FailoverSelector::new();
        selector.reconcile(&addresses(&["c1", "c2", "c1"]));
        assert_eq!(selector.candidates().len(), 2);
        assert_eq!(selector.candidates()[1].priority(), 2);
    }
}
