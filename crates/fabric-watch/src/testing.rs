//! Test doubles for the probe and report seams
//!
//! Used by this crate's tests and by the agent's wiring tests; nothing here
//! touches the network.

use crate::reporter::{ReportError, StatusReport, StatusReporter};
use async_trait::async_trait;
use fabric_core_liveness::{CheckSpec, ObjectCategory, ProbeResult};
use fabric_probe::Prober;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Prober answering from a script keyed by entity id
///
/// Entities without a script entry get the default answer. Every probed id
/// is recorded in call order.
#[derive(Debug, Default)]
pub struct ScriptedProber {
    default_reachable: bool,
    script: Mutex<HashMap<String, bool>>,
    probed: Mutex<Vec<String>>,
}

impl ScriptedProber {
    /// Prober answering `default_reachable` for every unscripted entity
    pub fn new(default_reachable: bool) -> Self {
        Self {
            default_reachable,
            ..Default::default()
        }
    }

    /// Script the outcome for one entity until changed again
    pub fn set(&self, entity_id: &str, reachable: bool) {
        if let Ok(mut script) = self.script.lock() {
            script.insert(entity_id.to_string(), reachable);
        }
    }

    /// Ids probed since the last call, in call order
    pub fn take_probed(&self) -> Vec<String> {
        self.probed
            .lock()
            .map(|mut probed| std::mem::take(&mut *probed))
            .unwrap_or_default()
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, spec: &CheckSpec) -> ProbeResult {
        if let Ok(mut probed) = self.probed.lock() {
            probed.push(spec.entity_id.clone());
        }
        let reachable = self
            .script
            .lock()
            .ok()
            .and_then(|script| script.get(&spec.entity_id).copied())
            .unwrap_or(self.default_reachable);

        if reachable {
            ProbeResult::reachable(&spec.entity_id, 0.1)
        } else {
            ProbeResult::unreachable(&spec.entity_id)
        }
    }
}

/// One report as the controller would have received it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedReport {
    pub category: ObjectCategory,
    pub resource_id: String,
    pub report: StatusReport,
}

/// Reporter that records every call
///
/// With `set_failing(true)` calls are recorded and then rejected; with
/// `set_panicking(true)` the call panics, simulating a fault inside a tick.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<RecordedReport>>,
    failing: AtomicBool,
    panicking: AtomicBool,
}

impl RecordingReporter {
    /// Reporter that accepts every report
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following report fail after it is recorded
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make every following report panic
    pub fn set_panicking(&self, panicking: bool) {
        self.panicking.store(panicking, Ordering::SeqCst);
    }

    /// Reports received since the last call
    pub fn take(&self) -> Vec<RecordedReport> {
        self.reports
            .lock()
            .map(|mut reports| std::mem::take(&mut *reports))
            .unwrap_or_default()
    }
}

#[async_trait]
impl StatusReporter for RecordingReporter {
    async fn report(
        &self,
        category: ObjectCategory,
        resource_id: &str,
        report: &StatusReport,
    ) -> Result<(), ReportError> {
        if self.panicking.load(Ordering::SeqCst) {
            panic!("reporter fault while reporting {}", resource_id);
        }
        if let Ok(mut reports) = self.reports.lock() {
            reports.push(RecordedReport {
                category,
                resource_id: resource_id.to_string(),
                report: report.clone(),
            });
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ReportError::Status(503));
        }
        Ok(())
    }
}
