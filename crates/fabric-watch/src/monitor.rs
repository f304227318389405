//! Health Monitor: the resource liveness loop
//!
//! Owns the [`StatusTable`] and drives one tick at a time:
//!
//! 1. mark every tracked entity aged and rebuild the catalog
//! 2. adopt catalog entries, sweep what is left aged
//! 3. probe every tracked entity concurrently, wait for all results
//! 4. run hysteresis on the results
//! 5. push pending transitions to the controller
//! 6. rewrite the snapshot if anything changed
//!
//! Nothing a tick does is fatal. Report and store failures are logged and
//! retried next tick; a panic inside a tick is caught and the loop goes on.

use crate::catalog::CatalogBuilder;
use crate::metrics::{TickStats, TickStatsBuilder};
use crate::policy::WatchPolicy;
use crate::reporter::{StatusReport, StatusReporter};
use crate::scheduler::fan_out;
use crate::snapshot::SnapshotStore;
use chrono::Utc;
use fabric_core_liveness::{Status, StatusTable};
use fabric_probe::Prober;
use futures::future::join_all;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Resource health loop for one node
pub struct HealthMonitor {
    catalog: CatalogBuilder,
    prober: Arc<dyn Prober>,
    reporter: Arc<dyn StatusReporter>,
    snapshot: SnapshotStore,
    policy: WatchPolicy,
    table: StatusTable,
}

impl HealthMonitor {
    /// Monitor with an empty table; call [`run`](Self::run) to start it
    pub fn new(
        catalog: CatalogBuilder,
        prober: Arc<dyn Prober>,
        reporter: Arc<dyn StatusReporter>,
        snapshot: SnapshotStore,
        policy: WatchPolicy,
    ) -> Self {
        Self {
            catalog,
            prober,
            reporter,
            snapshot,
            policy,
            table: StatusTable::new(),
        }
    }

    /// Load the persisted snapshot and schedule re-announcement of every
    /// known status
    ///
    /// Only the first call has any effect. An unreadable snapshot is logged
    /// and the monitor starts empty.
    pub async fn restore(&mut self) -> usize {
        match self.snapshot.load().await {
            Ok(persisted) => self.table.restore(persisted),
            Err(e) => {
                warn!("Cannot load status snapshot {}: {}", self.snapshot.key(), e);
                self.table.disable_smoothing();
                0
            }
        }
    }

    /// Main loop - runs forever
    pub async fn run(mut self) {
        info!(
            "🩺 Health monitor active | Catalog: {} | Interval: {:?}",
            self.catalog.prefix(),
            self.policy.health_interval
        );

        self.restore().await;

        let mut interval = tokio::time::interval(self.policy.health_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            self.guarded_tick().await;
        }
    }

    /// One tick inside the panic boundary; `None` if the tick panicked
    pub async fn guarded_tick(&mut self) -> Option<TickStats> {
        match AssertUnwindSafe(self.run_tick()).catch_unwind().await {
            Ok(stats) => Some(stats),
            Err(panic) => {
                error!(
                    "Health tick panicked, continuing with the next tick: {}",
                    panic_message(panic.as_ref())
                );
                None
            }
        }
    }

    /// Execute a single tick
    ///
    /// Note: Public for integration testing
    pub async fn run_tick(&mut self) -> TickStats {
        let mut stats = TickStatsBuilder::new();

        self.table.begin_tick();
        let catalog = self.catalog.build().await;
        stats.record_skipped(catalog.skipped);
        let complete = catalog.failed_kinds.is_empty();

        for spec in catalog.specs {
            self.table.adopt(spec);
        }

        if complete {
            let aged = self.table.sweep(Utc::now());
            stats.record_aged(aged.len());
        } else {
            warn!(
                "Catalog incomplete ({} kinds unreadable), skipping eviction this tick",
                catalog.failed_kinds.len()
            );
        }

        let specs = self.table.specs();
        let expected = specs.len();
        let results = fan_out(self.prober.clone(), specs).await;
        stats.record_probed(results.len());
        stats.record_missing(expected - results.len());

        for result in &results {
            if let Some(status) = self.table.apply(result) {
                info!("{} is now {}", result.entity_id, status);
                stats.record_change();
            }
        }

        self.flush_reports(&mut stats).await;
        self.persist(&mut stats).await;

        let snapshot = self.table.snapshot();
        let count = |status: Status| snapshot.iter().filter(|s| s.status == status).count();
        stats.record_status_counts(
            count(Status::Up),
            count(Status::Down),
            count(Status::Unknown),
        );

        let stats = stats.finish();
        if stats.changed > 0 || stats.aged > 0 || stats.report_failures > 0 {
            info!("📊 {}", stats.summary());
        } else {
            debug!("{}", stats.summary());
        }
        stats
    }

    /// Push every unacknowledged transition, concurrently
    async fn flush_reports(&mut self, stats: &mut TickStatsBuilder) {
        let pending = self.table.pending_reports();
        if pending.is_empty() {
            return;
        }

        let reporter = &self.reporter;
        let outcomes = join_all(pending.iter().map(|pending| async move {
            let body = StatusReport::new(pending.spec.category, pending.status, pending.changed_at);
            reporter
                .report(pending.spec.category, pending.spec.resource_id(), &body)
                .await
        }))
        .await;

        for (pending, outcome) in pending.iter().zip(outcomes) {
            match outcome {
                Ok(()) => {
                    self.table.acknowledge(&pending.spec.entity_id, pending.status);
                    stats.record_report();
                }
                Err(e) => {
                    warn!(
                        "Report of {} {} failed, retrying next tick: {}",
                        pending.spec.entity_id, pending.status, e
                    );
                    stats.record_report_failure();
                }
            }
        }
    }

    /// Rewrite the snapshot if the table changed since the last good write
    ///
    /// The dirty flag is only cleared once `save` returns `Ok`, so a failed
    /// or panicking write is retried next tick.
    async fn persist(&mut self, stats: &mut TickStatsBuilder) {
        if !self.table.is_dirty() {
            return;
        }

        match self.snapshot.save(&self.table.snapshot()).await {
            Ok(()) => {
                self.table.clear_dirty();
                stats.record_persisted();
            }
            Err(e) => warn!("Cannot write status snapshot, retrying next tick: {}", e),
        }
    }

    /// Current status table
    pub fn table(&self) -> &StatusTable {
        &self.table
    }

    /// Tick policy in use
    pub fn policy(&self) -> &WatchPolicy {
        &self.policy
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::{RecordingReporter, ScriptedProber};

    struct Harness {
        store: Arc<MemoryStore>,
        prober: Arc<ScriptedProber>,
        reporter: Arc<RecordingReporter>,
        monitor: HealthMonitor,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let prober = Arc::new(ScriptedProber::new(true));
        let reporter = Arc::new(RecordingReporter::new());
        let monitor = HealthMonitor::new(
            CatalogBuilder::new(store.clone(), "fabric/n1"),
            prober.clone(),
            reporter.clone(),
            SnapshotStore::new(store.clone(), "status/n1"),
            WatchPolicy::default(),
        );
        Harness {
            store,
            prober,
            reporter,
            monitor,
        }
    }

    #[tokio::test]
    async fn test_new_entity_probed_in_first_tick() {
        let mut h = harness();
        h.store.insert("fabric/n1/ports/p1", r#"{"name": "eth1"}"#);

        let stats = h.monitor.run_tick().await;

        assert_eq!(h.prober.take_probed(), vec!["p1"]);
        assert_eq!(stats.probed, 1);
        assert_eq!(stats.changed, 1);
        assert_eq!(stats.reported, 1);
        assert!(stats.persisted);
        assert_eq!(h.monitor.table().get("p1").unwrap().status(), Status::Up);

        let reports = h.reporter.take();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].resource_id, "p1");
        assert_eq!(reports[0].report.status, "UP");
    }

    #[tokio::test]
    async fn test_quiet_tick_does_not_persist() {
        let mut h = harness();
        h.store.insert("fabric/n1/ports/p1", r#"{"name": "eth1"}"#);
        h.monitor.run_tick().await;

        let stats = h.monitor.run_tick().await;
        assert_eq!(stats.changed, 0);
        assert!(!stats.persisted);
        assert_eq!(stats.up, 1);
    }

    #[tokio::test]
    async fn test_unreadable_kind_does_not_evict() {
        use std::sync::atomic::{AtomicBool, Ordering};

        struct ListFails(MemoryStore, AtomicBool);

        #[async_trait::async_trait]
        impl crate::store::KvStore for ListFails {
            async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, crate::StoreError> {
                self.0.get(key).await
            }
            async fn list(
                &self,
                prefix: &str,
            ) -> Result<Vec<(String, Vec<u8>)>, crate::StoreError> {
                if self.1.load(Ordering::SeqCst) {
                    return Err(crate::StoreError::Unavailable("down".to_string()));
                }
                self.0.list(prefix).await
            }
            async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), crate::StoreError> {
                self.0.put(key, value).await
            }
        }

        let store = Arc::new(ListFails(MemoryStore::new(), AtomicBool::new(false)));
        store.0.insert("fabric/n1/ports/p1", r#"{"name": "eth1"}"#);
        let reporter = Arc::new(RecordingReporter::new());
        let mut monitor = HealthMonitor::new(
            CatalogBuilder::new(store.clone(), "fabric/n1"),
            Arc::new(ScriptedProber::new(true)),
            reporter.clone(),
            SnapshotStore::new(store.clone(), "status/n1"),
            WatchPolicy::default(),
        );

        monitor.run_tick().await;
        store.1.store(true, Ordering::SeqCst);
        let stats = monitor.run_tick().await;

        assert_eq!(stats.aged, 0);
        assert_eq!(monitor.table().len(), 1);
        assert_eq!(monitor.table().get("p1").unwrap().status(), Status::Up);
    }

    #[tokio::test]
    async fn test_status_counts_cover_unprobed_entities() {
        use fabric_core_liveness::{CheckSpec, ProbeResult};

        struct PanicsFor(&'static str);

        #[async_trait::async_trait]
        impl Prober for PanicsFor {
            async fn probe(&self, spec: &CheckSpec) -> ProbeResult {
                if spec.entity_id == self.0 {
                    panic!("probe backend crashed");
                }
                ProbeResult::reachable(&spec.entity_id, 1.0)
            }
        }

        let store = Arc::new(MemoryStore::new());
        store.insert("fabric/n1/ports/p1", r#"{"name": "eth1"}"#);
        store.insert("fabric/n1/ports/p2", r#"{"name": "eth2"}"#);
        let mut monitor = HealthMonitor::new(
            CatalogBuilder::new(store.clone(), "fabric/n1"),
            Arc::new(PanicsFor("p2")),
            Arc::new(RecordingReporter::new()),
            SnapshotStore::new(store.clone(), "status/n1"),
            WatchPolicy::default(),
        );

        let stats = monitor.run_tick().await;
        assert_eq!(stats.probed, 1);
        assert_eq!(stats.missing, 1);
        assert_eq!(stats.up, 1);
        assert_eq!(stats.down, 0);
        assert_eq!(stats.unknown, 1);
        assert!(stats.summary().contains("1 unknown"));
    }

    #[tokio::test]
    async fn test_snapshot_retried_after_panicking_write() {
        use std::sync::atomic::{AtomicBool, Ordering};

        struct PanicsOnPut(MemoryStore, AtomicBool);

        #[async_trait::async_trait]
        impl crate::store::KvStore for PanicsOnPut {
            async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, crate::StoreError> {
                self.0.get(key).await
            }
            async fn list(
                &self,
                prefix: &str,
            ) -> Result<Vec<(String, Vec<u8>)>, crate::StoreError> {
                self.0.list(prefix).await
            }
            async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), crate::StoreError> {
                if self.1.load(Ordering::SeqCst) {
                    panic!("disk driver crashed");
                }
                self.0.put(key, value).await
            }
        }

        let store = Arc::new(PanicsOnPut(MemoryStore::new(), AtomicBool::new(true)));
        store.0.insert("fabric/n1/ports/p1", r#"{"name": "eth1"}"#);
        let mut monitor = HealthMonitor::new(
            CatalogBuilder::new(store.clone(), "fabric/n1"),
            Arc::new(ScriptedProber::new(true)),
            Arc::new(RecordingReporter::new()),
            SnapshotStore::new(store.clone(), "status/n1"),
            WatchPolicy::default(),
        );

        assert!(monitor.guarded_tick().await.is_none());
        assert!(store.0.value("status/n1").is_none());

        store.1.store(false, Ordering::SeqCst);
        let stats = monitor.guarded_tick().await.unwrap();
        assert_eq!(stats.changed, 0);
        assert!(stats.persisted);
        assert!(store.0.value("status/n1").is_some());
    }

    #[test]
    fn test_panic_message() {
        let caught = std::panic::catch_unwind(|| panic!("boom {}", 7)).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "boom 7");

        let caught = std::panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "static");
    }
}
