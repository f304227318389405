//! Status Table: per-entity liveness records with mark-and-sweep aging
//!
//! Each tick runs the same sequence against the table:
//!
//! ```text
//! begin_tick()      mark every tracked entity aged
//! adopt(spec)*      clear the mark for every entity in the fresh catalog
//! sweep(now)        force aged entities DOWN and evict them
//! apply(result)*    hysteresis on this tick's probe results
//! pending_reports() / acknowledge()
//! snapshot()        persisted view, written while is_dirty()
//! ```
//!
//! Removal from the configuration is the only way an entity leaves the
//! table; probe failures never evict.

use crate::debounce::Debounce;
use crate::types::{CheckSpec, ProbeResult, Status};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Long-lived liveness record of one entity
#[derive(Debug, Clone)]
pub struct EntityStatus {
    spec: CheckSpec,
    debounce: Debounce,
    aged: bool,
    status_changed: bool,
    changed_at: Option<DateTime<Utc>>,
}

impl EntityStatus {
    fn new(spec: CheckSpec) -> Self {
        Self {
            spec,
            debounce: Debounce::new(),
            aged: false,
            status_changed: false,
            changed_at: None,
        }
    }

    fn restored(persisted: PersistedStatus) -> Self {
        Self {
            spec: persisted.spec,
            debounce: Debounce::restored(persisted.status, persisted.down_count),
            aged: false,
            status_changed: false,
            changed_at: persisted.changed_at,
        }
    }

    /// Entity id
    pub fn id(&self) -> &str {
        &self.spec.entity_id
    }

    /// Check spec from the latest catalog
    pub fn spec(&self) -> &CheckSpec {
        &self.spec
    }

    /// Debounced status
    pub fn status(&self) -> Status {
        self.debounce.status()
    }

    /// Consecutive failed probes
    pub fn down_count(&self) -> u32 {
        self.debounce.down_count()
    }

    /// Whether the entity missed the current catalog so far
    pub fn is_aged(&self) -> bool {
        self.aged
    }

    /// Whether a transition is waiting to be acknowledged by the controller
    pub fn status_changed(&self) -> bool {
        self.status_changed
    }

    /// Time of the last confirmed transition
    pub fn changed_at(&self) -> Option<DateTime<Utc>> {
        self.changed_at
    }

    fn observe(&mut self, result: &ProbeResult) -> Option<Status> {
        let transition = self.debounce.observe(result.reachable);
        if transition.is_some() {
            self.status_changed = true;
            self.changed_at = Some(result.observed_at);
        }
        transition
    }

    /// Only an UP entity announces its forced DOWN.
    fn force_down(&mut self, now: DateTime<Utc>) {
        if self.debounce.force_down() == Status::Up {
            self.status_changed = true;
            self.changed_at = Some(now);
        }
    }

    fn persisted(&self) -> PersistedStatus {
        PersistedStatus {
            spec: self.spec.clone(),
            status: self.status(),
            down_count: self.down_count(),
            changed_at: self.changed_at,
        }
    }
}

/// Snapshot form of an [`EntityStatus`]
///
/// The aging marker and the pending-report flag are process-local and never
/// persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedStatus {
    pub spec: CheckSpec,
    pub status: Status,
    #[serde(default)]
    pub down_count: u32,
    #[serde(default)]
    pub changed_at: Option<DateTime<Utc>>,
}

/// A transition waiting to be pushed to the controller
#[derive(Debug, Clone, PartialEq)]
pub struct PendingReport {
    pub spec: CheckSpec,
    pub status: Status,
    pub changed_at: DateTime<Utc>,
}

/// What `adopt` did with a catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adoption {
    /// First sighting, tracked as UNKNOWN
    New,
    /// Already tracked, spec replaced
    Refreshed,
    /// Was retired with an unreported DOWN and came back
    Revived,
}

/// Table of every entity the engine currently tracks
///
/// Retired entities (aged out while their DOWN report is still
/// unacknowledged) are kept apart: they are never probed or persisted, only
/// reported until the controller acknowledges them.
#[derive(Debug)]
pub struct StatusTable {
    entries: BTreeMap<String, EntityStatus>,
    retired: BTreeMap<String, EntityStatus>,
    smoothing: bool,
    dirty: bool,
}

impl StatusTable {
    /// Empty table with smoothing still available
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            retired: BTreeMap::new(),
            smoothing: true,
            dirty: false,
        }
    }

    /// Load a persisted snapshot, applying restart smoothing
    ///
    /// Every restored entity with a known status is marked changed so the
    /// first tick re-announces it. Smoothing happens at most once per table;
    /// later calls are ignored and return 0.
    pub fn restore(&mut self, snapshot: Vec<PersistedStatus>) -> usize {
        if !self.smoothing {
            return 0;
        }
        self.smoothing = false;

        let mut smoothed = 0;
        for persisted in snapshot {
            let mut entity = EntityStatus::restored(persisted);
            if entity.status() != Status::Unknown {
                entity.status_changed = true;
                smoothed += 1;
            }
            self.entries.insert(entity.id().to_string(), entity);
        }

        if smoothed > 0 {
            info!("Smoothing {} restored entities for re-announcement", smoothed);
        }
        smoothed
    }

    /// Give up on smoothing without restoring anything
    pub fn disable_smoothing(&mut self) {
        self.smoothing = false;
    }

    /// Mark every tracked entity aged
    pub fn begin_tick(&mut self) {
        for entity in self.entries.values_mut() {
            entity.aged = true;
        }
    }

    /// Track or refresh an entity present in the fresh catalog
    ///
    /// The spec is replaced wholesale; status and counter are untouched.
    pub fn adopt(&mut self, spec: CheckSpec) -> Adoption {
        if let Some(entity) = self.entries.get_mut(&spec.entity_id) {
            entity.aged = false;
            entity.spec = spec;
            return Adoption::Refreshed;
        }

        if let Some(mut entity) = self.retired.remove(&spec.entity_id) {
            debug!("Reviving retired entity {}", spec.entity_id);
            entity.aged = false;
            entity.spec = spec;
            self.entries.insert(entity.id().to_string(), entity);
            return Adoption::Revived;
        }

        debug!("Adopting new entity {}", spec.entity_id);
        let entity = EntityStatus::new(spec);
        self.entries.insert(entity.id().to_string(), entity);
        Adoption::New
    }

    /// Evict every entity still marked aged
    ///
    /// Evicted entities are forced DOWN first. Those with a transition still
    /// to report move to the retired set; the rest are dropped. Returns the
    /// evicted ids.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let aged: Vec<String> = self
            .entries
            .values()
            .filter(|entity| entity.aged)
            .map(|entity| entity.id().to_string())
            .collect();

        for id in &aged {
            let Some(mut entity) = self.entries.remove(id) else {
                continue;
            };
            let previous = entity.status();
            entity.force_down(now);
            info!(
                "Entity {} ({}) left the catalog while {}, evicting",
                id, entity.spec.category, previous
            );
            if entity.status_changed {
                self.retired.insert(id.clone(), entity);
            }
        }

        if !aged.is_empty() {
            self.dirty = true;
        }
        aged
    }

    /// Run hysteresis for one probe result
    ///
    /// Results for entities the table no longer tracks are ignored.
    pub fn apply(&mut self, result: &ProbeResult) -> Option<Status> {
        let entity = self.entries.get_mut(&result.entity_id)?;
        let transition = entity.observe(result);
        if transition.is_some() {
            self.dirty = true;
        }
        transition
    }

    /// Every transition not yet acknowledged, tracked and retired alike
    pub fn pending_reports(&self) -> Vec<PendingReport> {
        self.entries
            .values()
            .chain(self.retired.values())
            .filter(|entity| entity.status_changed)
            .map(|entity| PendingReport {
                spec: entity.spec.clone(),
                status: entity.status(),
                changed_at: entity.changed_at.unwrap_or_else(Utc::now),
            })
            .collect()
    }

    /// Record a successful report of `status` for `entity_id`
    ///
    /// A report for a status the entity has since moved away from does not
    /// clear the flag. Returns whether anything was cleared.
    pub fn acknowledge(&mut self, entity_id: &str, status: Status) -> bool {
        if let Some(entity) = self.entries.get_mut(entity_id) {
            if entity.status() == status && entity.status_changed {
                entity.status_changed = false;
                return true;
            }
            return false;
        }

        match self.retired.get(entity_id) {
            Some(entity) if entity.status() == status => {
                self.retired.remove(entity_id);
                true
            }
            _ => false,
        }
    }

    /// Specs of every tracked entity, in id order
    pub fn specs(&self) -> Vec<CheckSpec> {
        self.entries
            .values()
            .map(|entity| entity.spec.clone())
            .collect()
    }

    /// Persisted view of every tracked entity
    pub fn snapshot(&self) -> Vec<PersistedStatus> {
        self.entries.values().map(EntityStatus::persisted).collect()
    }

    /// Whether the table changed since the last successful snapshot write
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Record a successful snapshot write
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Tracked entity by id
    pub fn get(&self, entity_id: &str) -> Option<&EntityStatus> {
        self.entries.get(entity_id)
    }

    /// Number of tracked entities
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of evicted entities still waiting on a DOWN acknowledgement
    pub fn retired_len(&self) -> usize {
        self.retired.len()
    }
}

impl Default for StatusTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ObjectCategory, ProbeKind, DOWN_THRESHOLD};

    fn spec(id: &str) -> CheckSpec {
        CheckSpec::new(id, ObjectCategory::Tunnel, ProbeKind::IcmpOutsideNamespace)
            .with_target("192.0.2.1")
    }

    fn tick(table: &mut StatusTable, catalog: &[&str]) {
        table.begin_tick();
        for id in catalog {
            table.adopt(spec(id));
        }
        table.sweep(Utc::now());
    }

    fn ack_all(table: &mut StatusTable) {
        for report in table.pending_reports() {
            table.acknowledge(&report.spec.entity_id, report.status);
        }
    }

    #[test]
    fn test_new_entity_is_unknown() {
        let mut table = StatusTable::new();
        tick(&mut table, &["t1"]);

        let entity = table.get("t1").unwrap();
        assert_eq!(entity.status(), Status::Unknown);
        assert!(!entity.status_changed());
        assert!(table.pending_reports().is_empty());
    }

    #[test]
    fn test_adopt_refreshes_spec_keeps_status() {
        let mut table = StatusTable::new();
        tick(&mut table, &["t1"]);
        table.apply(&ProbeResult::reachable("t1", 1.0));
        ack_all(&mut table);

        table.begin_tick();
        let adoption = table.adopt(spec("t1").with_target("198.51.100.9"));
        assert_eq!(adoption, Adoption::Refreshed);
        table.sweep(Utc::now());

        let entity = table.get("t1").unwrap();
        assert_eq!(entity.spec().target, "198.51.100.9");
        assert_eq!(entity.status(), Status::Up);
        assert!(!entity.status_changed());
    }

    #[test]
    fn test_hysteresis_through_table() {
        let mut table = StatusTable::new();
        tick(&mut table, &["t1"]);
        assert_eq!(table.apply(&ProbeResult::reachable("t1", 1.0)), Some(Status::Up));
        ack_all(&mut table);

        for _ in 0..DOWN_THRESHOLD - 1 {
            assert_eq!(table.apply(&ProbeResult::unreachable("t1")), None);
        }
        assert_eq!(
            table.apply(&ProbeResult::unreachable("t1")),
            Some(Status::Down)
        );
        let pending = table.pending_reports();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, Status::Down);
    }

    #[test]
    fn test_aged_up_entity_reports_down_once() {
        let mut table = StatusTable::new();
        tick(&mut table, &["t1", "t2"]);
        table.apply(&ProbeResult::reachable("t1", 1.0));
        ack_all(&mut table);
        table.clear_dirty();

        let evicted = {
            table.begin_tick();
            table.adopt(spec("t2"));
            table.sweep(Utc::now())
        };
        assert_eq!(evicted, vec!["t1".to_string()]);
        assert!(table.get("t1").is_none());
        assert!(table.is_dirty());

        let pending = table.pending_reports();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].spec.entity_id, "t1");
        assert_eq!(pending[0].status, Status::Down);

        assert!(table.acknowledge("t1", Status::Down));
        assert_eq!(table.retired_len(), 0);
        assert!(table.pending_reports().is_empty());
    }

    #[test]
    fn test_aged_unknown_entity_is_dropped_silently() {
        let mut table = StatusTable::new();
        tick(&mut table, &["t1"]);
        tick(&mut table, &[]);

        assert!(table.is_empty());
        assert_eq!(table.retired_len(), 0);
        assert!(table.pending_reports().is_empty());
    }

    #[test]
    fn test_retired_entity_is_revived() {
        let mut table = StatusTable::new();
        tick(&mut table, &["t1"]);
        table.apply(&ProbeResult::reachable("t1", 1.0));
        ack_all(&mut table);

        tick(&mut table, &[]);
        assert_eq!(table.retired_len(), 1);
        assert!(table.specs().is_empty());

        table.begin_tick();
        assert_eq!(table.adopt(spec("t1")), Adoption::Revived);
        table.sweep(Utc::now());
        assert_eq!(table.get("t1").unwrap().status(), Status::Down);
        assert_eq!(table.apply(&ProbeResult::reachable("t1", 1.0)), Some(Status::Up));
    }

    #[test]
    fn test_restore_smooths_known_status_once() {
        let persisted = vec![
            PersistedStatus {
                spec: spec("up"),
                status: Status::Up,
                down_count: 0,
                changed_at: Some(Utc::now()),
            },
            PersistedStatus {
                spec: spec("unknown"),
                status: Status::Unknown,
                down_count: 1,
                changed_at: None,
            },
        ];

        let mut table = StatusTable::new();
        assert_eq!(table.restore(persisted.clone()), 1);
        assert!(table.get("up").unwrap().status_changed());
        assert!(!table.get("unknown").unwrap().status_changed());
        assert_eq!(table.get("unknown").unwrap().down_count(), 1);

        // Smoothing is one-shot
        assert_eq!(table.restore(persisted), 0);
    }

    #[test]
    fn test_stale_acknowledgement_keeps_flag() {
        let mut table = StatusTable::new();
        tick(&mut table, &["t1"]);
        table.apply(&ProbeResult::reachable("t1", 1.0));

        assert!(!table.acknowledge("t1", Status::Down));
        assert!(table.get("t1").unwrap().status_changed());
    }

    #[test]
    fn test_snapshot_roundtrip_through_json() {
        let mut table = StatusTable::new();
        tick(&mut table, &["t1"]);
        table.apply(&ProbeResult::reachable("t1", 1.0));

        let json = serde_json::to_string(&table.snapshot()).unwrap();
        let decoded: Vec<PersistedStatus> = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, table.snapshot());
        assert!(!json.contains("aged"));
    }
}
