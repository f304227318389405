//! Fabric Core Liveness: Pure-logic liveness primitives
//!
//! # Overview
//!
//! This crate holds the state machines behind the fabric agent's liveness
//! engine. It has no knowledge of sockets, namespaces, HTTP or storage: the
//! caller feeds it probe results and configuration snapshots, and it answers
//! with debounced status transitions and failover decisions.
//!
//! - **Debounce**: 3-strikes down detection, single-success recovery
//! - **Status Table**: mark-and-sweep aging against the live catalog, restart smoothing
//! - **Failover Selector**: priority-ordered election with a hold-time cap
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       Catalog (CheckSpec per entity)    │
//! └─────────────┬───────────────────────────┘
//!               │ begin_tick / adopt / sweep
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Status Table                      │  ← Aging, smoothing
//! │  (EntityStatus per entity id)           │
//! └─────────────┬───────────────────────────┘
//!               │ apply(ProbeResult)
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Debounce                          │  ← Hysteresis
//! │  (down counter, UNKNOWN/UP/DOWN)        │
//! └─────────────┬───────────────────────────┘
//!               │ pending_reports / snapshot
//!               ▼
//!        Reporter & snapshot store
//! ```
//!
//! # Example
//!
//! ```
//! use fabric_core_liveness::{CheckSpec, ObjectCategory, ProbeKind, ProbeResult, Status, StatusTable};
//!
//! let mut table = StatusTable::new();
//! table.begin_tick();
//! table.adopt(CheckSpec::new("gre-1", ObjectCategory::LogicalLink, ProbeKind::LinkState).with_target("gre1"));
//! table.sweep(chrono::Utc::now());
//!
//! table.apply(&ProbeResult::reachable("gre-1", 0.4));
//! assert_eq!(table.get("gre-1").unwrap().status(), Status::Up);
//! assert_eq!(table.pending_reports().len(), 1);
//! ```

pub mod debounce;
pub mod failover;
pub mod table;
pub mod types;

pub use debounce::Debounce;
pub use failover::{Candidate, FailoverSelector, SelectionOutcome};
pub use table::{Adoption, EntityStatus, PendingReport, PersistedStatus, StatusTable};
pub use types::{
    CheckSpec, ObjectCategory, ProbeKind, ProbeResult, Status, DOWN_THRESHOLD, HOLD_TICKS_CAP,
    ICMP_TIMEOUT_MS, IPSEC_SA_SUFFIX,
};
