//! Fabric Watch: liveness tick drivers
//!
//! Two independent loops, each owning its own state and timer:
//!
//! - [`HealthMonitor`]: every 2 s, rebuilds the entity catalog from the
//!   configuration store, ages out removed entities, probes every tracked
//!   entity concurrently, runs hysteresis, reports transitions to the
//!   controller and persists a status snapshot.
//! - [`ControllerDiscovery`]: every 30 s, elects which controller replica to
//!   talk to and publishes it through a name-override file.
//!
//! # One health tick
//!
//! ```text
//! begin_tick ─> CatalogBuilder::build ─> adopt* ─> sweep
//!                                                    │
//!      ┌─────────────── fan_out (one task per entity) ┘
//!      ▼
//!  results channel ─> barrier (N results) ─> apply* ─> report ─> persist
//! ```
//!
//! # Example
//!
//! ```no_run
//! use fabric_probe::ProbeSet;
//! use fabric_watch::{
//!     CatalogBuilder, FileStore, HealthMonitor, HttpReporter, SnapshotStore, WatchPolicy,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = Arc::new(FileStore::new("/var/lib/fabric/store"));
//! let monitor = HealthMonitor::new(
//!     CatalogBuilder::new(store.clone(), "fabric/pop-1"),
//!     Arc::new(ProbeSet::system()),
//!     Arc::new(HttpReporter::new("http://controller:8080", Duration::from_secs(5))?),
//!     SnapshotStore::new(store, "status/pop-1"),
//!     WatchPolicy::default(),
//! );
//!
//! tokio::spawn(monitor.run());
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod discover;
pub mod metrics;
pub mod monitor;
pub mod policy;
pub mod reporter;
pub mod resolver;
pub mod scheduler;
pub mod snapshot;
pub mod store;
pub mod testing;

pub use catalog::{Catalog, CatalogBuilder, CatalogError, ResourceKind, ResourceRecord};
pub use discover::{ControllerDiscovery, DiscoveryConfig};
pub use metrics::{TickStats, TickStatsBuilder};
pub use monitor::HealthMonitor;
pub use policy::WatchPolicy;
pub use reporter::{HttpReporter, ReportError, StatusReport, StatusReporter};
pub use resolver::{HostsFileResolver, MemoryResolver, Resolver, ResolverError};
pub use snapshot::{SnapshotError, SnapshotStore};
pub use store::{FileStore, KvStore, MemoryStore, StoreError};
