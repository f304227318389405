/*!
 * Process wiring for the two long-running loops
 *
 * Each subcommand builds exactly one loop from the configuration and runs
 * it until SIGINT. Boot failures (bad config, unusable controller URL) are
 * returned to `main`; nothing after boot is fatal.
 */

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use fabric_probe::ProbeSet;
use fabric_watch::{
    CatalogBuilder, ControllerDiscovery, FileStore, HealthMonitor, HostsFileResolver,
    HttpReporter, KvStore, SnapshotStore, WatchPolicy,
};
use std::future::Future;
use std::sync::Arc;
use tracing::info;

fn watch_policy() -> Result<WatchPolicy> {
    let policy = WatchPolicy::default();
    policy.validate().map_err(AgentError::Config)?;
    Ok(policy)
}

/// Resource health loop for this node
pub fn health_monitor(config: &AgentConfig) -> Result<HealthMonitor> {
    config.validate_health()?;
    let policy = watch_policy()?;

    let store: Arc<dyn KvStore> = Arc::new(FileStore::new(&config.store_root));
    let reporter = HttpReporter::new(&config.controller_url, config.report_timeout())?;

    Ok(HealthMonitor::new(
        CatalogBuilder::new(store.clone(), config.catalog_prefix()),
        Arc::new(ProbeSet::system()),
        Arc::new(reporter),
        SnapshotStore::new(store, config.snapshot_key()),
        policy,
    ))
}

/// Controller discovery loop for this node
pub fn controller_discovery(config: &AgentConfig) -> Result<ControllerDiscovery> {
    config.validate_discover()?;
    let policy = watch_policy()?;

    Ok(ControllerDiscovery::new(
        config.discovery_config(),
        Arc::new(FileStore::new(&config.store_root)),
        Arc::new(ProbeSet::system()),
        Arc::new(HostsFileResolver::new(&config.discover.hosts_file)),
        policy,
    ))
}

/// Run the health loop until SIGINT
pub async fn run_health(config: &AgentConfig) -> Result<()> {
    let monitor = health_monitor(config)?;
    info!(
        "Starting health loop for node {} (store {})",
        config.node_id,
        config.store_root.display()
    );
    run_until_shutdown(monitor.run()).await;
    Ok(())
}

/// Run the discovery loop until SIGINT
pub async fn run_discover(config: &AgentConfig) -> Result<()> {
    let discovery = controller_discovery(config)?;
    info!(
        "Starting discovery loop for node {} (publishing {} in {})",
        config.node_id,
        config.discover.hostname,
        config.discover.hosts_file.display()
    );
    run_until_shutdown(discovery.run()).await;
    Ok(())
}

async fn run_until_shutdown(looping: impl Future<Output = ()>) {
    tokio::select! {
        _ = looping => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received, shutting down");
        }
    }
}
