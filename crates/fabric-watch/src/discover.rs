//! Controller discovery loop
//!
//! Elects one controller replica out of a priority-ordered candidate list
//! and publishes it under a well-known name. Candidates come from a JSON
//! array in the configuration store (position = priority) and fall back to
//! a static list when the key does not exist.
//!
//! Without a selection every candidate is probed; with one, only the
//! selected replica is. Candidates are probed with ICMP from the default
//! namespace.

use crate::monitor::panic_message;
use crate::policy::WatchPolicy;
use crate::resolver::Resolver;
use crate::scheduler::fan_out;
use crate::store::KvStore;
use fabric_core_liveness::{
    CheckSpec, FailoverSelector, ObjectCategory, ProbeKind, SelectionOutcome,
};
use fabric_probe::Prober;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Static discovery settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Name the elected address is published under
    pub hostname: String,

    /// Store key holding the candidate list, if any
    pub candidates_key: Option<String>,

    /// Candidates used when the key is unset or missing
    pub static_candidates: Vec<String>,

    /// Local address probes are sent from
    pub source_address: String,
}

/// Controller discovery loop for one node
pub struct ControllerDiscovery {
    config: DiscoveryConfig,
    store: Arc<dyn KvStore>,
    prober: Arc<dyn Prober>,
    resolver: Arc<dyn Resolver>,
    policy: WatchPolicy,
    selector: FailoverSelector,
    published: Option<String>,
}

impl ControllerDiscovery {
    /// Discovery with no candidates yet; call [`run`](Self::run) to start it
    pub fn new(
        config: DiscoveryConfig,
        store: Arc<dyn KvStore>,
        prober: Arc<dyn Prober>,
        resolver: Arc<dyn Resolver>,
        policy: WatchPolicy,
    ) -> Self {
        Self {
            config,
            store,
            prober,
            resolver,
            policy,
            selector: FailoverSelector::new(),
            published: None,
        }
    }

    /// Main loop - runs forever
    pub async fn run(mut self) {
        info!(
            "🧭 Controller discovery active | Name: {} | Interval: {:?}",
            self.config.hostname, self.policy.discover_interval
        );

        let mut interval = tokio::time::interval(self.policy.discover_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            self.guarded_tick().await;
        }
    }

    /// One tick inside the panic boundary; `None` if the tick panicked
    pub async fn guarded_tick(&mut self) -> Option<SelectionOutcome> {
        match AssertUnwindSafe(self.run_tick()).catch_unwind().await {
            Ok(outcome) => Some(outcome),
            Err(panic) => {
                error!(
                    "Discovery tick panicked, continuing with the next tick: {}",
                    panic_message(panic.as_ref())
                );
                None
            }
        }
    }

    /// Execute a single tick
    ///
    /// Note: Public for integration testing
    pub async fn run_tick(&mut self) -> SelectionOutcome {
        if let Some(candidates) = self.candidates().await {
            if self.selector.reconcile(&candidates) {
                info!("Controller candidates: {:?}", candidates);
            }
        }

        let specs: Vec<CheckSpec> = self
            .selector
            .probe_targets()
            .into_iter()
            .map(|address| {
                CheckSpec::new(
                    &address,
                    ObjectCategory::Controller,
                    ProbeKind::IcmpOutsideNamespace,
                )
                .with_target(address)
                .with_source(&self.config.source_address)
            })
            .collect();

        let results = fan_out(self.prober.clone(), specs).await;
        let outcome = self.selector.apply(&results);

        match &outcome {
            SelectionOutcome::Elected(address) => info!("🎯 Elected controller {}", address),
            SelectionOutcome::Retained(address) => debug!(
                "Keeping controller {} ({} ticks)",
                address,
                self.selector.hold_ticks()
            ),
            SelectionOutcome::Lost(address) => warn!("Controller {} lost", address),
            SelectionOutcome::Expired(address) => {
                info!("Controller {} hold time expired", address)
            }
            SelectionOutcome::NoneReachable => warn!("No controller candidate reachable"),
        }

        if let Some(selected) = self.selector.selected().map(str::to_string) {
            if self.published.as_deref() != Some(selected.as_str()) {
                self.publish(selected).await;
            }
        }
        outcome
    }

    /// Candidate list for this tick, `None` to keep the current one
    async fn candidates(&self) -> Option<Vec<String>> {
        let fallback = || Some(self.config.static_candidates.clone());

        let Some(key) = &self.config.candidates_key else {
            return fallback();
        };

        match self.store.get(key).await {
            Ok(Some(raw)) => match serde_json::from_slice::<Vec<String>>(&raw) {
                Ok(candidates) => Some(candidates),
                Err(e) => {
                    warn!("Candidate list {} is malformed: {}", key, e);
                    self.keep_or(fallback)
                }
            },
            Ok(None) => fallback(),
            Err(e) => {
                warn!("Cannot read candidate list {}: {}", key, e);
                self.keep_or(fallback)
            }
        }
    }

    /// Keep the current candidates, or take `fallback` when there are none
    fn keep_or(&self, fallback: impl FnOnce() -> Option<Vec<String>>) -> Option<Vec<String>> {
        if self.selector.candidates().is_empty() {
            fallback()
        } else {
            None
        }
    }

    /// Publish `address` unless the resolver already has it
    async fn publish(&mut self, address: String) {
        let name = &self.config.hostname;
        match self.resolver.current(name).await {
            Ok(Some(current)) if current == address => {
                debug!("{} already resolves to {}", name, address);
                self.published = Some(address);
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Cannot read current address of {}: {}", name, e);
                return;
            }
        }

        match self.resolver.publish(name, &address).await {
            Ok(()) => {
                info!("📌 Published {} -> {}", name, address);
                self.published = Some(address);
            }
            Err(e) => warn!("Cannot publish {} -> {}, retrying next tick: {}", name, address, e),
        }
    }

    /// Election state
    pub fn selector(&self) -> &FailoverSelector {
        &self.selector
    }

    /// Address last confirmed in the resolver
    pub fn published(&self) -> Option<&str> {
        self.published.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::MemoryResolver;
    use crate::store::MemoryStore;
    use crate::testing::ScriptedProber;

    fn discovery(
        store: Arc<MemoryStore>,
        prober: Arc<ScriptedProber>,
        resolver: Arc<MemoryResolver>,
    ) -> ControllerDiscovery {
        ControllerDiscovery::new(
            DiscoveryConfig {
                hostname: "controller.fabric".to_string(),
                candidates_key: Some("fabric/controllers".to_string()),
                static_candidates: vec!["10.0.0.9".to_string()],
                source_address: "10.0.0.100".to_string(),
            },
            store,
            prober,
            resolver,
            WatchPolicy::default(),
        )
    }

    #[tokio::test]
    async fn test_static_fallback_when_key_missing() {
        let store = Arc::new(MemoryStore::new());
        let prober = Arc::new(ScriptedProber::new(true));
        let resolver = Arc::new(MemoryResolver::new());
        let mut discovery = discovery(store, prober.clone(), resolver.clone());

        let outcome = discovery.run_tick().await;

        assert_eq!(outcome, SelectionOutcome::Elected("10.0.0.9".to_string()));
        assert_eq!(prober.take_probed(), vec!["10.0.0.9"]);
        assert_eq!(
            resolver.current("controller.fabric").await.unwrap().as_deref(),
            Some("10.0.0.9")
        );
    }

    #[tokio::test]
    async fn test_already_published_address_not_rewritten() {
        let store = Arc::new(MemoryStore::new());
        store.insert("fabric/controllers", r#"["10.0.0.1", "10.0.0.2"]"#);
        let resolver =
            Arc::new(MemoryResolver::new().with_entry("controller.fabric", "10.0.0.1"));
        let mut discovery = discovery(store, Arc::new(ScriptedProber::new(true)), resolver.clone());

        discovery.run_tick().await;

        assert_eq!(discovery.published(), Some("10.0.0.1"));
        assert_eq!(resolver.publish_count(), 0);
    }

    #[tokio::test]
    async fn test_unreadable_list_keeps_candidates() {
        let store = Arc::new(MemoryStore::new());
        store.insert("fabric/controllers", r#"["10.0.0.1", "10.0.0.2"]"#);
        let resolver = Arc::new(MemoryResolver::new());
        let mut discovery = discovery(
            store.clone(),
            Arc::new(ScriptedProber::new(true)),
            resolver,
        );

        discovery.run_tick().await;
        store.insert("fabric/controllers", "[garbage");
        let outcome = discovery.run_tick().await;

        assert_eq!(outcome, SelectionOutcome::Retained("10.0.0.1".to_string()));
        assert_eq!(discovery.selector().candidates().len(), 2);
    }
}
