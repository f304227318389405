//! Entity Catalog Builder
//!
//! Reads the node's resource records from the configuration store, one
//! directory per resource kind:
//!
//! ```text
//! fabric/<node>/ports/<id>          {"name": "eth1", ...}
//! fabric/<node>/tunnels/<id>        {"remote_address": "198.51.100.7", "health_check": true, ...}
//! fabric/<node>/ipsec/<id>          {"sa_name": "vpn-7", ...}
//! ```
//!
//! and derives one [`CheckSpec`] per monitored entity. A malformed record is
//! skipped and an unreadable kind is left out; both leave the rest of the
//! catalog intact.

use crate::store::KvStore;
use fabric_core_liveness::{CheckSpec, ObjectCategory, ProbeKind, IPSEC_SA_SUFFIX};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Why one record produced no entity
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("record has no id")]
    EmptyId,

    #[error("record {0} has neither a health-check peer nor an interface name")]
    NoTarget(String),

    #[error("cannot decode record {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Resource directories under the node prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    Ports,
    Links,
    Connections,
    Tunnels,
    Ipsec,
    NatGateways,
}

impl ResourceKind {
    /// Every kind, in catalog read order
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::Ports,
        ResourceKind::Links,
        ResourceKind::Connections,
        ResourceKind::Tunnels,
        ResourceKind::Ipsec,
        ResourceKind::NatGateways,
    ];

    /// Store path segment holding records of this kind
    pub fn key_segment(&self) -> &'static str {
        match self {
            ResourceKind::Ports => "ports",
            ResourceKind::Links => "links",
            ResourceKind::Connections => "connections",
            ResourceKind::Tunnels => "tunnels",
            ResourceKind::Ipsec => "ipsec",
            ResourceKind::NatGateways => "nat-gateways",
        }
    }

    /// Category of the base entity; IPsec links report as logical links
    pub fn category(&self) -> ObjectCategory {
        match self {
            ResourceKind::Ports => ObjectCategory::Port,
            ResourceKind::Links | ResourceKind::Ipsec => ObjectCategory::LogicalLink,
            ResourceKind::Connections => ObjectCategory::Connection,
            ResourceKind::Tunnels => ObjectCategory::Tunnel,
            ResourceKind::NatGateways => ObjectCategory::NatGateway,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key_segment())
    }
}

/// One provisioned resource as stored in the configuration source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceRecord {
    /// Resource id; the key name is used when empty
    pub id: String,

    /// Logical interface name, the link-state target
    pub name: String,

    /// Tenant scope, doubles as the network namespace name
    pub tenant: String,

    pub local_address: String,

    pub remote_address: String,

    /// Probe the remote peer with ICMP instead of reading link state
    pub health_check: bool,

    /// Also track the IPsec SA protecting this resource
    pub ipsec: bool,

    /// IKE SA name in the session listing
    pub sa_name: String,
}

/// Check specs for one record: the base entity plus its SA when IPsec
pub fn derive_specs(
    kind: ResourceKind,
    record: &ResourceRecord,
) -> Result<Vec<CheckSpec>, CatalogError> {
    if record.id.is_empty() {
        return Err(CatalogError::EmptyId);
    }

    let base = if record.health_check && !record.remote_address.is_empty() {
        let probe = if kind == ResourceKind::Tunnels || record.tenant.is_empty() {
            ProbeKind::IcmpOutsideNamespace
        } else {
            ProbeKind::IcmpInNamespace
        };
        CheckSpec::new(&record.id, kind.category(), probe)
            .with_target(&record.remote_address)
            .with_source(&record.local_address)
    } else if !record.name.is_empty() {
        CheckSpec::new(&record.id, kind.category(), ProbeKind::LinkState).with_target(&record.name)
    } else {
        return Err(CatalogError::NoTarget(record.id.clone()));
    };

    let mut specs = vec![base.with_namespace(&record.tenant)];

    if kind == ResourceKind::Ipsec || record.ipsec {
        let sa_name = [&record.sa_name, &record.name, &record.id]
            .into_iter()
            .find(|name| !name.is_empty())
            .cloned()
            .unwrap_or_default();
        specs.push(
            CheckSpec::new(
                format!("{}{}", record.id, IPSEC_SA_SUFFIX),
                ObjectCategory::IpsecSession,
                ProbeKind::SessionState,
            )
            .with_namespace(&record.tenant)
            .with_target(sa_name),
        );
    }

    Ok(specs)
}

/// Result of one catalog build
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    /// Unique by entity id, in build order
    pub specs: Vec<CheckSpec>,

    /// Records dropped as malformed or duplicate
    pub skipped: usize,

    /// Kinds that could not be listed at all
    pub failed_kinds: Vec<ResourceKind>,
}

impl Catalog {
    /// Number of derived check specs
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Whether no check spec was derived
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Whether any kind failed to list
    pub fn is_partial(&self) -> bool {
        self.skipped > 0 || !self.failed_kinds.is_empty()
    }
}

/// Builds the catalog for one node from the configuration store
#[derive(Clone)]
pub struct CatalogBuilder {
    store: Arc<dyn KvStore>,
    prefix: String,
}

impl CatalogBuilder {
    /// `prefix` is the node's root, e.g. `fabric/pop-1`
    pub fn new(store: Arc<dyn KvStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into().trim_end_matches('/').to_string(),
        }
    }

    /// Store prefix records are listed under
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Read every kind and derive this tick's check specs
    pub async fn build(&self) -> Catalog {
        let mut catalog = Catalog::default();
        let mut seen = BTreeSet::new();

        for kind in ResourceKind::ALL {
            let dir = format!("{}/{}", self.prefix, kind.key_segment());
            let records = match self.store.list(&dir).await {
                Ok(records) => records,
                Err(e) => {
                    warn!("Cannot list {} resources: {}", kind, e);
                    catalog.failed_kinds.push(kind);
                    continue;
                }
            };

            for (key, value) in records {
                match decode(&key, &value).and_then(|record| derive_specs(kind, &record)) {
                    Ok(specs) => {
                        for spec in specs {
                            if seen.insert(spec.entity_id.clone()) {
                                catalog.specs.push(spec);
                            } else {
                                warn!("Duplicate entity {} in {}, ignoring", spec.entity_id, key);
                                catalog.skipped += 1;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Skipping {} record: {}", kind, e);
                        catalog.skipped += 1;
                    }
                }
            }
        }

        debug!(
            "Catalog built: {} entities, {} skipped, {} kinds unreadable",
            catalog.len(),
            catalog.skipped,
            catalog.failed_kinds.len()
        );
        catalog
    }
}

fn decode(key: &str, value: &[u8]) -> Result<ResourceRecord, CatalogError> {
    let mut record: ResourceRecord =
        serde_json::from_slice(value).map_err(|source| CatalogError::Decode {
            key: key.to_string(),
            source,
        })?;
    if record.id.is_empty() {
        record.id = key.rsplit('/').next().unwrap_or_default().to_string();
    }
    Ok(record)
}
