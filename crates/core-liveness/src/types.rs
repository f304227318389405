//! Data model shared by every liveness population

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Consecutive unreachable probes required before an entity is declared DOWN
pub const DOWN_THRESHOLD: u32 = 3;

/// Ticks a selected candidate may hold its election before re-election is forced
pub const HOLD_TICKS_CAP: u32 = 240;

/// ICMP echo reply timeout in milliseconds
pub const ICMP_TIMEOUT_MS: u64 = 1000;

/// Suffix of the synthesized entity tracking an IPsec security association
pub const IPSEC_SA_SUFFIX: &str = "/ipsecSa";

/// Debounced liveness status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    /// Never probed, or restored without a known state
    #[default]
    Unknown,
    /// Reachable
    Up,
    /// Failed `DOWN_THRESHOLD` consecutive probes, or aged out
    Down,
}

impl Status {
    /// String representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Unknown => "UNKNOWN",
            Status::Up => "UP",
            Status::Down => "DOWN",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of network object an entity represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectCategory {
    /// Physical port
    Port,
    /// Logical link (GRE, VXLAN, IPsec VPN link)
    LogicalLink,
    /// Inter-tenant connection
    Connection,
    /// Inter-PoP tunnel
    Tunnel,
    /// IPsec security association
    IpsecSession,
    /// NAT gateway
    NatGateway,
    /// Candidate controller replica (discover loop only, never reported)
    Controller,
}

impl ObjectCategory {
    /// Path segment of the controller status endpoint for this category
    pub fn path_segment(&self) -> &'static str {
        match self {
            ObjectCategory::Port => "ports",
            ObjectCategory::LogicalLink => "links",
            ObjectCategory::Connection => "connections",
            ObjectCategory::Tunnel => "tunnels",
            ObjectCategory::IpsecSession => "ipsec",
            ObjectCategory::NatGateway => "nat-gateways",
            ObjectCategory::Controller => "controllers",
        }
    }

    /// Word the controller expects for `status` in this category's reports
    ///
    /// IPsec sessions use the IKE vocabulary, everything else plain UP/DOWN.
    pub fn report_word(&self, status: Status) -> &'static str {
        match (self, status) {
            (ObjectCategory::IpsecSession, Status::Up) => "Established",
            (ObjectCategory::IpsecSession, Status::Down) => "Idle",
            (ObjectCategory::IpsecSession, Status::Unknown) => "Unknown",
            (_, status) => status.as_str(),
        }
    }
}

impl fmt::Display for ObjectCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_segment())
    }
}

/// Which probe backend checks an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeKind {
    /// Not probed; always reads as unreachable
    #[default]
    None,
    /// ICMP echo sent from inside the entity's network namespace
    IcmpInNamespace,
    /// ICMP echo sent from the default namespace
    IcmpOutsideNamespace,
    /// Interface administrative + operational state
    LinkState,
    /// IPsec SA listing
    SessionState,
}

/// What to probe for one entity during one tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSpec {
    /// Unique key of the entity
    pub entity_id: String,

    /// Object category (drives the report endpoint and vocabulary)
    pub category: ObjectCategory,

    /// Probe backend
    pub probe: ProbeKind,

    /// Network namespace, empty for the default namespace
    #[serde(default)]
    pub namespace: String,

    /// Peer address, interface name or SA name depending on `probe`
    #[serde(default)]
    pub target: String,

    /// Local bind address
    #[serde(default)]
    pub source: String,
}

impl CheckSpec {
    /// Create a spec with empty namespace, target and source
    pub fn new(entity_id: impl Into<String>, category: ObjectCategory, probe: ProbeKind) -> Self {
        Self {
            entity_id: entity_id.into(),
            category,
            probe,
            namespace: String::new(),
            target: String::new(),
            source: String::new(),
        }
    }

    /// Network namespace to probe in
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Address or name the probe checks
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    /// Local address the probe is sent from
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Namespace to switch into, `None` for the default namespace
    pub fn namespace(&self) -> Option<&str> {
        if self.namespace.is_empty() {
            None
        } else {
            Some(&self.namespace)
        }
    }

    /// Id of the underlying resource, without the IPsec SA suffix
    pub fn resource_id(&self) -> &str {
        self.entity_id
            .strip_suffix(IPSEC_SA_SUFFIX)
            .unwrap_or(&self.entity_id)
    }
}

/// Outcome of a single probe
///
/// Probes never fail: every error a backend hits is folded into
/// `reachable = false`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub entity_id: String,
    pub reachable: bool,
    pub latency_ms: f64,
    pub observed_at: DateTime<Utc>,
}

impl ProbeResult {
    /// A successful probe
    pub fn reachable(entity_id: impl Into<String>, latency_ms: f64) -> Self {
        Self {
            entity_id: entity_id.into(),
            reachable: true,
            latency_ms,
            observed_at: Utc::now(),
        }
    }

    /// A failed probe
    pub fn unreachable(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            reachable: false,
            latency_ms: 0.0,
            observed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_vocabulary() {
        assert_eq!(ObjectCategory::Port.report_word(Status::Up), "UP");
        assert_eq!(ObjectCategory::Tunnel.report_word(Status::Down), "DOWN");
        assert_eq!(
            ObjectCategory::IpsecSession.report_word(Status::Up),
            "Established"
        );
        assert_eq!(ObjectCategory::IpsecSession.report_word(Status::Down), "Idle");
    }

    #[test]
    fn test_resource_id_strips_sa_suffix() {
        let sa = CheckSpec::new(
            format!("vpn-7{}", IPSEC_SA_SUFFIX),
            ObjectCategory::IpsecSession,
            ProbeKind::SessionState,
        );
        assert_eq!(sa.resource_id(), "vpn-7");

        let link = CheckSpec::new("vpn-7", ObjectCategory::LogicalLink, ProbeKind::LinkState);
        assert_eq!(link.resource_id(), "vpn-7");
    }

    #[test]
    fn test_empty_namespace_is_default() {
        let spec = CheckSpec::new("p1", ObjectCategory::Port, ProbeKind::LinkState);
        assert_eq!(spec.namespace(), None);
        assert_eq!(spec.with_namespace("tenant-a").namespace(), Some("tenant-a"));
    }

    #[test]
    fn test_spec_wire_names() {
        let spec = CheckSpec::new("t1", ObjectCategory::NatGateway, ProbeKind::IcmpInNamespace);
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["category"], "nat-gateway");
        assert_eq!(json["probe"], "icmp-in-namespace");
        assert_eq!(serde_json::to_value(Status::Up).unwrap(), "UP");
    }
}
