//! Probe dispatch by [`ProbeKind`]

use crate::{IcmpProber, LinkStateProber, Prober, SessionStateProber};
use async_trait::async_trait;
use fabric_core_liveness::{CheckSpec, ProbeKind, ProbeResult};
use std::sync::Arc;

/// Routes each spec to the backend its probe kind names
#[derive(Clone)]
pub struct ProbeSet {
    icmp: Arc<dyn Prober>,
    link: Arc<dyn Prober>,
    session: Arc<dyn Prober>,
}

impl ProbeSet {
    /// Real backends: raw ICMP, SIOCGIFFLAGS, swanctl
    pub fn system() -> Self {
        Self::new(
            Arc::new(IcmpProber::new()),
            Arc::new(LinkStateProber::new()),
            Arc::new(SessionStateProber::new()),
        )
    }

    /// Dispatcher over explicit backends
    pub fn new(icmp: Arc<dyn Prober>, link: Arc<dyn Prober>, session: Arc<dyn Prober>) -> Self {
        Self {
            icmp,
            link,
            session,
        }
    }
}

#[async_trait]
impl Prober for ProbeSet {
    async fn probe(&self, spec: &CheckSpec) -> ProbeResult {
        match spec.probe {
            ProbeKind::IcmpInNamespace | ProbeKind::IcmpOutsideNamespace => {
                self.icmp.probe(spec).await
            }
            ProbeKind::LinkState => self.link.probe(spec).await,
            ProbeKind::SessionState => self.session.probe(spec).await,
            ProbeKind::None => ProbeResult::unreachable(&spec.entity_id),
        }
    }
}
