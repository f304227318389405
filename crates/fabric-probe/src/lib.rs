//! Fabric Probe: reachability backends
//!
//! Every backend implements [`Prober`] and answers with a
//! [`ProbeResult`]; failures of any kind (bad address, socket error,
//! missing namespace, hung tool) read as `reachable = false` and never
//! surface as errors.
//!
//! - **ICMP echo**: raw socket, optionally from inside a network namespace
//! - **Link state**: interface must be administratively and operationally up
//! - **Session state**: IPsec SA must be ESTABLISHED with an INSTALLED child
//!
//! [`ProbeSet`] dispatches a [`CheckSpec`] to the right backend by its
//! [`ProbeKind`](fabric_core_liveness::ProbeKind).

pub mod icmp;
pub mod link;
pub mod netns;
pub mod session;
pub mod set;

use async_trait::async_trait;
use fabric_core_liveness::{CheckSpec, ProbeResult};

pub use icmp::IcmpProber;
pub use link::LinkStateProber;
pub use session::SessionStateProber;
pub use set::ProbeSet;

/// A reachability check
#[async_trait]
pub trait Prober: Send + Sync {
    /// Probe the entity described by `spec`
    async fn probe(&self, spec: &CheckSpec) -> ProbeResult;
}
