//! IPsec session-state prober
//!
//! Lists the IKE SA named by the spec target with `swanctl --list-sas` (run
//! through `ip netns exec` for namespaced tenants) and reports reachable only
//! when the IKE SA is ESTABLISHED and at least one of its child SAs is
//! INSTALLED.

use crate::Prober;
use async_trait::async_trait;
use fabric_core_liveness::{CheckSpec, ProbeResult};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

/// Upper bound for one `swanctl` invocation
pub const SESSION_LIST_TIMEOUT: Duration = Duration::from_secs(5);

/// strongSwan SA listing backend
#[derive(Debug, Clone)]
pub struct SessionStateProber {
    program: String,
    timeout: Duration,
}

impl SessionStateProber {
    /// Prober that runs `swanctl` from `PATH`
    pub fn new() -> Self {
        Self::with_program("swanctl")
    }

    /// Use a different listing binary (same arguments and output format)
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            timeout: SESSION_LIST_TIMEOUT,
        }
    }

    fn command(&self, spec: &CheckSpec) -> Command {
        let mut command = match spec.namespace() {
            Some(namespace) => {
                let mut command = Command::new("ip");
                command.args(["netns", "exec", namespace, self.program.as_str()]);
                command
            }
            None => Command::new(&self.program),
        };
        command
            .args(["--list-sas", "--ike", spec.target.as_str()])
            .kill_on_drop(true);
        command
    }
}

impl Default for SessionStateProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Prober for SessionStateProber {
    async fn probe(&self, spec: &CheckSpec) -> ProbeResult {
        let started = Instant::now();
        let listing = tokio::time::timeout(self.timeout, self.command(spec).output());
        let output = match listing.await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                debug!("{}: cannot run {}: {}", spec.entity_id, self.program, e);
                return ProbeResult::unreachable(&spec.entity_id);
            }
            Err(_) => {
                debug!("{}: {} timed out", spec.entity_id, self.program);
                return ProbeResult::unreachable(&spec.entity_id);
            }
        };

        let listing = String::from_utf8_lossy(&output.stdout);
        if session_established(&listing, &spec.target) {
            ProbeResult::reachable(&spec.entity_id, started.elapsed().as_secs_f64() * 1000.0)
        } else {
            debug!("{}: SA {} not established", spec.entity_id, spec.target);
            ProbeResult::unreachable(&spec.entity_id)
        }
    }
}

/// Whether `listing` shows IKE SA `name` ESTABLISHED with an INSTALLED child
///
/// IKE SA headers start in column 0 (`name: #3, ESTABLISHED, IKEv2, ...`);
/// child SAs are indented below their parent
/// (`  child: #5, reqid 1, INSTALLED, TUNNEL, ...`).
pub fn session_established(listing: &str, name: &str) -> bool {
    if name.is_empty() {
        return false;
    }

    let mut established = false;
    for line in listing.lines() {
        if line.trim().is_empty() {
            continue;
        }

        if !line.starts_with(char::is_whitespace) {
            established = line
                .strip_prefix(name)
                .and_then(|rest| rest.strip_prefix(':'))
                .map(|rest| has_state(rest, "ESTABLISHED"))
                .unwrap_or(false);
            continue;
        }

        let child = line.trim_start();
        if established && child.contains(", reqid ") && has_state(child, "INSTALLED") {
            return true;
        }
    }
    false
}

fn has_state(header: &str, state: &str) -> bool {
    header.split(',').any(|field| field.trim() == state)
}
