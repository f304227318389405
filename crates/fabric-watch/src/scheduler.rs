//! Per-tick probe fan-out / fan-in
//!
//! One task per spec, every task sends its result by value into a single
//! channel, and the caller waits for exactly one result per spec. There is
//! no worker pool; each backend's own timeout bounds the barrier.

use fabric_core_liveness::{CheckSpec, ProbeResult};
use fabric_probe::Prober;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Probe every spec concurrently and collect the results
///
/// A task that dies before sending (panicking backend) closes its sender;
/// once every sender is gone the barrier gives up, so the returned vector
/// may be shorter than `specs`.
pub async fn fan_out(prober: Arc<dyn Prober>, specs: Vec<CheckSpec>) -> Vec<ProbeResult> {
    let expected = specs.len();
    let mut results = Vec::with_capacity(expected);
    if expected == 0 {
        return results;
    }

    let (tx, mut rx) = mpsc::channel(expected);
    for spec in specs {
        let tx = tx.clone();
        let prober = prober.clone();
        tokio::spawn(async move {
            let result = prober.probe(&spec).await;
            // The receiver only goes away when the tick itself is gone
            let _ = tx.send(result).await;
        });
    }
    drop(tx);

    while results.len() < expected {
        match rx.recv().await {
            Some(result) => results.push(result),
            None => {
                warn!(
                    "Probe fan-in closed early: {} of {} results",
                    results.len(),
                    expected
                );
                break;
            }
        }
    }
    results
}
