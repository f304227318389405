/*!
 * Fabric Agent - per-node liveness and failover
 *
 * Process-level wiring for the fabric liveness engine:
 * - TOML configuration with validated defaults
 * - Structured logging (compact stdout or JSON file)
 * - `health` loop: resource liveness reported to the controller
 * - `discover` loop: controller replica election published as a name override
 */

pub mod config;
pub mod daemon;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use config::{AgentConfig, DiscoverSection, LogLevel};
pub use error::{AgentError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
