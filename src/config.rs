/*!
 * Configuration types for the fabric agent
 *
 * ```toml
 * node_id = "pop-1"
 * controller_url = "http://controller.fabric:8080"
 * store_root = "/var/lib/fabric/store"
 *
 * [discover]
 * candidates_key = "fabric/controllers"
 * candidates = ["10.0.0.1", "10.0.0.2"]
 * source_address = "10.0.0.100"
 * ```
 *
 * Tick intervals, thresholds and the hold cap are not configurable.
 */

use crate::error::{AgentError, Result};
use clap::ValueEnum;
use fabric_watch::DiscoveryConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration file read when `--config` is not given
pub const DEFAULT_CONFIG_PATH: &str = "/etc/fabric/agent.toml";

/// Agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// This node's id; selects `fabric/<node_id>/...` in the store
    pub node_id: String,

    /// Root directory of the file-backed configuration/status store
    #[serde(default = "default_store_root")]
    pub store_root: PathBuf,

    /// Store key of the status snapshot (default: `status/<node_id>`)
    #[serde(default)]
    pub snapshot_key: Option<String>,

    /// Controller base URL for status reports
    #[serde(default)]
    pub controller_url: String,

    /// Upper bound for one status report round trip
    #[serde(default = "default_report_timeout_secs")]
    pub report_timeout_secs: u64,

    #[serde(default)]
    pub discover: DiscoverSection,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

/// `[discover]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverSection {
    /// Store key holding a JSON array of candidate addresses
    #[serde(default)]
    pub candidates_key: Option<String>,

    /// Candidates used when the key is unset or missing, most preferred first
    #[serde(default)]
    pub candidates: Vec<String>,

    /// Local address ICMP probes are sent from
    #[serde(default)]
    pub source_address: String,

    /// Name the elected controller is published under
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Hosts-format override file
    #[serde(default = "default_hosts_file")]
    pub hosts_file: PathBuf,
}

impl Default for DiscoverSection {
    fn default() -> Self {
        Self {
            candidates_key: None,
            candidates: Vec::new(),
            source_address: String::new(),
            hostname: default_hostname(),
            hosts_file: default_hosts_file(),
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

fn default_store_root() -> PathBuf {
    PathBuf::from("/var/lib/fabric/store")
}

fn default_report_timeout_secs() -> u64 {
    5
}

fn default_hostname() -> String {
    "controller.fabric".to_string()
}

fn default_hosts_file() -> PathBuf {
    PathBuf::from("/etc/fabric/hosts")
}

impl AgentConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| AgentError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| AgentError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Settings every loop needs
    pub fn validate(&self) -> Result<()> {
        if self.node_id.trim().is_empty() {
            return Err(AgentError::Config("node_id must not be empty".to_string()));
        }

        if self.node_id.contains('/') {
            return Err(AgentError::Config(format!(
                "node_id must not contain '/': {}",
                self.node_id
            )));
        }

        Ok(())
    }

    /// Settings the health loop needs
    pub fn validate_health(&self) -> Result<()> {
        self.validate()?;

        if !(self.controller_url.starts_with("http://")
            || self.controller_url.starts_with("https://"))
        {
            return Err(AgentError::Config(format!(
                "controller_url must be an http(s) URL, got {:?}",
                self.controller_url
            )));
        }

        if self.report_timeout_secs == 0 {
            return Err(AgentError::Config(
                "report_timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Settings the discover loop needs
    pub fn validate_discover(&self) -> Result<()> {
        self.validate()?;

        if self.discover.hostname.trim().is_empty() {
            return Err(AgentError::Config(
                "discover.hostname must not be empty".to_string(),
            ));
        }

        if self.discover.candidates_key.is_none() && self.discover.candidates.is_empty() {
            return Err(AgentError::Config(
                "discover needs candidates_key or a static candidates list".to_string(),
            ));
        }

        Ok(())
    }

    /// Store prefix of this node's resource records
    pub fn catalog_prefix(&self) -> String {
        format!("fabric/{}", self.node_id)
    }

    /// Store key of this node's status snapshot
    pub fn snapshot_key(&self) -> String {
        self.snapshot_key
            .clone()
            .unwrap_or_else(|| format!("status/{}", self.node_id))
    }

    /// Per-request bound for controller reports
    pub fn report_timeout(&self) -> Duration {
        Duration::from_secs(self.report_timeout_secs)
    }

    /// Settings handed to the discovery loop
    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            hostname: self.discover.hostname.clone(),
            candidates_key: self.discover.candidates_key.clone(),
            static_candidates: self.discover.candidates.clone(),
            source_address: self.discover.source_address.clone(),
        }
    }
}
