/*!
 * Error types for the fabric agent
 */

use fabric_watch::ReportError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

/// Boot-time failures; everything after boot is logged and retried instead
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("cannot read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("logging setup failed: {0}")]
    Logging(String),

    #[error("cannot create controller client: {0}")]
    Reporter(#[from] ReportError),
}
