//! Configuration for the graphmem Neo4j engine.
//!
//! Settings come from environment variables, then an optional
//! `.graphmem/config.toml` in the project root, then built-in defaults. The
//! result is an immutable [`Config`] value that callers construct once and pass
//! down explicitly.

pub mod env;
pub mod file;
pub mod project;
pub mod resolver;

pub use env::EnvVars;
pub use graphmem_runtime::ComposeTool;
pub use file::{FileConfig, Neo4jSection};
pub use project::{find_project_root, DEFAULT_COMPOSE_FILE, DEFAULT_SCHEMA_DIR, PROJECT_MARKERS};
pub use resolver::{parse_duration, Config, ConfigResolver, MAX_DURATION};

use std::path::PathBuf;
use thiserror::Error;

pub const PASSWORD_VAR: &str = "NEO4J_PASSWORD";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} is not set: {remediation}")]
    MissingVariable {
        name: &'static str,
        remediation: String,
    },
    #[error("invalid value '{value}' for {name}: {reason}")]
    InvalidValue {
        name: String,
        value: String,
        reason: String,
    },
    #[error("NEO4J_BOLT_PORT and NEO4J_HTTP_PORT must differ (both are {port})")]
    PortConflict { port: u16 },
    #[error(
        "no Docker Compose found: install the compose plugin (check with `docker compose version`) or the standalone `docker-compose`"
    )]
    NoComposeTool,
    #[error("config file {}: {message}", path.display())]
    File { path: PathBuf, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(name: &str, value: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            name: name.to_owned(),
            value: value.to_owned(),
            reason: reason.into(),
        }
    }

    /// The setting this error is about, if it concerns a single one.
    pub fn setting(&self) -> Option<&str> {
        match self {
            ConfigError::MissingVariable { name, .. } => Some(*name),
            ConfigError::InvalidValue { name, .. } => Some(name.as_str()),
            _ => None,
        }
    }
}
