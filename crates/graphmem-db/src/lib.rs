//! Connection and schema layer for the graphmem Neo4j engine.
//!
//! [`Connector`] speaks Neo4j's HTTP transactional endpoint over a pooled
//! `ureq` agent; [`SchemaManager`] applies and verifies the constraint, index
//! and seed scripts. With the `test-server` feature, [`testing::FakeNeo4j`]
//! provides an in-process stand-in for the engine.

pub mod connector;
mod protocol;
pub mod record;
pub mod schema;
#[cfg(feature = "test-server")]
pub mod testing;

pub use connector::{AccessMode, Connector};
pub use record::Record;
pub use schema::{
    split_statements, SchemaManager, SchemaScripts, SchemaStatus, SchemaVerification, ScriptKind,
    CONSTRAINTS, INDEXES, SEED_AGENT_TYPES,
};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not connected: call connect() before running queries")]
    NotConnected,
    #[error("query failed [{code}]: {message}\n  query: {query}")]
    Query {
        query: String,
        code: String,
        message: String,
    },
    #[error("cannot reach {url}: {message}")]
    Transport { url: String, message: String },
    #[error("unexpected response from engine: {0}")]
    Decode(String),
    #[error("schema script {}: {source}", path.display())]
    Script {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DbError {
    /// Engine-reported status code, for query failures.
    pub fn code(&self) -> Option<&str> {
        match self {
            DbError::Query { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }

    /// True when a schema statement failed only because the item is already
    /// present. Decided by status code alone; data errors such as uniqueness
    /// violations also say "already exists" in their message.
    pub fn is_already_exists(&self) -> bool {
        self.code().is_some_and(|code| {
            code.strip_prefix("Neo.ClientError.Schema.")
                .is_some_and(|kind| kind.ends_with("AlreadyExists"))
        })
    }

    /// True for failures that mean the engine could not be reached at all.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, DbError::Transport { .. })
    }
}
