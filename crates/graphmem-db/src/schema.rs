//! Schema scripts and the manager that applies and verifies them.
//!
//! Scripts come in three files applied in order: constraints, indexes, then
//! seed data. Statements are separated by `;` and `//` starts a comment
//! running to the end of the line; neither counts inside quotes. Every statement is written to be re-runnable
//! (`IF NOT EXISTS`, `MERGE`); a failure that only says the item already
//! exists is treated as success so older scripts without those guards still
//! converge.

use crate::{Connector, DbError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use tracing::{debug, error, info, warn};

pub const CONSTRAINTS: [&str; 3] = ["agent_type_id", "project_id", "memory_id"];
pub const INDEXES: [&str; 3] = ["memory_type", "memory_created_at", "agent_type_name"];
pub const SEED_AGENT_TYPES: [&str; 5] = ["architect", "builder", "reviewer", "tester", "optimizer"];

const SHOW_CONSTRAINTS: &str = "SHOW CONSTRAINTS YIELD name RETURN name";
const SHOW_INDEXES: &str = "SHOW INDEXES YIELD name RETURN name";
const COUNT_AGENT_TYPES: &str = "MATCH (a:AgentType) RETURN count(a) AS count";
const COUNT_BY_LABEL: &str =
    "MATCH (n) RETURN labels(n)[0] AS label, count(n) AS count ORDER BY label";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptKind {
    Constraints,
    Indexes,
    Seed,
}

impl ScriptKind {
    pub const ALL: [ScriptKind; 3] = [ScriptKind::Constraints, ScriptKind::Indexes, ScriptKind::Seed];

    pub fn file_name(self) -> &'static str {
        match self {
            ScriptKind::Constraints => "01_constraints.cypher",
            ScriptKind::Indexes => "02_indexes.cypher",
            ScriptKind::Seed => "03_seed_agent_types.cypher",
        }
    }

    fn builtin(self) -> &'static str {
        match self {
            ScriptKind::Constraints => include_str!("../schema/01_constraints.cypher"),
            ScriptKind::Indexes => include_str!("../schema/02_indexes.cypher"),
            ScriptKind::Seed => include_str!("../schema/03_seed_agent_types.cypher"),
        }
    }
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScriptKind::Constraints => "constraints",
            ScriptKind::Indexes => "indexes",
            ScriptKind::Seed => "seed",
        };
        f.write_str(s)
    }
}

/// Split a script into statements, dropping `//` comments and blanks.
/// A `;` or `//` inside a string literal or backtick identifier is text.
pub fn split_statements(source: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            current.push(c);
            if c == '\\' && q != '`' {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => {
                quote = Some(c);
                current.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                current.truncate(current.trim_end_matches([' ', '\t']).len());
                if chars.by_ref().any(|skipped| skipped == '\n') {
                    current.push('\n');
                }
            }
            ';' => push_statement(&mut statements, &mut current),
            _ => current.push(c),
        }
    }
    push_statement(&mut statements, &mut current);
    statements
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let stmt = current.trim();
    if !stmt.is_empty() {
        statements.push(stmt.to_owned());
    }
    current.clear();
}

/// The ordered statements of the three schema scripts.
#[derive(Debug, Clone)]
pub struct SchemaScripts {
    scripts: Vec<(ScriptKind, Vec<String>)>,
}

impl SchemaScripts {
    /// Scripts compiled into this crate.
    pub fn builtin() -> Self {
        Self {
            scripts: ScriptKind::ALL
                .iter()
                .map(|&kind| (kind, split_statements(kind.builtin())))
                .collect(),
        }
    }

    /// Read the three script files from `dir`. Every file must exist.
    pub fn load_dir(dir: &Path) -> Result<Self, DbError> {
        let mut scripts = Vec::with_capacity(ScriptKind::ALL.len());
        for kind in ScriptKind::ALL {
            let path = dir.join(kind.file_name());
            let source = std::fs::read_to_string(&path)
                .map_err(|source| DbError::Script { path, source })?;
            scripts.push((kind, split_statements(&source)));
        }
        Ok(Self { scripts })
    }

    /// Write the built-in scripts into `dir` for the engine's read-only
    /// `/schema` mount, creating it if needed. Existing files are left alone
    /// so local edits survive. Returns how many files were written.
    pub fn install_builtin(dir: &Path) -> Result<usize, DbError> {
        let script_error = |path: &Path, source: std::io::Error| DbError::Script {
            path: path.to_path_buf(),
            source,
        };
        std::fs::create_dir_all(dir).map_err(|e| script_error(dir, e))?;
        let mut written = 0;
        for kind in ScriptKind::ALL {
            let path = dir.join(kind.file_name());
            if path.exists() {
                continue;
            }
            std::fs::write(&path, kind.builtin()).map_err(|e| script_error(&path, e))?;
            written += 1;
        }
        Ok(written)
    }

    pub fn statements(&self) -> impl Iterator<Item = (ScriptKind, &str)> + '_ {
        self.scripts
            .iter()
            .flat_map(|(kind, stmts)| stmts.iter().map(move |s| (*kind, s.as_str())))
    }

    pub fn len(&self) -> usize {
        self.scripts.iter().map(|(_, s)| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SchemaScripts {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Result of comparing the live schema with the expected one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaVerification {
    pub missing_constraints: Vec<String>,
    pub missing_indexes: Vec<String>,
    pub agent_types: u64,
    pub expected_agent_types: u64,
}

impl SchemaVerification {
    pub fn is_complete(&self) -> bool {
        self.missing_constraints.is_empty()
            && self.missing_indexes.is_empty()
            && self.agent_types >= self.expected_agent_types
    }
}

/// Snapshot of the live schema for operators.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaStatus {
    pub constraints: Vec<String>,
    pub indexes: Vec<String>,
    pub node_counts: BTreeMap<String, u64>,
    pub generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct SchemaManager<'a> {
    conn: &'a Connector,
    scripts: SchemaScripts,
}

impl<'a> SchemaManager<'a> {
    pub fn new(conn: &'a Connector) -> Self {
        Self::with_scripts(conn, SchemaScripts::builtin())
    }

    pub fn with_scripts(conn: &'a Connector, scripts: SchemaScripts) -> Self {
        Self { conn, scripts }
    }

    /// Apply every statement. Returns `false` if any statement failed for a
    /// reason other than the item already existing; later statements still
    /// run.
    pub fn initialize_schema(&self) -> bool {
        let mut applied = 0usize;
        let mut present = 0usize;
        let mut failed = 0usize;
        for (kind, stmt) in self.scripts.statements() {
            match self.conn.execute_write(stmt, &Value::Null) {
                Ok(_) => applied += 1,
                Err(e) if e.is_already_exists() => {
                    debug!("{kind}: already present: {e}");
                    present += 1;
                }
                Err(e) => {
                    error!("{kind}: {e}");
                    failed += 1;
                }
            }
        }
        if failed == 0 {
            info!("schema initialized ({applied} applied, {present} already present)");
            true
        } else {
            warn!("schema initialization incomplete: {failed} statement(s) failed");
            false
        }
    }

    /// Compare the live schema against the expected constraints, indexes and
    /// seed count.
    pub fn verify(&self) -> Result<SchemaVerification, DbError> {
        let constraints = self.names(SHOW_CONSTRAINTS)?;
        let indexes = self.names(SHOW_INDEXES)?;
        let agent_types = self
            .conn
            .execute_query(COUNT_AGENT_TYPES, &Value::Null)?
            .first()
            .and_then(|r| r.get_i64("count"))
            .unwrap_or(0);
        Ok(SchemaVerification {
            missing_constraints: missing(&CONSTRAINTS, &constraints),
            missing_indexes: missing(&INDEXES, &indexes),
            agent_types: u64::try_from(agent_types).unwrap_or(0),
            expected_agent_types: SEED_AGENT_TYPES.len() as u64,
        })
    }

    /// `true` when every expected item exists. Logs each missing one.
    pub fn verify_schema(&self) -> bool {
        match self.verify() {
            Ok(v) => {
                for name in &v.missing_constraints {
                    warn!("missing constraint: {name}");
                }
                for name in &v.missing_indexes {
                    warn!("missing index: {name}");
                }
                if v.agent_types < v.expected_agent_types {
                    warn!(
                        "expected {} agent types, found {}",
                        v.expected_agent_types, v.agent_types
                    );
                }
                v.is_complete()
            }
            Err(e) => {
                error!("schema verification failed: {e}");
                false
            }
        }
    }

    /// Constraints, indexes and node counts. Never fails; on error the
    /// `error` field is set and the remaining fields may be partial.
    pub fn schema_status(&self) -> SchemaStatus {
        let mut status = SchemaStatus {
            constraints: Vec::new(),
            indexes: Vec::new(),
            node_counts: BTreeMap::new(),
            generated_at: Utc::now(),
            error: None,
        };
        if let Err(e) = self.fill_status(&mut status) {
            warn!("schema status incomplete: {e}");
            status.error = Some(e.to_string());
        }
        status
    }

    fn fill_status(&self, status: &mut SchemaStatus) -> Result<(), DbError> {
        status.constraints = self.names(SHOW_CONSTRAINTS)?.into_iter().collect();
        status.indexes = self.names(SHOW_INDEXES)?.into_iter().collect();
        for record in self.conn.execute_query(COUNT_BY_LABEL, &Value::Null)? {
            if let (Some(label), Some(count)) = (record.get_str("label"), record.get_i64("count")) {
                status
                    .node_counts
                    .insert(label.to_owned(), u64::try_from(count).unwrap_or(0));
            }
        }
        Ok(())
    }

    fn names(&self, query: &str) -> Result<BTreeSet<String>, DbError> {
        Ok(self
            .conn
            .execute_query(query, &Value::Null)?
            .iter()
            .filter_map(|r| r.get_str("name").map(str::to_owned))
            .collect())
    }
}

fn missing(expected: &[&str], present: &BTreeSet<String>) -> Vec<String> {
    expected
        .iter()
        .filter(|name| !present.contains(**name))
        .map(|name| (*name).to_owned())
        .collect()
}
