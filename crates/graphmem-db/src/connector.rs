use crate::protocol::{TxRequest, TxResponse, TxStatement};
use crate::{DbError, Record};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use graphmem_config::Config;
use serde_json::Value;
use std::fmt;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Transaction access mode, sent as the `Access-Mode` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

impl AccessMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessMode::Read => "READ",
            AccessMode::Write => "WRITE",
        }
    }
}

/// Query channel to the engine over its HTTP transactional endpoint.
///
/// Every statement runs in its own auto-commit transaction
/// (`POST /db/<database>/tx/commit`). The underlying agent pools keep-alive
/// connections; it is created by [`Connector::connect`] and released by
/// [`Connector::close`] or on drop. A connector is owned by one unit of work
/// and is not shared across threads.
pub struct Connector {
    endpoint: String,
    authorization: String,
    timeout: Duration,
    agent: Option<ureq::Agent>,
}

impl Connector {
    /// Unconnected connector for the configured engine.
    pub fn new(config: &Config) -> Self {
        Self::for_endpoint(
            &config.http_url(),
            &config.database,
            &config.user,
            &config.password,
            config.http_timeout,
        )
    }

    pub fn for_endpoint(
        base_url: &str,
        database: &str,
        user: &str,
        password: &str,
        timeout: Duration,
    ) -> Self {
        let credentials = STANDARD.encode(format!("{user}:{password}"));
        Self {
            endpoint: format!("{}/db/{database}/tx/commit", base_url.trim_end_matches('/')),
            authorization: format!("Basic {credentials}"),
            timeout,
            agent: None,
        }
    }

    /// Create and connect in one step; the connection is released on drop.
    pub fn open(config: &Config) -> Self {
        let mut conn = Self::new(config);
        conn.connect();
        conn
    }

    /// Run `f` with a freshly opened connector, closing it afterwards.
    pub fn with_connection<T>(config: &Config, f: impl FnOnce(&Connector) -> T) -> T {
        let conn = Self::open(config);
        f(&conn)
    }

    /// Set up the agent. Calling this on an open connector does nothing.
    pub fn connect(&mut self) {
        if self.agent.is_some() {
            return;
        }
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(self.timeout))
            .http_status_as_error(false)
            .build()
            .into();
        self.agent = Some(agent);
        debug!("connector opened for {}", self.endpoint);
    }

    pub fn is_connected(&self) -> bool {
        self.agent.is_some()
    }

    /// Release the agent and its pooled connections. Safe to call repeatedly
    /// or on a connector that was never connected.
    pub fn close(&mut self) {
        if self.agent.take().is_some() {
            debug!("connector closed for {}", self.endpoint);
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Run a read-only statement. `params` is a JSON object, or `Value::Null`
    /// for none.
    pub fn execute_query(&self, query: &str, params: &Value) -> Result<Vec<Record>, DbError> {
        self.execute(AccessMode::Read, query, params)
    }

    /// Run a statement in a write transaction.
    pub fn execute_write(&self, query: &str, params: &Value) -> Result<Vec<Record>, DbError> {
        self.execute(AccessMode::Write, query, params)
    }

    /// `RETURN 1 AS ok` round trip. Never fails; any problem reads as `false`.
    pub fn verify_connectivity(&self) -> bool {
        match self.execute_query("RETURN 1 AS ok", &Value::Null) {
            Ok(records) => records.first().and_then(|r| r.get_i64("ok")) == Some(1),
            Err(e) => {
                debug!("connectivity check failed: {e}");
                false
            }
        }
    }

    pub fn execute(
        &self,
        mode: AccessMode,
        query: &str,
        params: &Value,
    ) -> Result<Vec<Record>, DbError> {
        let agent = self.agent.as_ref().ok_or(DbError::NotConnected)?;
        let parameters = match params {
            Value::Object(map) if !map.is_empty() => Some(params.clone()),
            _ => None,
        };
        let request = TxRequest {
            statements: vec![TxStatement {
                statement: query.to_owned(),
                parameters,
            }],
        };
        let body = serde_json::to_vec(&request).map_err(|e| DbError::Decode(e.to_string()))?;
        trace!("{} {}: {query}", mode.as_str(), self.endpoint);

        let resp = agent
            .post(self.endpoint.as_str())
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("Authorization", &self.authorization)
            .header("Access-Mode", mode.as_str())
            .send(&body[..])
            .map_err(|e| self.transport(&e.to_string()))?;

        let status = resp.status().as_u16();
        let mut raw = Vec::new();
        resp.into_body()
            .into_reader()
            .read_to_end(&mut raw)
            .map_err(|e| self.transport(&e.to_string()))?;
        self.decode(query, status, &raw)
    }

    fn decode(&self, query: &str, status: u16, raw: &[u8]) -> Result<Vec<Record>, DbError> {
        let parsed: TxResponse = match serde_json::from_slice(raw) {
            Ok(parsed) => parsed,
            Err(_) if status >= 400 => return Err(self.transport(&format!("HTTP {status}"))),
            Err(e) => return Err(DbError::Decode(e.to_string())),
        };
        if let Some(err) = parsed.errors.into_iter().next() {
            return Err(DbError::Query {
                query: query.to_owned(),
                code: err.code,
                message: err.message,
            });
        }
        if status >= 400 {
            return Err(self.transport(&format!("HTTP {status}")));
        }
        let result = parsed
            .results
            .into_iter()
            .next()
            .ok_or_else(|| DbError::Decode("response carried no result set".to_owned()))?;
        let columns: Arc<[String]> = result.columns.into();
        Ok(result
            .data
            .into_iter()
            .map(|row| Record::new(Arc::clone(&columns), row.row))
            .collect())
    }

    fn transport(&self, message: &str) -> DbError {
        DbError::Transport {
            url: self.endpoint.clone(),
            message: message.to_owned(),
        }
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeNeo4j;
    use serde_json::json;

    fn open(server: &FakeNeo4j) -> Connector {
        let mut conn = Connector::for_endpoint(
            &server.url,
            "neo4j",
            FakeNeo4j::USER,
            FakeNeo4j::PASSWORD,
            Duration::from_secs(5),
        );
        conn.connect();
        conn
    }

    #[test]
    fn query_before_connect_is_rejected() {
        let conn = Connector::for_endpoint(
            "http://127.0.0.1:1",
            "neo4j",
            "neo4j",
            "pw",
            Duration::from_secs(1),
        );
        assert!(matches!(
            conn.execute_query("RETURN 1 AS ok", &Value::Null),
            Err(DbError::NotConnected)
        ));
        assert!(!conn.verify_connectivity());
    }

    #[test]
    fn connect_and_close_are_idempotent() {
        let server = FakeNeo4j::start();
        let mut conn = open(&server);
        conn.connect();
        assert!(conn.is_connected());
        assert!(conn.verify_connectivity());
        conn.close();
        conn.close();
        assert!(!conn.is_connected());
        assert!(!conn.verify_connectivity());
    }

    #[test]
    fn write_then_read_with_parameters() {
        let server = FakeNeo4j::start();
        let conn = open(&server);
        conn.execute_write(
            "CREATE (m:Memory {id: $id, content: $content})",
            &json!({"id": "m-1", "content": "remember this"}),
        )
        .unwrap();
        let rows = conn
            .execute_query(
                "MATCH (m:Memory {id: $id}) RETURN m.content AS content",
                &json!({"id": "m-1"}),
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_str("content"), Some("remember this"));
    }

    #[test]
    fn read_mode_refuses_writes() {
        let server = FakeNeo4j::start();
        let conn = open(&server);
        let err = conn
            .execute_query(
                "CREATE (m:Memory {id: $id, content: $content})",
                &json!({"id": "m-2", "content": "x"}),
            )
            .unwrap_err();
        assert_eq!(err.code(), Some("Neo.ClientError.Statement.AccessMode"));
    }

    #[test]
    fn malformed_query_reports_engine_message() {
        let server = FakeNeo4j::start();
        let conn = open(&server);
        let err = conn
            .execute_query("RETURN ok FROM nowhere", &Value::Null)
            .unwrap_err();
        match err {
            DbError::Query {
                query,
                code,
                message,
            } => {
                assert_eq!(query, "RETURN ok FROM nowhere");
                assert_eq!(code, "Neo.ClientError.Statement.SyntaxError");
                assert!(!message.is_empty());
            }
            other => panic!("expected query error, got {other:?}"),
        }
    }

    #[test]
    fn wrong_password_is_a_query_error() {
        let server = FakeNeo4j::start();
        let mut conn = Connector::for_endpoint(
            &server.url,
            "neo4j",
            FakeNeo4j::USER,
            "wrong",
            Duration::from_secs(5),
        );
        conn.connect();
        let err = conn
            .execute_query("RETURN 1 AS ok", &Value::Null)
            .unwrap_err();
        assert_eq!(err.code(), Some("Neo.ClientError.Security.Unauthorized"));
        assert!(!conn.verify_connectivity());
    }

    #[test]
    fn unavailable_engine_is_transport_error() {
        let server = FakeNeo4j::start();
        let conn = open(&server);
        server.set_available(false);
        let err = conn
            .execute_query("RETURN 1 AS ok", &Value::Null)
            .unwrap_err();
        assert!(err.is_unavailable());
        assert!(!conn.verify_connectivity());
        server.set_available(true);
        assert!(conn.verify_connectivity());
    }

    #[test]
    fn connection_refused_is_transport_error() {
        let mut conn = Connector::for_endpoint(
            "http://127.0.0.1:1",
            "neo4j",
            "neo4j",
            "pw",
            Duration::from_secs(1),
        );
        conn.connect();
        let err = conn
            .execute_query("RETURN 1 AS ok", &Value::Null)
            .unwrap_err();
        assert!(matches!(err, DbError::Transport { .. }));
    }

    #[test]
    fn with_connection_uses_config() {
        let server = FakeNeo4j::start();
        let dir = tempfile::tempdir().unwrap();
        let config = server.config(dir.path());
        let ok = Connector::with_connection(&config, Connector::verify_connectivity);
        assert!(ok);
    }

    #[test]
    fn debug_hides_credentials() {
        let conn = Connector::for_endpoint(
            "http://localhost:7474/",
            "neo4j",
            "neo4j",
            "hunter2",
            Duration::from_secs(1),
        );
        let shown = format!("{conn:?}");
        assert!(shown.contains("http://localhost:7474/db/neo4j/tx/commit"));
        assert!(!shown.contains("Basic"));
    }
}
