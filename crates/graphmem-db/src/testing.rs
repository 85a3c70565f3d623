//! In-process stand-in for a Neo4j HTTP endpoint.
//!
//! [`FakeNeo4j`] binds `127.0.0.1:0` and answers the statements this
//! workspace issues: connectivity checks, constraint and index DDL, the
//! `SHOW` listings, seed `MERGE`s, label counts and simple keyed node
//! creation and lookup. Anything else is answered with a syntax error. State
//! survives [`FakeNeo4j::set_available`] toggles, so a "stopped" engine comes
//! back with its data. Drop the server to stop it.

use crate::protocol::{TxError, TxRequest, TxResponse, TxResult, TxRow, TxStatement};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use graphmem_config::{ComposeTool, Config};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tiny_http::{Header, Method, Response, Server, StatusCode};
use tracing::debug;

#[derive(Debug, Clone)]
struct Node {
    label: String,
    props: Map<String, Value>,
}

#[derive(Debug)]
struct SchemaRule {
    label: String,
    property: String,
}

#[derive(Debug)]
struct State {
    available: bool,
    constraints: BTreeMap<String, SchemaRule>,
    indexes: BTreeMap<String, SchemaRule>,
    nodes: Vec<Node>,
    statements: Vec<String>,
    requests: usize,
}

type Outcome = Result<TxResult, TxError>;

pub struct FakeNeo4j {
    pub url: String,
    pub port: u16,
    state: Arc<Mutex<State>>,
    server: Arc<Server>,
    handle: Option<JoinHandle<()>>,
}

impl FakeNeo4j {
    pub const USER: &'static str = "neo4j";
    pub const PASSWORD: &'static str = "fake-password";
    pub const DATABASE: &'static str = "neo4j";

    pub fn start() -> Self {
        let server =
            Arc::new(Server::http("127.0.0.1:0").expect("failed to bind fake Neo4j server"));
        let port = server
            .server_addr()
            .to_ip()
            .expect("fake Neo4j server bound to a non-IP address")
            .port();
        let state = Arc::new(Mutex::new(State {
            available: true,
            constraints: BTreeMap::new(),
            indexes: BTreeMap::new(),
            nodes: Vec::new(),
            statements: Vec::new(),
            requests: 0,
        }));

        let srv = Arc::clone(&server);
        let shared = Arc::clone(&state);
        let handle = std::thread::Builder::new()
            .name("fake-neo4j".to_owned())
            .spawn(move || {
                for request in srv.incoming_requests() {
                    handle_request(&shared, request);
                }
            })
            .expect("failed to spawn fake Neo4j thread");

        Self {
            url: format!("http://127.0.0.1:{port}"),
            port,
            state,
            server,
            handle: Some(handle),
        }
    }

    /// A config pointing at this server. `project_root` anchors the compose
    /// file path; nothing is validated.
    pub fn config(&self, project_root: &Path) -> Config {
        Config {
            uri: "bolt://127.0.0.1:17687".to_owned(),
            host: "127.0.0.1".to_owned(),
            user: Self::USER.to_owned(),
            password: Self::PASSWORD.to_owned(),
            bolt_port: 17687,
            http_port: self.port,
            database: Self::DATABASE.to_owned(),
            container_name: "graphmem-neo4j".to_owned(),
            image: "neo4j:5.15-community".to_owned(),
            compose_file: project_root.join("docker/docker-compose.neo4j.yml"),
            compose_tool: ComposeTool::Plugin,
            project_root: project_root.to_path_buf(),
            schema_dir: project_root.join(".graphmem/schema"),
            heap_size: "512M".to_owned(),
            page_cache: "256M".to_owned(),
            startup_timeout: Duration::from_secs(5),
            health_check_interval: Duration::from_millis(50),
            http_timeout: Duration::from_secs(2),
        }
    }

    /// While unavailable every request is answered with 503 and no state
    /// changes.
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    pub fn is_available(&self) -> bool {
        self.lock().available
    }

    /// Every statement executed so far, in order.
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    pub fn request_count(&self) -> usize {
        self.lock().requests
    }

    pub fn constraint_names(&self) -> Vec<String> {
        self.lock().constraints.keys().cloned().collect()
    }

    pub fn index_names(&self) -> Vec<String> {
        self.lock().indexes.keys().cloned().collect()
    }

    pub fn node_count(&self, label: &str) -> usize {
        self.lock().nodes.iter().filter(|n| n.label == label).count()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for FakeNeo4j {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn json_header() -> Header {
    Header::from_bytes("Content-Type", "application/json").expect("valid header")
}

fn respond_json(req: tiny_http::Request, code: u16, body: &TxResponse) {
    let data = serde_json::to_vec(body).unwrap_or_default();
    let _ = req.respond(
        Response::from_data(data)
            .with_status_code(StatusCode(code))
            .with_header(json_header()),
    );
}

fn header_value(req: &tiny_http::Request, name: &'static str) -> Option<String> {
    req.headers()
        .iter()
        .find(|h| h.field.equiv(name))
        .map(|h| h.value.as_str().to_owned())
}

fn handle_request(state: &Mutex<State>, mut req: tiny_http::Request) {
    let mut st = state.lock().unwrap_or_else(PoisonError::into_inner);
    st.requests += 1;
    if !st.available {
        let _ = req.respond(Response::from_string("engine unavailable").with_status_code(StatusCode(503)));
        return;
    }

    let expected_path = format!("/db/{}/tx/commit", FakeNeo4j::DATABASE);
    if *req.method() != Method::Post || req.url() != expected_path {
        let body = TxResponse {
            results: Vec::new(),
            errors: vec![error(
                "Neo.ClientError.Request.Invalid",
                &format!("no such endpoint: {} {}", req.method(), req.url()),
            )],
        };
        respond_json(req, 404, &body);
        return;
    }

    let expected_auth = format!(
        "Basic {}",
        STANDARD.encode(format!("{}:{}", FakeNeo4j::USER, FakeNeo4j::PASSWORD))
    );
    if header_value(&req, "Authorization").as_deref() != Some(expected_auth.as_str()) {
        let body = TxResponse {
            results: Vec::new(),
            errors: vec![error(
                "Neo.ClientError.Security.Unauthorized",
                "The client is unauthorized due to authentication failure.",
            )],
        };
        respond_json(req, 401, &body);
        return;
    }
    let read_only =
        header_value(&req, "Access-Mode").is_some_and(|m| m.eq_ignore_ascii_case("READ"));

    let mut raw = Vec::new();
    if req.as_reader().read_to_end(&mut raw).is_err() {
        let _ = req.respond(Response::from_string("read error").with_status_code(StatusCode(400)));
        return;
    }
    let request: TxRequest = match serde_json::from_slice(&raw) {
        Ok(r) => r,
        Err(e) => {
            let body = TxResponse {
                results: Vec::new(),
                errors: vec![error("Neo.ClientError.Request.InvalidFormat", &e.to_string())],
            };
            respond_json(req, 400, &body);
            return;
        }
    };

    let mut response = TxResponse::default();
    for stmt in request.statements {
        debug!("fake neo4j: {}", stmt.statement);
        st.statements.push(stmt.statement.clone());
        match st.execute(&stmt, read_only) {
            Ok(result) => response.results.push(result),
            Err(err) => {
                response.errors.push(err);
                break;
            }
        }
    }
    drop(st);
    respond_json(req, 200, &response);
}

fn error(code: &str, message: &str) -> TxError {
    TxError {
        code: code.to_owned(),
        message: message.to_owned(),
    }
}

fn empty() -> TxResult {
    TxResult::default()
}

fn rows(columns: &[&str], data: Vec<Vec<Value>>) -> TxResult {
    TxResult {
        columns: columns.iter().map(|c| (*c).to_owned()).collect(),
        data: data.into_iter().map(|row| TxRow { row }).collect(),
    }
}

/// Text between `open` and the next `close` after it.
fn between<'a>(text: &'a str, open: &str, close: char) -> Option<&'a str> {
    let start = text.find(open)? + open.len();
    let rest = &text[start..];
    rest.find(close).map(|end| rest[..end].trim())
}

/// Label of the first `(var:Label ...)` pattern.
fn label_of(query: &str) -> Option<&str> {
    let start = query.find(':')? + 1;
    let rest = &query[start..];
    let end = rest.find(|c: char| c == ' ' || c == ')' || c == '{')?;
    Some(&rest[..end])
}

/// `(label, property)` from `FOR (x:Label) REQUIRE x.prop` or `ON (x.prop)`.
fn rule_of(query: &str) -> Option<SchemaRule> {
    let label = between(query, "FOR (", ')')?.split(':').nth(1)?.to_owned();
    let target = if query.contains(" REQUIRE ") {
        between(query, " REQUIRE ", ' ')?
    } else {
        between(query, " ON (", ')')?
    };
    let property = target.split('.').nth(1)?.to_owned();
    Some(SchemaRule { label, property })
}

impl State {
    fn execute(&mut self, stmt: &TxStatement, read_only: bool) -> Outcome {
        let query = stmt.statement.split_whitespace().collect::<Vec<_>>().join(" ");
        let params = stmt
            .parameters
            .as_ref()
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let writes = ["CREATE ", "MERGE ", "DROP ", "DELETE "]
            .iter()
            .any(|kw| query.starts_with(kw) || query.contains(&format!(" {kw}")));
        if writes && read_only {
            return Err(error(
                "Neo.ClientError.Statement.AccessMode",
                "Writing in read access mode not allowed.",
            ));
        }

        if query == "RETURN 1 AS ok" {
            return Ok(rows(&["ok"], vec![vec![json!(1)]]));
        }
        if let Some(rest) = query.strip_prefix("CREATE CONSTRAINT ") {
            return self.create_rule(true, rest, &query);
        }
        if let Some(rest) = query.strip_prefix("CREATE INDEX ") {
            return self.create_rule(false, rest, &query);
        }
        if let Some(rest) = query.strip_prefix("DROP CONSTRAINT ") {
            return self.drop_rule(true, rest);
        }
        if let Some(rest) = query.strip_prefix("DROP INDEX ") {
            return self.drop_rule(false, rest);
        }
        if query.starts_with("SHOW CONSTRAINTS") {
            let names = self.constraints.keys().map(|n| vec![json!(n)]).collect();
            return Ok(rows(&["name"], names));
        }
        if query.starts_with("SHOW INDEXES") {
            // constraint-backed indexes share the constraint's name
            let names = self
                .indexes
                .keys()
                .chain(self.constraints.keys())
                .map(|n| vec![json!(n)])
                .collect();
            return Ok(rows(&["name"], names));
        }
        if query.starts_with("MERGE (") {
            return self.merge(&query);
        }
        if query.starts_with("CREATE (") {
            return self.create_node(&query, params);
        }
        if query == "MATCH (n) DETACH DELETE n" {
            self.nodes.clear();
            return Ok(empty());
        }
        if query.starts_with("MATCH (n) RETURN labels(n)[0] AS label, count(n) AS count") {
            let mut counts: BTreeMap<&str, i64> = BTreeMap::new();
            for node in &self.nodes {
                *counts.entry(node.label.as_str()).or_default() += 1;
            }
            let data = counts
                .into_iter()
                .map(|(label, count)| vec![json!(label), json!(count)])
                .collect();
            return Ok(rows(&["label", "count"], data));
        }
        if query.starts_with("MATCH (") && query.contains(" RETURN count(") {
            let label = label_of(&query).unwrap_or_default();
            let alias = query.rsplit(" AS ").next().unwrap_or("count");
            let count = self.nodes.iter().filter(|n| n.label == label).count();
            return Ok(rows(&[alias], vec![vec![json!(count)]]));
        }
        if query.starts_with("MATCH (") && query.contains("{id: $id})") {
            return Ok(self.lookup(&query, &params));
        }
        Err(error(
            "Neo.ClientError.Statement.SyntaxError",
            &format!("Invalid input: unsupported statement '{query}'"),
        ))
    }

    fn create_rule(&mut self, constraint: bool, rest: &str, query: &str) -> Outcome {
        let name = rest.split(' ').next().unwrap_or_default().to_owned();
        let guarded = query.contains(" IF NOT EXISTS");
        let rule = rule_of(query).ok_or_else(|| {
            error(
                "Neo.ClientError.Statement.SyntaxError",
                &format!("Invalid input: cannot parse schema rule '{query}'"),
            )
        })?;
        let kind = if constraint { "constraint" } else { "index" };
        let rules = if constraint {
            &mut self.constraints
        } else {
            &mut self.indexes
        };
        if rules.contains_key(&name) {
            if guarded {
                return Ok(empty());
            }
            return Err(error(
                "Neo.ClientError.Schema.EquivalentSchemaRuleAlreadyExists",
                &format!("An equivalent {kind} already exists, '{name}'."),
            ));
        }
        rules.insert(name, rule);
        Ok(empty())
    }

    fn drop_rule(&mut self, constraint: bool, rest: &str) -> Outcome {
        let name = rest.split(' ').next().unwrap_or_default();
        let guarded = rest.contains("IF EXISTS");
        let rules = if constraint {
            &mut self.constraints
        } else {
            &mut self.indexes
        };
        if rules.remove(name).is_some() || guarded {
            return Ok(empty());
        }
        Err(error(
            "Neo.DatabaseError.Schema.ConstraintDropFailed",
            &format!("Unable to drop '{name}': no such schema rule."),
        ))
    }

    /// `MERGE (a:Label {id: 'x'}) ON CREATE SET a.name = 'Y', ...`
    fn merge(&mut self, query: &str) -> Outcome {
        let label = label_of(query).unwrap_or_default().to_owned();
        let id = between(query, "{id: '", '\'').unwrap_or_default().to_owned();
        let exists = self
            .nodes
            .iter()
            .any(|n| n.label == label && n.props.get("id") == Some(&json!(id)));
        if !exists {
            let mut props = Map::new();
            props.insert("id".to_owned(), json!(id));
            if let Some(name) = between(query, ".name = '", '\'') {
                props.insert("name".to_owned(), json!(name));
            }
            self.nodes.push(Node { label, props });
        }
        Ok(empty())
    }

    /// `CREATE (m:Label {k: $k, ...})`, properties taken from the parameters.
    fn create_node(&mut self, query: &str, props: Map<String, Value>) -> Outcome {
        let label = label_of(query).unwrap_or_default().to_owned();
        for (name, rule) in &self.constraints {
            let Some(value) = props.get(&rule.property) else {
                continue;
            };
            if rule.label != label {
                continue;
            }
            let clash = self
                .nodes
                .iter()
                .any(|n| n.label == label && n.props.get(&rule.property) == Some(value));
            if clash {
                return Err(error(
                    "Neo.ClientError.Schema.ConstraintValidationFailed",
                    &format!(
                        "Node already exists with {} = {value} (constraint {name})",
                        rule.property
                    ),
                ));
            }
        }
        self.nodes.push(Node { label, props });
        Ok(empty())
    }

    /// `MATCH (m:Label {id: $id}) RETURN m.prop AS alias`
    fn lookup(&self, query: &str, params: &Map<String, Value>) -> TxResult {
        let label = label_of(query).unwrap_or_default();
        let property = between(query, "RETURN ", ' ')
            .and_then(|p| p.split('.').nth(1))
            .unwrap_or_default();
        let alias = query.rsplit(" AS ").next().unwrap_or(property);
        let id = params.get("id");
        let data = self
            .nodes
            .iter()
            .filter(|n| n.label == label && n.props.get("id") == id)
            .map(|n| vec![n.props.get(property).cloned().unwrap_or(Value::Null)])
            .collect();
        rows(&[alias], data)
    }
}
