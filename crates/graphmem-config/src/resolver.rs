use crate::env::EnvVars;
use crate::file::{DurationValue, FileConfig, Neo4jSection};
use crate::project::{
    config_file_path, find_project_root, DEFAULT_COMPOSE_FILE, DEFAULT_SCHEMA_DIR,
};
use crate::{ConfigError, PASSWORD_VAR};
use graphmem_runtime::{detect_compose_tool, CommandRunner, ComposeTool};
use serde::{Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_USER: &str = "neo4j";
pub const DEFAULT_BOLT_PORT: u16 = 7687;
pub const DEFAULT_HTTP_PORT: u16 = 7474;
pub const DEFAULT_DATABASE: &str = "neo4j";
pub const DEFAULT_CONTAINER_NAME: &str = "graphmem-neo4j";
pub const DEFAULT_IMAGE: &str = "neo4j:5.15-community";
pub const DEFAULT_HEAP_SIZE: &str = "2G";
pub const DEFAULT_PAGE_CACHE: &str = "1G";
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);
/// Longest accepted timeout or interval.
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

const MIN_PORT: u16 = 1024;
const URI_SCHEMES: [&str; 6] = ["bolt", "bolt+s", "bolt+ssc", "neo4j", "neo4j+s", "neo4j+ssc"];

/// Resolved, validated engine configuration.
///
/// Built once per process by [`ConfigResolver`] and shared read-only
/// (typically behind an `Arc`). The password never appears in `Debug` or
/// serialized output.
#[derive(Clone, Serialize)]
pub struct Config {
    /// Bolt URI handed to higher layers that speak the binary protocol.
    pub uri: String,
    pub host: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub bolt_port: u16,
    pub http_port: u16,
    pub database: String,
    pub container_name: String,
    pub image: String,
    pub compose_file: PathBuf,
    pub compose_tool: ComposeTool,
    pub project_root: PathBuf,
    /// Host directory the compose file mounts read-only at `/schema`.
    pub schema_dir: PathBuf,
    pub heap_size: String,
    pub page_cache: String,
    #[serde(serialize_with = "as_secs")]
    pub startup_timeout: Duration,
    #[serde(serialize_with = "as_secs")]
    pub health_check_interval: Duration,
    #[serde(serialize_with = "as_secs")]
    pub http_timeout: Duration,
}

fn as_secs<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64())
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("uri", &self.uri)
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("bolt_port", &self.bolt_port)
            .field("http_port", &self.http_port)
            .field("database", &self.database)
            .field("container_name", &self.container_name)
            .field("image", &self.image)
            .field("compose_file", &self.compose_file)
            .field("compose_tool", &self.compose_tool)
            .field("project_root", &self.project_root)
            .field("schema_dir", &self.schema_dir)
            .field("heap_size", &self.heap_size)
            .field("page_cache", &self.page_cache)
            .field("startup_timeout", &self.startup_timeout)
            .field("health_check_interval", &self.health_check_interval)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

impl Config {
    /// Base URL of the HTTP endpoint (`http://host:http_port`).
    pub fn http_url(&self) -> String {
        format!("http://{}:{}", self.host, self.http_port)
    }

    /// Variables the compose definition interpolates.
    pub fn compose_env(&self) -> Vec<(String, String)> {
        [
            (PASSWORD_VAR, self.password.clone()),
            ("NEO4J_USER", self.user.clone()),
            ("NEO4J_BOLT_PORT", self.bolt_port.to_string()),
            ("NEO4J_HTTP_PORT", self.http_port.to_string()),
            ("NEO4J_HEAP_SIZE", self.heap_size.clone()),
            ("NEO4J_PAGE_CACHE", self.page_cache.clone()),
            ("NEO4J_CONTAINER_NAME", self.container_name.clone()),
            ("NEO4J_IMAGE", self.image.clone()),
            ("NEO4J_SCHEMA_DIR", self.schema_dir.display().to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v))
        .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.password.trim().is_empty() {
            return Err(missing_password());
        }
        check_port("NEO4J_BOLT_PORT", self.bolt_port)?;
        check_port("NEO4J_HTTP_PORT", self.http_port)?;
        if self.bolt_port == self.http_port {
            return Err(ConfigError::PortConflict {
                port: self.bolt_port,
            });
        }
        host_from_uri(&self.uri)?;
        if !valid_container_name(&self.container_name) {
            return Err(ConfigError::invalid(
                "NEO4J_CONTAINER_NAME",
                &self.container_name,
                "must start with a letter or digit and contain only [a-zA-Z0-9_.-]",
            ));
        }
        if self.health_check_interval > self.startup_timeout {
            return Err(ConfigError::invalid(
                "NEO4J_HEALTH_CHECK_INTERVAL",
                &format!("{:?}", self.health_check_interval),
                format!(
                    "must not exceed NEO4J_STARTUP_TIMEOUT ({:?})",
                    self.startup_timeout
                ),
            ));
        }
        Ok(())
    }
}

/// Resolves a [`Config`] from an environment snapshot and a working directory.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    env: EnvVars,
    cwd: PathBuf,
}

impl ConfigResolver {
    pub fn new(env: EnvVars, cwd: impl Into<PathBuf>) -> Self {
        Self {
            env,
            cwd: cwd.into(),
        }
    }

    /// Snapshot the process environment and current directory.
    pub fn from_process() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::new(EnvVars::from_process(), cwd)
    }

    pub fn env(&self) -> &EnvVars {
        &self.env
    }

    pub fn project_root(&self) -> PathBuf {
        find_project_root(&self.cwd)
    }

    pub fn load_file(&self) -> Result<FileConfig, ConfigError> {
        FileConfig::load_or_default(&config_file_path(&self.project_root()))
    }

    pub fn password(&self) -> Result<String, ConfigError> {
        self.env
            .get(PASSWORD_VAR)
            .map(str::to_owned)
            .ok_or_else(missing_password)
    }

    /// `(bolt_port, http_port)` after validation.
    pub fn ports(&self) -> Result<(u16, u16), ConfigError> {
        let file = self.load_file()?;
        self.ports_with(&file.neo4j)
    }

    /// Compose definition path. A broken config file is ignored here; it is
    /// reported by [`ConfigResolver::resolve`].
    pub fn compose_file(&self) -> PathBuf {
        let file = self.load_file().unwrap_or_default();
        project_path(
            &self.project_root(),
            self.env
                .get("NEO4J_COMPOSE_FILE")
                .or(file.neo4j.compose_file.as_deref()),
            DEFAULT_COMPOSE_FILE,
        )
    }

    pub fn container_name(&self) -> String {
        let file = self.load_file().unwrap_or_default();
        self.text(
            "NEO4J_CONTAINER_NAME",
            file.neo4j.container_name.as_ref(),
            DEFAULT_CONTAINER_NAME,
        )
    }

    /// Resolve everything, probing `runner` for the compose invocation form.
    ///
    /// Settings are validated before compose detection so a missing credential is
    /// reported even on hosts without Docker.
    pub fn resolve(&self, runner: &dyn CommandRunner) -> Result<Config, ConfigError> {
        let config = self.resolve_with_tool(ComposeTool::Plugin)?;
        let compose_tool = detect_compose_tool(runner).ok_or(ConfigError::NoComposeTool)?;
        Ok(Config {
            compose_tool,
            ..config
        })
    }

    /// Resolve everything with a known compose form; no processes are run.
    pub fn resolve_with_tool(&self, compose_tool: ComposeTool) -> Result<Config, ConfigError> {
        let project_root = self.project_root();
        let file = FileConfig::load_or_default(&config_file_path(&project_root))?;
        let section = &file.neo4j;

        let password = self.password()?;
        let (bolt_port, http_port) = self.ports_with(section)?;

        let uri = self.text(
            "NEO4J_URI",
            section.uri.as_ref(),
            &format!("bolt://localhost:{bolt_port}"),
        );
        let host = match self
            .env
            .get("NEO4J_HOST")
            .map(str::to_owned)
            .or_else(|| section.host.clone())
        {
            Some(host) => host,
            None => host_from_uri(&uri)?,
        };

        let config = Config {
            host,
            user: self.text("NEO4J_USER", section.user.as_ref(), DEFAULT_USER),
            password,
            bolt_port,
            http_port,
            database: self.text("NEO4J_DATABASE", section.database.as_ref(), DEFAULT_DATABASE),
            container_name: self.text(
                "NEO4J_CONTAINER_NAME",
                section.container_name.as_ref(),
                DEFAULT_CONTAINER_NAME,
            ),
            image: self.text("NEO4J_IMAGE", section.image.as_ref(), DEFAULT_IMAGE),
            compose_file: project_path(
                &project_root,
                self.env
                    .get("NEO4J_COMPOSE_FILE")
                    .or(section.compose_file.as_deref()),
                DEFAULT_COMPOSE_FILE,
            ),
            schema_dir: project_path(
                &project_root,
                self.env
                    .get("NEO4J_SCHEMA_DIR")
                    .or(section.schema_dir.as_deref()),
                DEFAULT_SCHEMA_DIR,
            ),
            compose_tool,
            heap_size: self.text("NEO4J_HEAP_SIZE", section.heap_size.as_ref(), DEFAULT_HEAP_SIZE),
            page_cache: self.text(
                "NEO4J_PAGE_CACHE",
                section.page_cache.as_ref(),
                DEFAULT_PAGE_CACHE,
            ),
            startup_timeout: self.duration(
                "NEO4J_STARTUP_TIMEOUT",
                section.startup_timeout.as_ref(),
                DEFAULT_STARTUP_TIMEOUT,
            )?,
            health_check_interval: self.duration(
                "NEO4J_HEALTH_CHECK_INTERVAL",
                section.health_check_interval.as_ref(),
                DEFAULT_HEALTH_CHECK_INTERVAL,
            )?,
            http_timeout: self.duration(
                "NEO4J_HTTP_TIMEOUT",
                section.http_timeout.as_ref(),
                DEFAULT_HTTP_TIMEOUT,
            )?,
            uri,
            project_root,
        };
        config.validate()?;
        debug!(
            "resolved config: container={} http={} bolt={} compose={}",
            config.container_name,
            config.http_url(),
            config.uri,
            config.compose_file.display()
        );
        Ok(config)
    }

    fn ports_with(&self, section: &Neo4jSection) -> Result<(u16, u16), ConfigError> {
        let bolt = self.port("NEO4J_BOLT_PORT", section.bolt_port, DEFAULT_BOLT_PORT)?;
        let http = self.port("NEO4J_HTTP_PORT", section.http_port, DEFAULT_HTTP_PORT)?;
        if bolt == http {
            return Err(ConfigError::PortConflict { port: bolt });
        }
        Ok((bolt, http))
    }

    fn port(&self, var: &str, from_file: Option<u16>, default: u16) -> Result<u16, ConfigError> {
        let port = match self.env.get(var) {
            Some(raw) => raw.parse::<u16>().map_err(|_| {
                ConfigError::invalid(var, raw, "expected a port number between 1024 and 65535")
            })?,
            None => from_file.unwrap_or(default),
        };
        check_port(var, port)?;
        Ok(port)
    }

    fn text(&self, var: &str, from_file: Option<&String>, default: &str) -> String {
        self.env
            .get(var)
            .map(str::to_owned)
            .or_else(|| from_file.cloned())
            .unwrap_or_else(|| default.to_owned())
    }

    fn duration(
        &self,
        var: &str,
        from_file: Option<&DurationValue>,
        default: Duration,
    ) -> Result<Duration, ConfigError> {
        let raw = self
            .env
            .get(var)
            .map(str::to_owned)
            .or_else(|| from_file.map(DurationValue::as_text));
        match raw {
            Some(raw) => parse_duration(var, &raw),
            None => Ok(default),
        }
    }
}

fn missing_password() -> ConfigError {
    ConfigError::MissingVariable {
        name: PASSWORD_VAR,
        remediation: format!("export {PASSWORD_VAR}='<choose a strong password>'"),
    }
}

fn check_port(var: &str, port: u16) -> Result<(), ConfigError> {
    if port < MIN_PORT {
        return Err(ConfigError::invalid(
            var,
            &port.to_string(),
            "privileged ports (below 1024) are not allowed",
        ));
    }
    Ok(())
}

/// Absolute values are kept; relative ones are anchored at the project root.
fn project_path(root: &Path, value: Option<&str>, default: &str) -> PathBuf {
    match value {
        Some(v) if Path::new(v).is_absolute() => PathBuf::from(v),
        Some(v) => root.join(v),
        None => root.join(default),
    }
}

fn host_from_uri(uri: &str) -> Result<String, ConfigError> {
    let (scheme, rest) = uri.split_once("://").ok_or_else(|| {
        ConfigError::invalid("NEO4J_URI", uri, "expected <scheme>://<host>[:<port>]")
    })?;
    if !URI_SCHEMES.contains(&scheme) {
        return Err(ConfigError::invalid(
            "NEO4J_URI",
            uri,
            format!("unsupported scheme '{scheme}' (use bolt:// or neo4j://)"),
        ));
    }
    let authority = rest.split('/').next().unwrap_or_default();
    let host = authority
        .rsplit_once(':')
        .map_or(authority, |(host, _)| host);
    if host.is_empty() {
        return Err(ConfigError::invalid("NEO4J_URI", uri, "missing host"));
    }
    Ok(host.to_owned())
}

fn valid_container_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Parse `60`, `500ms`, `30s` or `2m`. Zero and anything above
/// [`MAX_DURATION`] are rejected.
pub fn parse_duration(var: &str, raw: &str) -> Result<Duration, ConfigError> {
    let trimmed = raw.trim();
    let (digits, millis_per_unit) = if let Some(d) = trimmed.strip_suffix("ms") {
        (d, 1)
    } else if let Some(d) = trimmed.strip_suffix('s') {
        (d, 1_000)
    } else if let Some(d) = trimmed.strip_suffix('m') {
        (d, 60_000)
    } else {
        (trimmed, 1_000)
    };
    let value: u64 = digits.trim().parse().map_err(|_| {
        ConfigError::invalid(var, raw, "expected seconds or a value like 500ms, 30s, 2m")
    })?;
    if value == 0 {
        return Err(ConfigError::invalid(var, raw, "must be greater than zero"));
    }
    let duration = value
        .checked_mul(millis_per_unit)
        .map(Duration::from_millis)
        .filter(|d| *d <= MAX_DURATION)
        .ok_or_else(|| ConfigError::invalid(var, raw, "must not exceed 24 hours"))?;
    Ok(duration)
}
