use crate::command::{CommandOutput, CommandRunner, Invocation};
use crate::RuntimeError;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Container name compose creates when the invocation does not export one.
pub const DEFAULT_CONTAINER: &str = "graphmem-neo4j";

#[derive(Debug)]
struct MockState {
    /// Container name -> running.
    containers: HashMap<String, bool>,
    invocations: Vec<Invocation>,
    created: usize,
    docker_missing: bool,
    daemon_stopped: bool,
    permission_denied: bool,
    plugin_compose: bool,
    standalone_compose: bool,
    failing: HashSet<String>,
    hanging: HashSet<String>,
    logs: Vec<String>,
    create_delay: Duration,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            containers: HashMap::new(),
            invocations: Vec::new(),
            created: 0,
            docker_missing: false,
            daemon_stopped: false,
            permission_denied: false,
            plugin_compose: true,
            standalone_compose: false,
            failing: HashSet::new(),
            hanging: HashSet::new(),
            logs: Vec::new(),
            create_delay: Duration::ZERO,
        }
    }
}

/// In-process stand-in for the Docker and Compose CLIs.
///
/// Understands exactly the command shapes graphmem issues (`docker ps/start/
/// stop/logs/info/--version`, `compose version/up/down`) and keeps a table of
/// named containers. Every invocation is recorded for assertions.
#[derive(Debug, Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cli {
    Docker,
    ComposePlugin,
    ComposeStandalone,
}

impl MockRuntime {
    /// Docker installed, daemon up, compose plugin available, no containers.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_mut(&mut self) -> &mut MockState {
        self.state.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn with_compose(mut self, plugin: bool, standalone: bool) -> Self {
        let state = self.state_mut();
        state.plugin_compose = plugin;
        state.standalone_compose = standalone;
        self
    }

    #[must_use]
    pub fn without_docker(mut self) -> Self {
        self.state_mut().docker_missing = true;
        self
    }

    #[must_use]
    pub fn with_daemon_stopped(mut self) -> Self {
        self.state_mut().daemon_stopped = true;
        self
    }

    #[must_use]
    pub fn with_permission_denied(mut self) -> Self {
        self.state_mut().permission_denied = true;
        self
    }

    #[must_use]
    pub fn with_container(mut self, name: &str, running: bool) -> Self {
        self.state_mut().containers.insert(name.to_owned(), running);
        self
    }

    /// Delay between compose deciding to create a container and the container
    /// appearing, to widen race windows in tests.
    #[must_use]
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.state_mut().create_delay = delay;
        self
    }

    /// Make every command whose action is `action` (`up`, `start`, `stop`, ...)
    /// exit with status 1.
    #[must_use]
    pub fn fail_on(mut self, action: &str) -> Self {
        self.state_mut().failing.insert(action.to_owned());
        self
    }

    /// Make every command whose action is `action` report a timeout.
    #[must_use]
    pub fn time_out_on(mut self, action: &str) -> Self {
        self.state_mut().hanging.insert(action.to_owned());
        self
    }

    #[must_use]
    pub fn with_logs<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state_mut()
            .logs
            .extend(lines.into_iter().map(Into::into));
        self
    }

    pub fn set_running(&self, name: &str, running: bool) {
        self.state().containers.insert(name.to_owned(), running);
    }

    pub fn remove_container(&self, name: &str) {
        self.state().containers.remove(name);
    }

    /// `Some(running)` if the container exists.
    pub fn container(&self, name: &str) -> Option<bool> {
        self.state().containers.get(name).copied()
    }

    pub fn container_count(&self) -> usize {
        self.state().containers.len()
    }

    /// Number of containers compose actually created.
    pub fn created_count(&self) -> usize {
        self.state().created
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.state().invocations.clone()
    }

    /// How many recorded invocations had the given action.
    pub fn count(&self, action: &str) -> usize {
        self.state()
            .invocations
            .iter()
            .filter(|inv| action_of(inv).as_deref() == Some(action))
            .count()
    }

    pub fn clear_invocations(&self) {
        self.state().invocations.clear();
    }

    fn dispatch(&self, invocation: &Invocation) -> Result<CommandOutput, RuntimeError> {
        let args = &invocation.args;
        let cli = match (args.first().map(String::as_str), args.get(1).map(String::as_str)) {
            (Some("docker"), Some("compose")) => Cli::ComposePlugin,
            (Some("docker"), _) => Cli::Docker,
            (Some("docker-compose"), _) => Cli::ComposeStandalone,
            (Some(other), _) => return Err(RuntimeError::CommandNotFound(other.to_owned())),
            (None, _) => return Err(RuntimeError::EmptyCommand),
        };
        let action = action_of(invocation).unwrap_or_default();

        let delay = {
            let mut state = self.state();
            state.invocations.push(invocation.clone());

            if state.docker_missing && cli != Cli::ComposeStandalone {
                return Err(RuntimeError::CommandNotFound("docker".to_owned()));
            }
            if cli == Cli::ComposeStandalone && !state.standalone_compose {
                return Err(RuntimeError::CommandNotFound("docker-compose".to_owned()));
            }
            if cli == Cli::ComposePlugin && !state.plugin_compose {
                return Ok(CommandOutput::failed(
                    1,
                    "docker: 'compose' is not a docker command.",
                ));
            }
            if state.hanging.contains(&action) {
                return Ok(CommandOutput::timeout());
            }
            if state.failing.contains(&action) {
                return Ok(CommandOutput::failed(1, format!("injected failure: {action}")));
            }

            let needs_daemon = !matches!(action.as_str(), "--version" | "version");
            if needs_daemon && state.permission_denied {
                return Ok(CommandOutput::failed(
                    1,
                    "permission denied while trying to connect to the Docker daemon socket at unix:///var/run/docker.sock",
                ));
            }
            if needs_daemon && state.daemon_stopped {
                return Ok(CommandOutput::failed(
                    1,
                    "Cannot connect to the Docker daemon at unix:///var/run/docker.sock. Is the docker daemon running?",
                ));
            }

            match cli {
                Cli::Docker => return Ok(docker_command(&mut state, args, &action)),
                Cli::ComposePlugin | Cli::ComposeStandalone if action != "up" => {
                    return Ok(compose_command(&mut state, invocation, cli, &action));
                }
                _ => {}
            }
            state.create_delay
        };

        Ok(self.compose_up(invocation, delay))
    }

    fn compose_up(&self, invocation: &Invocation, delay: Duration) -> CommandOutput {
        if let Some(file) = flag_value(&invocation.args, "-f") {
            let path = match invocation.cwd {
                Some(ref cwd) => cwd.join(file),
                None => Path::new(file).to_path_buf(),
            };
            if !path.exists() {
                return CommandOutput::failed(
                    1,
                    format!("open {}: no such file or directory", path.display()),
                );
            }
        }
        let name = invocation
            .env_value("NEO4J_CONTAINER_NAME")
            .unwrap_or(DEFAULT_CONTAINER)
            .to_owned();

        {
            let mut state = self.state();
            if let Some(running) = state.containers.get_mut(&name) {
                *running = true;
                return CommandOutput::ok(format!("Container {name}  Started\n"));
            }
        }

        std::thread::sleep(delay);

        let mut state = self.state();
        if state.containers.contains_key(&name) {
            return CommandOutput::failed(
                1,
                format!(
                    "Error response from daemon: Conflict. The container name \"/{name}\" is already in use"
                ),
            );
        }
        state.containers.insert(name.clone(), true);
        state.created += 1;
        CommandOutput::ok(format!("Container {name}  Created\nContainer {name}  Started\n"))
    }
}

impl CommandRunner for MockRuntime {
    fn run(
        &self,
        invocation: &Invocation,
        _timeout: Duration,
    ) -> Result<CommandOutput, RuntimeError> {
        self.dispatch(invocation)
    }
}

fn docker_command(state: &mut MockState, args: &[String], action: &str) -> CommandOutput {
    let target = args.last().cloned().unwrap_or_default();
    let no_such = |name: &str| {
        CommandOutput::failed(
            1,
            format!("Error response from daemon: No such container: {name}"),
        )
    };
    match action {
        "--version" => CommandOutput::ok("Docker version 24.0.7, build afdd53b\n"),
        "info" => CommandOutput::ok("Server Version: 24.0.7\n"),
        "ps" => {
            let wanted = flag_value(args, "--filter")
                .and_then(|f| f.strip_prefix("name=^/"))
                .and_then(|f| f.strip_suffix('$'));
            let mut rows = String::new();
            let mut names: Vec<_> = state.containers.iter().collect();
            names.sort();
            for (name, running) in names {
                if wanted.is_some_and(|w| w != name) {
                    continue;
                }
                let status = if *running {
                    "Up 5 seconds"
                } else {
                    "Exited (0) 3 seconds ago"
                };
                rows.push_str(&format!("{name}\t{status}\n"));
            }
            CommandOutput::ok(rows)
        }
        "start" => match state.containers.get_mut(&target) {
            Some(running) => {
                *running = true;
                CommandOutput::ok(format!("{target}\n"))
            }
            None => no_such(&target),
        },
        "stop" => match state.containers.get_mut(&target) {
            Some(running) => {
                *running = false;
                CommandOutput::ok(format!("{target}\n"))
            }
            None => no_such(&target),
        },
        "logs" => {
            if !state.containers.contains_key(&target) {
                return no_such(&target);
            }
            let tail = flag_value(args, "--tail")
                .and_then(|n| n.parse::<usize>().ok())
                .unwrap_or(state.logs.len());
            let skip = state.logs.len().saturating_sub(tail);
            let mut out = state.logs[skip..].join("\n");
            if !out.is_empty() {
                out.push('\n');
            }
            CommandOutput::ok(out)
        }
        other => CommandOutput::failed(127, format!("mock docker: unsupported command '{other}'")),
    }
}

fn compose_command(
    state: &mut MockState,
    invocation: &Invocation,
    cli: Cli,
    action: &str,
) -> CommandOutput {
    match action {
        "version" if cli == Cli::ComposePlugin => {
            CommandOutput::ok("Docker Compose version v2.23.0\n")
        }
        "version" => CommandOutput::ok("docker-compose version 1.29.2, build 5becea4c\n"),
        "down" => {
            let name = invocation
                .env_value("NEO4J_CONTAINER_NAME")
                .unwrap_or(DEFAULT_CONTAINER);
            state.containers.remove(name);
            CommandOutput::ok(format!("Container {name}  Removed\n"))
        }
        other => CommandOutput::failed(127, format!("mock compose: unsupported command '{other}'")),
    }
}

/// The value following `flag` in `args`.
fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

/// The verb of a docker/compose invocation: `ps`, `start`, `up`, `version`, ...
fn action_of(invocation: &Invocation) -> Option<String> {
    let args = &invocation.args;
    let rest = match (args.first().map(String::as_str), args.get(1).map(String::as_str)) {
        (Some("docker"), Some("compose")) => &args[2..],
        (Some("docker" | "docker-compose"), _) => &args[1..],
        _ => return None,
    };
    let mut iter = rest.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-f" | "-p" | "--project-name" | "--file" => {
                iter.next();
            }
            "--version" => return Some(arg.clone()),
            a if a.starts_with('-') => {}
            a => return Some(a.to_owned()),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(rt: &MockRuntime, args: &[&str]) -> CommandOutput {
        rt.run(&Invocation::new(args.iter().copied()), Duration::from_secs(1))
            .unwrap()
    }

    #[test]
    fn start_stop_cycle() {
        let rt = MockRuntime::new().with_container("db", false);
        assert!(run(&rt, &["docker", "start", "db"]).success());
        assert_eq!(rt.container("db"), Some(true));
        assert!(run(&rt, &["docker", "stop", "-t", "30", "db"]).success());
        assert_eq!(rt.container("db"), Some(false));
        assert!(!run(&rt, &["docker", "start", "missing"]).success());
        assert_eq!(rt.count("start"), 2);
        assert_eq!(rt.count("stop"), 1);
    }

    #[test]
    fn compose_up_creates_named_container() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("compose.yml"), "services: {}\n").unwrap();
        let rt = MockRuntime::new();
        let inv = Invocation::new(["docker", "compose", "-f", "compose.yml", "up", "-d"])
            .current_dir(dir.path())
            .env("NEO4J_CONTAINER_NAME", "custom");
        assert!(rt.run(&inv, Duration::from_secs(1)).unwrap().success());
        assert_eq!(rt.container("custom"), Some(true));
        assert_eq!(rt.created_count(), 1);

        // Second up is a no-op start.
        assert!(rt.run(&inv, Duration::from_secs(1)).unwrap().success());
        assert_eq!(rt.created_count(), 1);
        assert_eq!(rt.count("up"), 2);
    }

    #[test]
    fn compose_up_requires_definition_file() {
        let dir = tempfile::tempdir().unwrap();
        let rt = MockRuntime::new();
        let inv = Invocation::new(["docker", "compose", "-f", "missing.yml", "up", "-d"])
            .current_dir(dir.path());
        let out = rt.run(&inv, Duration::from_secs(1)).unwrap();
        assert!(!out.success());
        assert!(out.stderr.contains("no such file"));
        assert_eq!(rt.container_count(), 0);
    }

    #[test]
    fn missing_docker_is_spawn_error() {
        let rt = MockRuntime::new().without_docker();
        let err = rt
            .run(&Invocation::new(["docker", "--version"]), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::CommandNotFound(_)));
    }

    #[test]
    fn injected_failures_and_timeouts() {
        let rt = MockRuntime::new()
            .with_container("db", false)
            .fail_on("start")
            .time_out_on("stop");
        assert!(!run(&rt, &["docker", "start", "db"]).success());
        assert!(run(&rt, &["docker", "stop", "db"]).timed_out);
        assert_eq!(rt.container("db"), Some(false));
    }

    #[test]
    fn logs_tail() {
        let rt = MockRuntime::new()
            .with_container("db", true)
            .with_logs(["one", "two", "three"]);
        let out = run(&rt, &["docker", "logs", "--tail", "2", "db"]);
        assert_eq!(out.stdout, "two\nthree\n");
    }

    #[test]
    fn action_parsing_skips_flags() {
        let inv = Invocation::new(["docker-compose", "-f", "a.yml", "-p", "x", "up", "-d"]);
        assert_eq!(action_of(&inv).as_deref(), Some("up"));
        let inv = Invocation::new(["docker", "--version"]);
        assert_eq!(action_of(&inv).as_deref(), Some("--version"));
        assert_eq!(action_of(&Invocation::new(["ls"])), None);
    }
}
