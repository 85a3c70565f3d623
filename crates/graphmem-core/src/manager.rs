//! Container lifecycle for the engine: start, stop, status, health, logs.
//!
//! Every method reports failure as `false` (or explanatory text for logs)
//! after logging it; nothing here returns an error to the caller. All
//! external commands run with a timeout.

use crate::concurrency::{shutdown_requested, LifecycleLock};
use crate::lifecycle::{plan_start, StartAction};
use graphmem_config::{Config, MAX_DURATION};
use graphmem_db::{Connector, SchemaScripts};
use graphmem_runtime::{inspect_process, CommandRunner, ContainerStatus, Invocation, ProcessState};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub const STATUS_TIMEOUT: Duration = Duration::from_secs(10);
pub const START_TIMEOUT: Duration = Duration::from_secs(60);
pub const COMPOSE_UP_TIMEOUT: Duration = Duration::from_secs(180);
pub const LOGS_TIMEOUT: Duration = Duration::from_secs(10);
/// Extra time granted to `docker stop` beyond its own grace period.
pub const STOP_SLACK: Duration = Duration::from_secs(10);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Answers "does the engine accept queries right now?".
pub trait HealthCheck: Send + Sync {
    fn is_healthy(&self) -> bool;
}

impl<F> HealthCheck for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_healthy(&self) -> bool {
        self()
    }
}

/// Opens a fresh connector per check and runs the connectivity query.
pub struct ConnectorHealth {
    config: Arc<Config>,
}

impl ConnectorHealth {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

impl HealthCheck for ConnectorHealth {
    fn is_healthy(&self) -> bool {
        Connector::with_connection(&self.config, Connector::verify_connectivity)
    }
}

pub struct ContainerManager {
    config: Arc<Config>,
    runner: Arc<dyn CommandRunner>,
    health: Arc<dyn HealthCheck>,
    lock_dir: PathBuf,
}

impl ContainerManager {
    pub fn new(config: Arc<Config>, runner: Arc<dyn CommandRunner>) -> Self {
        let health = Arc::new(ConnectorHealth::new(Arc::clone(&config)));
        Self {
            config,
            runner,
            health,
            lock_dir: LifecycleLock::default_dir(),
        }
    }

    #[must_use]
    pub fn with_health(mut self, health: Arc<dyn HealthCheck>) -> Self {
        self.health = health;
        self
    }

    #[must_use]
    pub fn with_lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = dir.into();
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn name(&self) -> &str {
        &self.config.container_name
    }

    /// `None` when the process table could not be read.
    fn process_state(&self) -> Option<ProcessState> {
        match inspect_process(self.runner.as_ref(), self.name()) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("cannot inspect container {}: {e}", self.name());
                None
            }
        }
    }

    fn status_of(&self, state: ProcessState) -> ContainerStatus {
        match state {
            ProcessState::Up(_) if self.is_healthy() => ContainerStatus::Running,
            ProcessState::Up(detail) => {
                debug!("{} is up ({detail}) but not answering", self.name());
                ContainerStatus::Unhealthy
            }
            ProcessState::Down(_) => ContainerStatus::Stopped,
            ProcessState::Absent => ContainerStatus::NotFound,
        }
    }

    /// Current status, derived fresh from the process table and a health
    /// check. Inspection failures read as `NotFound`.
    pub fn status(&self) -> ContainerStatus {
        self.process_state()
            .map_or(ContainerStatus::NotFound, |state| self.status_of(state))
    }

    pub fn is_healthy(&self) -> bool {
        self.health.is_healthy()
    }

    /// Bring the engine up from whatever state it is in. Idempotent: a
    /// running engine gets no command. With `wait_for_ready`, also waits up
    /// to the startup timeout for it to answer queries.
    pub fn start(&self, wait_for_ready: bool) -> bool {
        let lock_path = LifecycleLock::path_for(&self.lock_dir, self.name());
        let issued = match LifecycleLock::acquire(&lock_path) {
            Ok(_lock) => self.bring_up(),
            Err(e) => {
                error!("cannot take lifecycle lock {}: {e}", lock_path.display());
                false
            }
        };
        if !issued {
            return false;
        }
        if wait_for_ready {
            self.wait_for_healthy(self.config.startup_timeout)
        } else {
            true
        }
    }

    fn bring_up(&self) -> bool {
        let Some(state) = self.process_state() else {
            error!("cannot inspect {}; not starting it blind", self.name());
            return false;
        };
        let status = self.status_of(state);
        match plan_start(status) {
            StartAction::Wait => {
                info!("{} is already {status}", self.name());
                true
            }
            StartAction::Resume => {
                info!("starting stopped container {}", self.name());
                self.run_step(
                    &Invocation::new(["docker", "start", self.name()]),
                    START_TIMEOUT,
                )
            }
            StartAction::Create => self.create(),
        }
    }

    fn create(&self) -> bool {
        let compose_file = &self.config.compose_file;
        if !compose_file.exists() {
            error!(
                "compose file {} not found; set NEO4J_COMPOSE_FILE or run `graphmem doctor`",
                compose_file.display()
            );
            return false;
        }
        let schema_dir = &self.config.schema_dir;
        match SchemaScripts::install_builtin(schema_dir) {
            Ok(0) => {}
            Ok(written) => debug!("wrote {written} schema scripts to {}", schema_dir.display()),
            Err(e) => {
                error!("cannot prepare schema directory: {e}");
                return false;
            }
        }
        info!(
            "creating container {} with `{}`",
            self.name(),
            self.config.compose_tool
        );
        let file = compose_file.to_string_lossy().into_owned();
        let mut invocation = self
            .config
            .compose_tool
            .invocation(["-f", file.as_str(), "up", "-d"])
            .current_dir(&self.config.project_root);
        for (key, value) in self.config.compose_env() {
            invocation = invocation.env(key, value);
        }
        self.run_step(&invocation, COMPOSE_UP_TIMEOUT)
    }

    /// Stop the container, giving it `timeout` to shut down cleanly.
    /// Succeeds without a command when it is not running.
    /// Fails when the container cannot be inspected. `timeout` is capped at
    /// [`MAX_DURATION`].
    pub fn stop(&self, timeout: Duration) -> bool {
        match self.process_state() {
            None => {
                error!("cannot inspect {}; not reporting it stopped", self.name());
                return false;
            }
            Some(ProcessState::Up(_)) => {}
            Some(_) => {
                debug!("{} is not running; nothing to stop", self.name());
                return true;
            }
        }
        info!("stopping container {}", self.name());
        let timeout = timeout.min(MAX_DURATION);
        let secs = timeout.as_secs().to_string();
        self.run_step(
            &Invocation::new(["docker", "stop", "-t", secs.as_str(), self.name()]),
            timeout.saturating_add(STOP_SLACK),
        )
    }

    pub fn restart(&self, wait_for_ready: bool) -> bool {
        self.stop(DEFAULT_STOP_TIMEOUT) && self.start(wait_for_ready)
    }

    /// Poll health every `health_check_interval` until healthy, `timeout`
    /// elapses, or shutdown is requested. Never sleeps past the deadline.
    /// `timeout` is capped at [`MAX_DURATION`].
    pub fn wait_for_healthy(&self, timeout: Duration) -> bool {
        let timeout = timeout.min(MAX_DURATION);
        let started = Instant::now();
        let Some(deadline) = started.checked_add(timeout) else {
            error!("health wait of {timeout:?} is not representable on this clock");
            return false;
        };
        loop {
            if self.is_healthy() {
                info!(
                    "{} healthy after {:.1}s",
                    self.name(),
                    started.elapsed().as_secs_f64()
                );
                return true;
            }
            if shutdown_requested() {
                warn!("shutdown requested; stopped waiting for {}", self.name());
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(self.config.health_check_interval.min(deadline - now));
        }
        error!(
            "{} not healthy after {:.1}s; inspect it with `graphmem logs`",
            self.name(),
            timeout.as_secs_f64()
        );
        false
    }

    /// Last `tail` lines of container output, or why they are unavailable.
    pub fn logs(&self, tail: usize) -> String {
        let lines = tail.to_string();
        let invocation =
            Invocation::new(["docker", "logs", "--tail", lines.as_str(), self.name()]);
        match self.runner.run(&invocation, LOGS_TIMEOUT) {
            Ok(out) if out.success() => {
                let mut text = out.stdout;
                text.push_str(&out.stderr);
                text
            }
            Ok(out) => format!(
                "logs unavailable for {}: {}",
                self.name(),
                out.failure_detail()
            ),
            Err(e) => format!("logs unavailable for {}: {e}", self.name()),
        }
    }

    fn run_step(&self, invocation: &Invocation, timeout: Duration) -> bool {
        match self.runner.run(invocation, timeout) {
            Ok(out) if out.success() => {
                debug!("`{}` ok", invocation.display());
                true
            }
            Ok(out) if out.timed_out => {
                error!(
                    "`{}` timed out after {}s",
                    invocation.display(),
                    timeout.as_secs()
                );
                false
            }
            Ok(out) => {
                error!("`{}` failed: {}", invocation.display(), out.failure_detail());
                info!("recent engine output: `graphmem logs`");
                false
            }
            Err(e) => {
                error!("`{}` could not run: {e}", invocation.display());
                false
            }
        }
    }
}
