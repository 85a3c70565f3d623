//! Non-blocking startup for host applications.
//!
//! The pipeline is: prerequisites, configuration, container start with a
//! health wait, schema initialization. It runs on a single named worker
//! thread; while one run is in flight every caller shares its
//! [`StartupHandle`]. Failures are logged and folded into a
//! [`StartupOutcome`]; nothing on this path panics or returns an error to the
//! host except [`Bootstrapper::ready_connector`].

use crate::manager::{ContainerManager, HealthCheck};
use crate::prereq::{self, PrerequisiteReport};
use crate::CoreError;
use graphmem_config::{ComposeTool, Config, ConfigResolver};
use graphmem_db::{Connector, SchemaManager};
use graphmem_runtime::{CommandRunner, SystemRunner};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Builds an open connector for a resolved config. Used for health checks
/// and schema work.
pub type ConnectorFactory = Arc<dyn Fn(&Config) -> Connector + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupOutcome {
    Ready,
    SkippedPrerequisites { issues: Vec<String> },
    ConfigInvalid(String),
    EngineUnavailable,
    SchemaFailed,
}

impl StartupOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, StartupOutcome::Ready)
    }
}

impl fmt::Display for StartupOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupOutcome::Ready => write!(f, "ready"),
            StartupOutcome::SkippedPrerequisites { issues } => match issues.first() {
                Some(first) => write!(f, "skipped, prerequisites not met; to fix: {first}"),
                None => write!(f, "skipped, prerequisites not met"),
            },
            StartupOutcome::ConfigInvalid(msg) => write!(f, "invalid configuration: {msg}"),
            StartupOutcome::EngineUnavailable => write!(f, "engine did not become healthy"),
            StartupOutcome::SchemaFailed => write!(f, "schema initialization failed"),
        }
    }
}

type Slot = (Mutex<Option<StartupOutcome>>, Condvar);

/// Shared view of one startup run.
#[derive(Clone)]
pub struct StartupHandle {
    shared: Arc<Slot>,
}

impl StartupHandle {
    fn pending() -> Self {
        Self {
            shared: Arc::new((Mutex::new(None), Condvar::new())),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<StartupOutcome>> {
        self.shared.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, outcome: StartupOutcome) {
        let mut slot = self.slot();
        if slot.is_none() {
            *slot = Some(outcome);
            self.shared.1.notify_all();
        }
    }

    /// Block until the run finishes.
    pub fn wait(&self) -> StartupOutcome {
        let mut slot = self.slot();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            slot = self
                .shared
                .1
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// `None` if the run is still going after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<StartupOutcome> {
        let slot = self.slot();
        let (slot, _) = self
            .shared
            .1
            .wait_timeout_while(slot, timeout, |o| o.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        slot.clone()
    }

    pub fn outcome(&self) -> Option<StartupOutcome> {
        self.slot().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.slot().is_some()
    }
}

impl fmt::Debug for StartupHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartupHandle")
            .field("outcome", &self.outcome())
            .finish()
    }
}

/// Settles the handle if the worker unwinds before reporting.
struct FinishOnDrop(StartupHandle);

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        self.0.finish(StartupOutcome::EngineUnavailable);
    }
}

/// Everything one pipeline run needs, cloned onto the worker.
#[derive(Clone)]
struct Pipeline {
    resolver: ConfigResolver,
    runner: Arc<dyn CommandRunner>,
    connect: ConnectorFactory,
    lock_dir: Option<PathBuf>,
}

impl Pipeline {
    fn manager(&self, config: Arc<Config>) -> ContainerManager {
        let connect = Arc::clone(&self.connect);
        let check_config = Arc::clone(&config);
        let health: Arc<dyn HealthCheck> =
            Arc::new(move || connect(check_config.as_ref()).verify_connectivity());
        let manager = ContainerManager::new(config, Arc::clone(&self.runner)).with_health(health);
        match &self.lock_dir {
            Some(dir) => manager.with_lock_dir(dir.clone()),
            None => manager,
        }
    }

    fn run(&self) -> StartupOutcome {
        let report = prereq::check_prerequisites(&self.resolver, self.runner.as_ref());
        if !report.all_passed {
            warn!("Neo4j memory engine not started: prerequisites not met");
            if let Some(missing) = report.missing().first() {
                warn!("  {missing}");
            }
            info!("run `graphmem doctor` for the full checklist");
            return StartupOutcome::SkippedPrerequisites {
                issues: report.issues,
            };
        }

        let config = match self.resolver.resolve(self.runner.as_ref()) {
            Ok(config) => Arc::new(config),
            Err(e) => {
                error!("invalid memory engine configuration: {e}");
                return StartupOutcome::ConfigInvalid(e.to_string());
            }
        };

        let manager = self.manager(Arc::clone(&config));
        if !manager.start(true) {
            return StartupOutcome::EngineUnavailable;
        }

        let conn = (self.connect)(config.as_ref());
        if SchemaManager::new(&conn).initialize_schema() {
            info!("Neo4j memory engine ready at {}", config.http_url());
            StartupOutcome::Ready
        } else {
            StartupOutcome::SchemaFailed
        }
    }
}

/// Owns the startup pipeline for one host process.
pub struct Bootstrapper {
    pipeline: Pipeline,
    inflight: Mutex<Option<StartupHandle>>,
}

impl Bootstrapper {
    pub fn new(resolver: ConfigResolver, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            pipeline: Pipeline {
                resolver,
                runner,
                connect: Arc::new(Connector::open),
                lock_dir: None,
            },
            inflight: Mutex::new(None),
        }
    }

    /// Environment and working directory of this process, real Docker CLI.
    pub fn from_process() -> Self {
        Self::new(ConfigResolver::from_process(), Arc::new(SystemRunner::new()))
    }

    #[must_use]
    pub fn with_connector_factory(mut self, connect: ConnectorFactory) -> Self {
        self.pipeline.connect = connect;
        self
    }

    #[must_use]
    pub fn with_lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pipeline.lock_dir = Some(dir.into());
        self
    }

    pub fn resolver(&self) -> &ConfigResolver {
        &self.pipeline.resolver
    }

    pub fn check_prerequisites(&self) -> PrerequisiteReport {
        prereq::check_prerequisites(&self.pipeline.resolver, self.pipeline.runner.as_ref())
    }

    fn inflight(&self) -> MutexGuard<'_, Option<StartupHandle>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the pipeline on the worker thread and return at once. While a
    /// run is in flight its handle is returned instead of starting another.
    pub fn spawn(&self) -> StartupHandle {
        match self.try_spawn() {
            Ok(handle) => handle,
            Err(e) => {
                error!("cannot spawn startup worker: {e}");
                let handle = StartupHandle::pending();
                handle.finish(StartupOutcome::EngineUnavailable);
                handle
            }
        }
    }

    fn try_spawn(&self) -> std::io::Result<StartupHandle> {
        let mut inflight = self.inflight();
        if let Some(handle) = inflight.as_ref().filter(|h| !h.is_finished()) {
            debug!("startup already in flight");
            return Ok(handle.clone());
        }
        let handle = StartupHandle::pending();
        let worker = FinishOnDrop(handle.clone());
        let pipeline = self.pipeline.clone();
        std::thread::Builder::new()
            .name("graphmem-startup".to_owned())
            .spawn(move || {
                let outcome = pipeline.run();
                debug!("startup finished: {outcome}");
                worker.0.finish(outcome);
            })?;
        *inflight = Some(handle.clone());
        Ok(handle)
    }

    /// Request a running engine. With `blocking`, waits for the run and
    /// reports readiness; otherwise returns whether a run was scheduled.
    pub fn ensure_running(&self, blocking: bool) -> bool {
        if blocking {
            return self.spawn().wait().is_ready();
        }
        match self.try_spawn() {
            Ok(_) => true,
            Err(e) => {
                error!("cannot spawn startup worker: {e}");
                false
            }
        }
    }

    /// Wait up to `timeout` for startup and return an open, answering
    /// connector. Starts a run if none is in flight and the last one did not
    /// succeed.
    pub fn ready_connector(&self, timeout: Duration) -> Result<Connector, CoreError> {
        let last = self.inflight().clone();
        let handle = match last {
            Some(h) if !h.is_finished() || matches!(h.outcome(), Some(StartupOutcome::Ready)) => h,
            _ => self.spawn(),
        };
        match handle.wait_timeout(timeout) {
            None => Err(CoreError::StartupTimeout(timeout)),
            Some(StartupOutcome::Ready) => {
                let config = self.pipeline.resolver.resolve_with_tool(ComposeTool::Plugin)?;
                let conn = (self.pipeline.connect)(&config);
                if conn.verify_connectivity() {
                    Ok(conn)
                } else {
                    Err(CoreError::EngineUnavailable)
                }
            }
            Some(other) => Err(CoreError::NotReady(other)),
        }
    }
}

fn process_bootstrapper() -> &'static Bootstrapper {
    static PROCESS: OnceLock<Bootstrapper> = OnceLock::new();
    PROCESS.get_or_init(Bootstrapper::from_process)
}

/// Host entry point: make sure the engine is (being) started.
///
/// `ensure_running(false)` returns within milliseconds; the work happens on a
/// background thread and failures only reach the log.
pub fn ensure_running(blocking: bool) -> bool {
    process_bootstrapper().ensure_running(blocking)
}

/// Host entry point: diagnose prerequisites from the process environment.
pub fn check_prerequisites() -> PrerequisiteReport {
    process_bootstrapper().check_prerequisites()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_settles_once() {
        let handle = StartupHandle::pending();
        assert!(!handle.is_finished());
        assert_eq!(handle.wait_timeout(Duration::from_millis(10)), None);
        handle.finish(StartupOutcome::SchemaFailed);
        handle.finish(StartupOutcome::Ready);
        assert_eq!(handle.outcome(), Some(StartupOutcome::SchemaFailed));
        assert_eq!(handle.wait(), StartupOutcome::SchemaFailed);
    }

    #[test]
    fn waiters_wake_on_finish() {
        let handle = StartupHandle::pending();
        let waiter = handle.clone();
        let t = std::thread::spawn(move || waiter.wait());
        std::thread::sleep(Duration::from_millis(20));
        handle.finish(StartupOutcome::Ready);
        assert_eq!(t.join().unwrap(), StartupOutcome::Ready);
    }

    #[test]
    fn dropped_worker_reports_unavailable() {
        let handle = StartupHandle::pending();
        drop(FinishOnDrop(handle.clone()));
        assert_eq!(handle.outcome(), Some(StartupOutcome::EngineUnavailable));
    }

    #[test]
    fn outcome_display() {
        let skipped = StartupOutcome::SkippedPrerequisites {
            issues: vec!["install Docker".to_owned()],
        };
        assert!(skipped.to_string().contains("install Docker"));
        assert!(!skipped.is_ready());
        assert!(StartupOutcome::Ready.is_ready());
    }
}
