//! Lifecycle orchestration for the graphmem Neo4j engine.
//!
//! [`ContainerManager`] starts, stops and inspects the engine container,
//! [`check_prerequisites`] diagnoses the host without changing it, and
//! [`Bootstrapper`] runs the whole startup pipeline on a background worker so
//! a host application can call [`ensure_running`] from its startup path and
//! move on.

pub mod bootstrap;
pub mod concurrency;
pub mod lifecycle;
pub mod manager;
pub mod prereq;

pub use bootstrap::{
    check_prerequisites, ensure_running, Bootstrapper, ConnectorFactory, StartupHandle,
    StartupOutcome,
};
pub use concurrency::{install_signal_handler, shutdown_requested, LifecycleLock};
pub use lifecycle::{plan_start, StartAction};
pub use manager::{ConnectorHealth, ContainerManager, HealthCheck, DEFAULT_STOP_TIMEOUT};
pub use prereq::PrerequisiteReport;

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(#[from] graphmem_config::ConfigError),
    #[error("runtime error: {0}")]
    Runtime(#[from] graphmem_runtime::RuntimeError),
    #[error("database error: {0}")]
    Db(#[from] graphmem_db::DbError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("engine not ready after {0:?}")]
    StartupTimeout(Duration),
    #[error("engine not ready: {0}")]
    NotReady(StartupOutcome),
    #[error("engine is not answering queries")]
    EngineUnavailable,
}
