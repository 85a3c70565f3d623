//! Process execution and container-runtime plumbing for graphmem.
//!
//! This crate is the only place that talks to external programs. It provides the
//! `CommandRunner` seam (`SystemRunner` for real processes, `MockRuntime` for a
//! simulated Docker CLI), detection of the compose invocation form, container status
//! inspection via `docker ps`, and the low-level host checks used by the
//! prerequisite advisor.

pub mod command;
pub mod compose;
pub mod container;
pub mod mock;
pub mod prereq;

pub use command::{run_ok, CommandOutput, CommandRunner, Invocation, SystemRunner};
pub use compose::{detect_compose_tool, ComposeTool};
pub use container::{inspect_process, parse_ps_output, ContainerStatus, ProcessState};
pub use mock::MockRuntime;
pub use prereq::{
    daemon_status, docker_installed, format_missing, port_available, DaemonStatus, MissingPrereq,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("command not found: {0}")]
    CommandNotFound(String),
    #[error("empty command line")]
    EmptyCommand,
    #[error("'{command}' failed: {detail}")]
    CommandFailed { command: String, detail: String },
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
}
