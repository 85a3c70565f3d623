use crate::command::{CommandRunner, Invocation};
use crate::RuntimeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const INSPECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Observed state of the engine container. Always derived from a fresh
/// inspection; nothing caches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerStatus {
    Running,
    Stopped,
    NotFound,
    /// Process is up but the engine does not answer queries.
    Unhealthy,
}

impl ContainerStatus {
    /// Whether the container process exists and is up, healthy or not.
    pub fn is_up(self) -> bool {
        matches!(self, ContainerStatus::Running | ContainerStatus::Unhealthy)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContainerStatus::Running => "RUNNING",
            ContainerStatus::Stopped => "STOPPED",
            ContainerStatus::NotFound => "NOT_FOUND",
            ContainerStatus::Unhealthy => "UNHEALTHY",
        }
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw process-table state for a named container, before any health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    /// `docker ps` status text starts with `Up`.
    Up(String),
    /// Container exists with any other status text (`Exited (0) ...`, `Created`, ...).
    Down(String),
    Absent,
}

/// `docker ps -a` restricted to exactly `name`.
pub fn ps_invocation(name: &str) -> Invocation {
    Invocation::new([
        "docker".to_owned(),
        "ps".to_owned(),
        "-a".to_owned(),
        "--filter".to_owned(),
        format!("name=^/{name}$"),
        "--format".to_owned(),
        "{{.Names}}\t{{.Status}}".to_owned(),
    ])
}

/// Interpret `docker ps --format "{{.Names}}\t{{.Status}}"` output for `name`.
///
/// Docker's name filter is a regex match, so rows are re-checked for an exact
/// name before being trusted.
pub fn parse_ps_output(stdout: &str, name: &str) -> ProcessState {
    for line in stdout.lines() {
        let (row_name, status) = line.split_once('\t').unwrap_or((line, ""));
        if row_name.trim() != name {
            continue;
        }
        let status = status.trim();
        return if status.starts_with("Up") {
            ProcessState::Up(status.to_owned())
        } else {
            ProcessState::Down(status.to_owned())
        };
    }
    ProcessState::Absent
}

/// Inspect the process table for `name`.
pub fn inspect_process(
    runner: &dyn CommandRunner,
    name: &str,
) -> Result<ProcessState, RuntimeError> {
    let invocation = ps_invocation(name);
    let output = runner.run(&invocation, INSPECT_TIMEOUT)?;
    if !output.success() {
        return Err(RuntimeError::CommandFailed {
            command: invocation.display(),
            detail: output.failure_detail(),
        });
    }
    Ok(parse_ps_output(&output.stdout, name))
}
