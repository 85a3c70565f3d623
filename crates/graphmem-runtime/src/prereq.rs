use crate::command::{CommandRunner, Invocation};
use std::fmt;
use std::net::TcpListener;
use std::time::Duration;

/// Timeout for each host check.
pub const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// A missing prerequisite with an actionable remediation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingPrereq {
    pub name: String,
    pub purpose: String,
    /// A command or step the user can copy and run.
    pub remediation: String,
}

impl MissingPrereq {
    pub fn new(
        name: impl Into<String>,
        purpose: impl Into<String>,
        remediation: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            purpose: purpose.into(),
            remediation: remediation.into(),
        }
    }
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}): {}",
            self.name, self.purpose, self.remediation
        )
    }
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "  - {m}");
    }
    msg.push_str("\ngraphmem needs these to run the Neo4j memory engine; the host keeps working without it.");
    msg
}

pub fn docker_installed(runner: &dyn CommandRunner) -> bool {
    runner
        .run(&Invocation::new(["docker", "--version"]), CHECK_TIMEOUT)
        .is_ok_and(|out| out.success())
}

/// Reachability of the Docker daemon as seen by the current user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonStatus {
    Running,
    PermissionDenied,
    NotRunning(String),
    /// The docker CLI itself could not be executed.
    Unavailable,
}

pub fn daemon_status(runner: &dyn CommandRunner) -> DaemonStatus {
    match runner.run(&Invocation::new(["docker", "info"]), CHECK_TIMEOUT) {
        Ok(out) if out.success() => DaemonStatus::Running,
        Ok(out) if out.stderr.to_lowercase().contains("permission denied") => {
            DaemonStatus::PermissionDenied
        }
        Ok(out) => DaemonStatus::NotRunning(out.failure_detail()),
        Err(_) => DaemonStatus::Unavailable,
    }
}

/// Whether `port` can currently be bound on the loopback interface.
pub fn port_available(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRuntime;

    #[test]
    fn missing_prereq_display() {
        let m = MissingPrereq::new(
            "docker",
            "container runtime",
            "install Docker: https://docs.docker.com/get-docker/",
        );
        let s = m.to_string();
        assert!(s.contains("docker"));
        assert!(s.contains("container runtime"));
        assert!(s.contains("https://docs.docker.com/get-docker/"));
    }

    #[test]
    fn format_missing_produces_readable_output() {
        let items = vec![
            MissingPrereq::new("docker", "runtime", "install docker"),
            MissingPrereq::new("NEO4J_PASSWORD", "credential", "export NEO4J_PASSWORD=..."),
        ];
        let output = format_missing(&items);
        assert!(output.starts_with("missing prerequisites:"));
        assert!(output.contains("docker"));
        assert!(output.contains("NEO4J_PASSWORD"));
    }

    #[test]
    fn daemon_states() {
        assert_eq!(daemon_status(&MockRuntime::new()), DaemonStatus::Running);
        assert_eq!(
            daemon_status(&MockRuntime::new().with_permission_denied()),
            DaemonStatus::PermissionDenied
        );
        assert!(matches!(
            daemon_status(&MockRuntime::new().with_daemon_stopped()),
            DaemonStatus::NotRunning(_)
        ));
        assert_eq!(
            daemon_status(&MockRuntime::new().without_docker()),
            DaemonStatus::Unavailable
        );
    }

    #[test]
    fn docker_presence() {
        assert!(docker_installed(&MockRuntime::new()));
        assert!(!docker_installed(&MockRuntime::new().without_docker()));
    }

    #[test]
    fn bound_port_is_unavailable() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!port_available(port));
        drop(listener);
        assert!(port_available(port));
    }
}
