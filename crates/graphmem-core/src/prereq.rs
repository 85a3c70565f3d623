//! Read-only diagnosis of everything the engine needs from the host.

use graphmem_config::{ConfigResolver, PASSWORD_VAR};
use graphmem_runtime::{
    daemon_status, detect_compose_tool, docker_installed, format_missing, inspect_process,
    port_available, CommandRunner, DaemonStatus, MissingPrereq, ProcessState,
};
use serde::Serialize;
use std::fmt;

/// Outcome of one prerequisite run. Built fresh per call.
#[derive(Debug, Clone, Serialize)]
pub struct PrerequisiteReport {
    pub docker_installed: bool,
    pub docker_running: bool,
    pub compose_available: bool,
    pub credentials_set: bool,
    pub compose_file_exists: bool,
    pub ports_available: bool,
    pub all_passed: bool,
    /// One copy-pasteable remediation per failed check, in check order.
    pub issues: Vec<String>,
    #[serde(skip)]
    missing: Vec<MissingPrereq>,
}

impl PrerequisiteReport {
    pub fn primary_issue(&self) -> Option<&str> {
        self.issues.first().map(String::as_str)
    }

    pub fn missing(&self) -> &[MissingPrereq] {
        &self.missing
    }

    /// `(label, passed)` for every check, in order.
    pub fn checks(&self) -> [(&'static str, bool); 6] {
        [
            ("docker installed", self.docker_installed),
            ("docker daemon running", self.docker_running),
            ("docker compose available", self.compose_available),
            ("NEO4J_PASSWORD set", self.credentials_set),
            ("compose file present", self.compose_file_exists),
            ("engine ports available", self.ports_available),
        ]
    }
}

impl fmt::Display for PrerequisiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (label, passed) in self.checks() {
            let mark = if passed { "ok" } else { "FAIL" };
            writeln!(f, "[{mark:>4}] {label}")?;
        }
        if self.all_passed {
            write!(f, "all prerequisites satisfied")
        } else {
            write!(f, "\n{}", format_missing(&self.missing))
        }
    }
}

/// Run every check in order. Never fails and never changes the host.
pub fn check_prerequisites(
    resolver: &ConfigResolver,
    runner: &dyn CommandRunner,
) -> PrerequisiteReport {
    let mut missing = Vec::new();

    let installed = docker_installed(runner);
    if !installed {
        missing.push(MissingPrereq::new(
            "docker",
            "container runtime for the engine",
            "install Docker: https://docs.docker.com/get-docker/",
        ));
    }

    let running = installed
        && match daemon_status(runner) {
            DaemonStatus::Running => true,
            DaemonStatus::PermissionDenied => {
                missing.push(MissingPrereq::new(
                    "docker access",
                    "talk to the Docker daemon as a member of the docker group",
                    "sudo usermod -aG docker $USER && newgrp docker",
                ));
                false
            }
            DaemonStatus::NotRunning(_) | DaemonStatus::Unavailable => {
                missing.push(MissingPrereq::new(
                    "docker daemon",
                    "run the engine container (or launch Docker Desktop)",
                    "sudo systemctl start docker",
                ));
                false
            }
        };

    let compose = detect_compose_tool(runner).is_some();
    if !compose {
        missing.push(MissingPrereq::new(
            "docker compose",
            "create the engine container",
            "install the Compose plugin: https://docs.docker.com/compose/install/",
        ));
    }

    let credentials = resolver.password().is_ok();
    if !credentials {
        missing.push(MissingPrereq::new(
            PASSWORD_VAR,
            "engine credentials",
            format!("export {PASSWORD_VAR}='<choose a strong password>'"),
        ));
    }

    let compose_file = resolver.compose_file();
    let compose_file_exists = compose_file.exists();
    if !compose_file_exists {
        missing.push(MissingPrereq::new(
            "compose file",
            "engine container definition",
            format!(
                "create {} (see docker/docker-compose.neo4j.yml) or set NEO4J_COMPOSE_FILE",
                compose_file.display()
            ),
        ));
    }

    let ports = check_ports(resolver, runner, running, &mut missing);

    let issues: Vec<String> = missing.iter().map(|m| m.remediation.clone()).collect();
    PrerequisiteReport {
        docker_installed: installed,
        docker_running: running,
        compose_available: compose,
        credentials_set: credentials,
        compose_file_exists,
        ports_available: ports,
        all_passed: issues.is_empty(),
        issues,
        missing,
    }
}

/// Both ports bindable, or held by our own running container.
fn check_ports(
    resolver: &ConfigResolver,
    runner: &dyn CommandRunner,
    docker_running: bool,
    missing: &mut Vec<MissingPrereq>,
) -> bool {
    let (bolt, http) = match resolver.ports() {
        Ok(ports) => ports,
        Err(e) => {
            let setting = e.setting().unwrap_or("NEO4J_BOLT_PORT/NEO4J_HTTP_PORT").to_owned();
            missing.push(MissingPrereq::new(
                setting,
                "engine ports",
                e.to_string(),
            ));
            return false;
        }
    };
    let busy: Vec<(&str, u16)> = [("NEO4J_BOLT_PORT", bolt), ("NEO4J_HTTP_PORT", http)]
        .into_iter()
        .filter(|&(_, port)| !port_available(port))
        .collect();
    if busy.is_empty() {
        return true;
    }
    let ours = docker_running
        && matches!(
            inspect_process(runner, &resolver.container_name()),
            Ok(ProcessState::Up(_))
        );
    if ours {
        return true;
    }
    for (var, port) in busy {
        missing.push(MissingPrereq::new(
            format!("port {port}"),
            "engine endpoint",
            format!("port {port} is in use by another process: free it or set {var} to a free port"),
        ));
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphmem_config::EnvVars;
    use graphmem_runtime::MockRuntime;
    use std::net::TcpListener;
    use std::path::Path;

    /// Two distinct ports that were free a moment ago.
    fn free_ports() -> (u16, u16) {
        let a = TcpListener::bind("127.0.0.1:0").unwrap();
        let b = TcpListener::bind("127.0.0.1:0").unwrap();
        (
            a.local_addr().unwrap().port(),
            b.local_addr().unwrap().port(),
        )
    }

    fn project(with_compose_file: bool) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".graphmem")).unwrap();
        if with_compose_file {
            std::fs::create_dir_all(dir.path().join("docker")).unwrap();
            std::fs::write(dir.path().join("docker/docker-compose.neo4j.yml"), "services: {}\n")
                .unwrap();
        }
        dir
    }

    fn resolver(root: &Path, extra: &[(&str, String)]) -> ConfigResolver {
        let (bolt, http) = free_ports();
        let mut env = EnvVars::from_pairs([
            ("NEO4J_BOLT_PORT", bolt.to_string()),
            ("NEO4J_HTTP_PORT", http.to_string()),
        ]);
        for (k, v) in extra {
            env.set(*k, v.clone());
        }
        ConfigResolver::new(env, root)
    }

    fn with_password(root: &Path) -> ConfigResolver {
        resolver(root, &[("NEO4J_PASSWORD", "pw".to_owned())])
    }

    #[test]
    fn all_pass_on_healthy_host() {
        let dir = project(true);
        let report = check_prerequisites(&with_password(dir.path()), &MockRuntime::new());
        assert!(report.all_passed, "{report}");
        assert!(report.issues.is_empty());
        assert_eq!(report.primary_issue(), None);
    }

    #[test]
    fn missing_docker_fails_dependent_checks() {
        let dir = project(true);
        let runtime = MockRuntime::new().without_docker();
        let report = check_prerequisites(&with_password(dir.path()), &runtime);
        assert!(!report.docker_installed);
        assert!(!report.docker_running);
        assert!(!report.compose_available);
        assert!(!report.all_passed);
        assert!(report
            .primary_issue()
            .unwrap()
            .contains("https://docs.docker.com/get-docker/"));
    }

    #[test]
    fn permission_denied_suggests_docker_group() {
        let dir = project(true);
        let runtime = MockRuntime::new().with_permission_denied();
        let report = check_prerequisites(&with_password(dir.path()), &runtime);
        assert!(report.docker_installed);
        assert!(!report.docker_running);
        assert_eq!(
            report.primary_issue(),
            Some("sudo usermod -aG docker $USER && newgrp docker")
        );
    }

    #[test]
    fn stopped_daemon_is_reported() {
        let dir = project(true);
        let runtime = MockRuntime::new().with_daemon_stopped();
        let report = check_prerequisites(&with_password(dir.path()), &runtime);
        assert!(!report.docker_running);
        assert_eq!(report.primary_issue(), Some("sudo systemctl start docker"));
        assert!(report.to_string().contains("docker daemon (run the engine container"));
    }

    #[test]
    fn missing_password_and_compose_file() {
        let dir = project(false);
        let report = check_prerequisites(&resolver(dir.path(), &[]), &MockRuntime::new());
        assert!(!report.credentials_set);
        assert!(!report.compose_file_exists);
        assert_eq!(report.issues.len(), 2);
        assert_eq!(
            report.issues[0],
            "export NEO4J_PASSWORD='<choose a strong password>'"
        );
        assert!(report.issues[1].contains("docker-compose.neo4j.yml"));
    }

    #[test]
    fn standalone_compose_is_enough() {
        let dir = project(true);
        let runtime = MockRuntime::new().with_compose(false, true);
        let report = check_prerequisites(&with_password(dir.path()), &runtime);
        assert!(report.compose_available);
        let runtime = MockRuntime::new().with_compose(false, false);
        let report = check_prerequisites(&with_password(dir.path()), &runtime);
        assert!(!report.compose_available);
    }

    #[test]
    fn busy_port_fails_unless_engine_holds_it() {
        let dir = project(true);
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let busy = listener.local_addr().unwrap().port();
        let r = resolver(
            dir.path(),
            &[
                ("NEO4J_PASSWORD", "pw".to_owned()),
                ("NEO4J_HTTP_PORT", busy.to_string()),
            ],
        );

        let report = check_prerequisites(&r, &MockRuntime::new());
        assert!(!report.ports_available);
        assert!(report.primary_issue().unwrap().contains("NEO4J_HTTP_PORT"));

        let runtime = MockRuntime::new().with_container("graphmem-neo4j", true);
        let report = check_prerequisites(&r, &runtime);
        assert!(report.ports_available, "{report}");
    }

    #[test]
    fn conflicting_ports_are_reported() {
        let dir = project(true);
        let port = free_ports().0.to_string();
        let r = resolver(
            dir.path(),
            &[
                ("NEO4J_PASSWORD", "pw".to_owned()),
                ("NEO4J_BOLT_PORT", port.clone()),
                ("NEO4J_HTTP_PORT", port),
            ],
        );
        let report = check_prerequisites(&r, &MockRuntime::new());
        assert!(!report.ports_available);
        assert!(report.primary_issue().unwrap().contains("must differ"));
    }

    #[test]
    fn report_serializes_without_internal_list() {
        let dir = project(false);
        let report = check_prerequisites(&resolver(dir.path(), &[]), &MockRuntime::new());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["all_passed"], false);
        assert_eq!(json["issues"].as_array().unwrap().len(), 2);
        assert!(json.get("missing").is_none());
        assert!(report.to_string().contains("[FAIL] NEO4J_PASSWORD set"));
    }
}
