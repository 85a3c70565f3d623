use crate::RuntimeError;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// A fully described external command: argv, working directory and extra
/// environment. `args[0]` is the program.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Invocation {
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
            env: Vec::new(),
        }
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str {
        self.args.first().map_or("", String::as_str)
    }

    /// Look up an environment override by key.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The command line as a single string, for log lines. Environment values
    /// are never included.
    pub fn display(&self) -> String {
        self.args.join(" ")
    }
}

/// Captured result of a finished (or killed) process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process did not exit on its own.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
            timed_out: false,
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
            timed_out: false,
        }
    }

    pub fn timeout() -> Self {
        Self {
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: true,
        }
    }

    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Short human description of why the command did not succeed.
    pub fn failure_detail(&self) -> String {
        if self.timed_out {
            return "timed out".to_owned();
        }
        let stderr = self.stderr.trim();
        let detail = if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        };
        match self.exit_code {
            Some(code) if detail.is_empty() => format!("exit code {code}"),
            Some(code) => format!("exit code {code}: {detail}"),
            None => format!("terminated by signal: {detail}"),
        }
    }
}

/// Seam between lifecycle logic and real processes.
///
/// Implementations must honour the timeout: a process still running at the
/// deadline is killed and reported with `timed_out = true`. An `Err` is
/// reserved for commands that could not be started at all.
pub trait CommandRunner: Send + Sync {
    fn run(&self, invocation: &Invocation, timeout: Duration)
        -> Result<CommandOutput, RuntimeError>;
}

/// Runs commands as child processes of the current process.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    fn run(
        &self,
        invocation: &Invocation,
        timeout: Duration,
    ) -> Result<CommandOutput, RuntimeError> {
        let (program, rest) = invocation
            .args
            .split_first()
            .ok_or(RuntimeError::EmptyCommand)?;

        let mut cmd = Command::new(program);
        cmd.args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(ref dir) = invocation.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }

        debug!("exec: {} (timeout {timeout:?})", invocation.display());
        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RuntimeError::CommandNotFound(program.clone())
            } else {
                RuntimeError::Spawn {
                    program: program.clone(),
                    source: e,
                }
            }
        })?;

        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        // No deadline when `timeout` is past the end of the clock.
        let deadline = Instant::now().checked_add(timeout);
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break Some(status);
            }
            let now = Instant::now();
            let remaining = deadline.map(|d| d.saturating_duration_since(now));
            if remaining == Some(Duration::ZERO) {
                warn!(
                    "'{}' did not finish within {timeout:?}, killing it",
                    invocation.display()
                );
                let _ = child.kill();
                let _ = child.wait();
                break None;
            }
            std::thread::sleep(remaining.map_or(POLL_INTERVAL, |r| POLL_INTERVAL.min(r)));
        };

        let Some(status) = status else {
            // Grandchildren may still hold the pipes open; leave the readers detached.
            return Ok(CommandOutput::timeout());
        };

        Ok(CommandOutput {
            exit_code: status.code(),
            stdout: stdout.map(join_reader).unwrap_or_default(),
            stderr: stderr.map(join_reader).unwrap_or_default(),
            timed_out: false,
        })
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_reader(handle: JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

/// Run `invocation` and turn a non-zero exit or timeout into an error.
pub fn run_ok(
    runner: &dyn CommandRunner,
    invocation: &Invocation,
    timeout: Duration,
) -> Result<CommandOutput, RuntimeError> {
    let output = runner.run(invocation, timeout)?;
    if output.success() {
        Ok(output)
    } else {
        Err(RuntimeError::CommandFailed {
            command: invocation.display(),
            detail: output.failure_detail(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_builder_and_display() {
        let inv = Invocation::new(["docker", "ps", "-a"])
            .current_dir("/tmp")
            .env("NEO4J_PASSWORD", "secret");
        assert_eq!(inv.program(), "docker");
        assert_eq!(inv.display(), "docker ps -a");
        assert_eq!(inv.env_value("NEO4J_PASSWORD"), Some("secret"));
        assert!(!inv.display().contains("secret"));
    }

    #[test]
    fn failure_detail_prefers_stderr() {
        let out = CommandOutput {
            exit_code: Some(1),
            stdout: "noise".to_owned(),
            stderr: "no such container\n".to_owned(),
            timed_out: false,
        };
        assert_eq!(out.failure_detail(), "exit code 1: no such container");
        assert_eq!(CommandOutput::timeout().failure_detail(), "timed out");
        assert!(!CommandOutput::timeout().success());
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_captures_output() {
        let out = SystemRunner::new()
            .run(
                &Invocation::new(["sh", "-c", "echo hello; echo oops >&2; exit 3"]),
                Duration::from_secs(10),
            )
            .unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
        assert!(!out.success());
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_passes_env_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let out = SystemRunner::new()
            .run(
                &Invocation::new(["sh", "-c", "echo $GRAPHMEM_MARKER; pwd"])
                    .current_dir(dir.path())
                    .env("GRAPHMEM_MARKER", "marker-value"),
                Duration::from_secs(10),
            )
            .unwrap();
        assert!(out.success());
        let mut lines = out.stdout.lines();
        assert_eq!(lines.next(), Some("marker-value"));
        let cwd = PathBuf::from(lines.next().unwrap());
        assert_eq!(cwd.canonicalize().unwrap(), dir.path().canonicalize().unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_accepts_unbounded_timeout() {
        let out = SystemRunner::new()
            .run(&Invocation::new(["sh", "-c", "exit 0"]), Duration::MAX)
            .unwrap();
        assert!(out.success());
        assert!(!out.timed_out);
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_kills_on_timeout() {
        let start = Instant::now();
        let out = SystemRunner::new()
            .run(
                &Invocation::new(["sleep", "5"]),
                Duration::from_millis(200),
            )
            .unwrap();
        assert!(out.timed_out);
        assert!(!out.success());
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn system_runner_reports_missing_program() {
        let err = SystemRunner::new()
            .run(
                &Invocation::new(["graphmem-definitely-not-a-real-binary"]),
                Duration::from_secs(1),
            )
            .unwrap_err();
        assert!(matches!(err, RuntimeError::CommandNotFound(_)));
    }

    #[test]
    fn empty_invocation_is_rejected() {
        let err = SystemRunner::new()
            .run(&Invocation::default(), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::EmptyCommand));
    }
}
