pub mod completions;
pub mod config;
pub mod doctor;
pub mod ensure;
pub mod health;
pub mod logs;
pub mod restart;
pub mod schema;
pub mod start;
pub mod status;
pub mod stop;

use graphmem_config::{ComposeTool, Config, ConfigError, ConfigResolver};
use graphmem_core::ContainerManager;
use graphmem_runtime::{CommandRunner, ContainerStatus, SystemRunner};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_UNAVAILABLE: u8 = 3;

/// What every command runs against: where settings come from and how
/// external programs are invoked.
pub struct Context {
    pub resolver: ConfigResolver,
    pub runner: Arc<dyn CommandRunner>,
    pub json: bool,
}

impl Context {
    pub fn new(resolver: ConfigResolver, runner: Arc<dyn CommandRunner>, json: bool) -> Self {
        Self {
            resolver,
            runner,
            json,
        }
    }

    pub fn from_process(json: bool) -> Self {
        Self::new(
            ConfigResolver::from_process(),
            Arc::new(SystemRunner::new()),
            json,
        )
    }

    /// Resolved config for commands that never invoke compose.
    pub fn config(&self) -> Result<Config, String> {
        self.resolver
            .resolve_with_tool(ComposeTool::Plugin)
            .map_err(config_error)
    }

    /// Resolved config including compose-tool detection, for commands that
    /// may have to create the container.
    pub fn config_with_compose(&self) -> Result<Config, String> {
        self.resolver
            .resolve(self.runner.as_ref())
            .map_err(config_error)
    }

    pub fn manager(&self, config: Config) -> ContainerManager {
        ContainerManager::new(Arc::new(config), Arc::clone(&self.runner))
    }

    /// A spinner for human output; nothing in JSON mode.
    pub fn progress(&self, msg: &str) -> Option<ProgressBar> {
        if self.json {
            None
        } else {
            Some(spinner(msg))
        }
    }
}

pub fn config_error(e: ConfigError) -> String {
    format!("configuration error: {e}")
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        style("{spinner:.cyan} {msg}")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: Option<&ProgressBar>, msg: &str) {
    if let Some(pb) = pb {
        pb.set_style(style("{msg}"));
        pb.finish_with_message(format!("✓ {msg}"));
    }
}

pub fn spin_fail(pb: Option<&ProgressBar>, msg: &str) {
    if let Some(pb) = pb {
        pb.set_style(style("{msg}"));
        pb.finish_with_message(format!("✗ {msg}"));
    }
}

pub fn colorize_status(status: ContainerStatus) -> String {
    use console::Style;
    let text = status.as_str();
    match status {
        ContainerStatus::Running => Style::new().green().bold().apply_to(text).to_string(),
        ContainerStatus::Unhealthy => Style::new().red().apply_to(text).to_string(),
        ContainerStatus::Stopped => Style::new().yellow().apply_to(text).to_string(),
        ContainerStatus::NotFound => Style::new().dim().apply_to(text).to_string(),
    }
}

/// Hint printed after lifecycle failures.
pub fn logs_hint(config: &Config) -> String {
    format!(
        "inspect the engine output with `graphmem logs` (container {})",
        config.container_name
    )
}

#[cfg(test)]
pub(crate) mod fixture {
    use super::Context;
    use graphmem_config::{ConfigResolver, EnvVars};
    use graphmem_runtime::{CommandRunner, MockRuntime};
    use std::sync::Arc;

    pub const NAME: &str = "graphmem-cli-test";

    pub struct Fixture {
        pub ctx: Context,
        pub mock: Arc<MockRuntime>,
        _dir: tempfile::TempDir,
    }

    pub fn fixture(mock: MockRuntime, password: Option<&str>) -> Fixture {
        let mut env = vec![
            ("NEO4J_HTTP_PORT", "47474"),
            ("NEO4J_BOLT_PORT", "47687"),
        ];
        if let Some(password) = password {
            env.push(("NEO4J_PASSWORD", password));
        }
        fixture_with_env(mock, &env)
    }

    pub fn fixture_with_env(mock: MockRuntime, pairs: &[(&str, &str)]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        let mut env = EnvVars::from_pairs([("NEO4J_CONTAINER_NAME", NAME)]);
        for (key, value) in pairs {
            env.set(*key, *value);
        }
        let mock = Arc::new(mock);
        let ctx = Context::new(
            ConfigResolver::new(env, dir.path()),
            Arc::clone(&mock) as Arc<dyn CommandRunner>,
            true,
        );
        Fixture {
            ctx,
            mock,
            _dir: dir,
        }
    }
}
