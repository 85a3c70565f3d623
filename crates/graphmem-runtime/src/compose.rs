use crate::command::{CommandRunner, Invocation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Timeout for `compose version` checks.
pub const VERSION_TIMEOUT: Duration = Duration::from_secs(5);

/// The two ways Docker Compose can be invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComposeTool {
    /// `docker compose` (Compose v2 CLI plugin).
    Plugin,
    /// `docker-compose` (legacy standalone binary).
    Standalone,
}

impl ComposeTool {
    /// Detection order: the plugin form is preferred.
    pub const ALL: [ComposeTool; 2] = [ComposeTool::Plugin, ComposeTool::Standalone];

    pub fn base_command(self) -> &'static [&'static str] {
        match self {
            ComposeTool::Plugin => &["docker", "compose"],
            ComposeTool::Standalone => &["docker-compose"],
        }
    }

    /// Build a compose invocation with `args` appended to the base command.
    pub fn invocation<I, S>(self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv: Vec<String> = self
            .base_command()
            .iter()
            .map(|s| (*s).to_owned())
            .collect();
        argv.extend(args.into_iter().map(Into::into));
        Invocation::new(argv)
    }
}

impl fmt::Display for ComposeTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base_command().join(" "))
    }
}

/// Find which compose form answers `version`, preferring the plugin.
pub fn detect_compose_tool(runner: &dyn CommandRunner) -> Option<ComposeTool> {
    for tool in ComposeTool::ALL {
        match runner.run(&tool.invocation(["version"]), VERSION_TIMEOUT) {
            Ok(out) if out.success() => {
                debug!("compose tool detected: {tool}");
                return Some(tool);
            }
            Ok(out) => debug!("'{tool} version' unusable: {}", out.failure_detail()),
            Err(e) => debug!("'{tool} version' unusable: {e}"),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRuntime;

    #[test]
    fn invocation_prefixes_base_command() {
        let inv = ComposeTool::Plugin.invocation(["-f", "x.yml", "up", "-d"]);
        assert_eq!(inv.args, ["docker", "compose", "-f", "x.yml", "up", "-d"]);
        let inv = ComposeTool::Standalone.invocation(["version"]);
        assert_eq!(inv.args, ["docker-compose", "version"]);
    }

    #[test]
    fn prefers_plugin_when_both_exist() {
        let runtime = MockRuntime::new().with_compose(true, true);
        assert_eq!(detect_compose_tool(&runtime), Some(ComposeTool::Plugin));
    }

    #[test]
    fn falls_back_to_standalone() {
        let runtime = MockRuntime::new().with_compose(false, true);
        assert_eq!(detect_compose_tool(&runtime), Some(ComposeTool::Standalone));
    }

    #[test]
    fn none_when_neither_answers() {
        let runtime = MockRuntime::new().with_compose(false, false);
        assert_eq!(detect_compose_tool(&runtime), None);
    }

    #[test]
    fn serde_names() {
        assert_eq!(
            serde_json::to_string(&ComposeTool::Standalone).unwrap(),
            "\"standalone\""
        );
        assert_eq!(ComposeTool::Plugin.to_string(), "docker compose");
    }
}
