use super::{json_pretty, Context, EXIT_FAILURE, EXIT_SUCCESS};
use graphmem_core::prereq::check_prerequisites;
use graphmem_core::PrerequisiteReport;
use graphmem_runtime::ContainerStatus;
use serde::Serialize;

pub fn run(ctx: &Context) -> Result<u8, String> {
    let report = check_prerequisites(&ctx.resolver, ctx.runner.as_ref());
    let mut checks = prereq_checks(&report);
    if report.all_passed {
        check_engine(ctx, &mut checks);
    }
    print_results(&checks, &report, ctx.json)
}

fn prereq_checks(report: &PrerequisiteReport) -> Vec<Check> {
    report
        .checks()
        .into_iter()
        .map(|(label, passed)| {
            if passed {
                Check::pass(label, label)
            } else {
                Check::fail(label, label)
            }
        })
        .collect()
}

fn check_engine(ctx: &Context, checks: &mut Vec<Check>) {
    let config = match ctx.config() {
        Ok(config) => config,
        Err(e) => {
            checks.push(Check::fail("configuration", &e));
            return;
        }
    };
    let name = config.container_name.clone();
    match ctx.manager(config).status() {
        ContainerStatus::Running => {
            checks.push(Check::pass("engine", &format!("{name} is running and healthy")));
        }
        ContainerStatus::Unhealthy => checks.push(Check::warn(
            "engine",
            &format!("{name} is up but not answering queries (see `graphmem logs`)"),
        )),
        ContainerStatus::Stopped => checks.push(Check::info(
            "engine",
            &format!("{name} is stopped (`graphmem start` resumes it)"),
        )),
        ContainerStatus::NotFound => checks.push(Check::info(
            "engine",
            &format!("{name} does not exist yet (`graphmem start` creates it)"),
        )),
    }
}

fn print_results(
    checks: &[Check],
    report: &PrerequisiteReport,
    json_output: bool,
) -> Result<u8, String> {
    let all_pass = !checks.iter().any(|c| c.status == "fail");
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "prerequisites": report,
            "checks": checks,
        });
        println!("{}", json_pretty(&json)?);
    } else {
        println!("graphmem doctor\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        if !report.issues.is_empty() {
            println!("\nTo fix:");
            for issue in &report.issues {
                println!("  {issue}");
            }
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

#[derive(Debug, Serialize)]
struct Check {
    name: String,
    status: &'static str,
    message: String,
}

impl Check {
    fn new(name: &str, status: &'static str, message: &str) -> Self {
        Self {
            name: name.to_owned(),
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::fixture::fixture;
    use graphmem_runtime::MockRuntime;

    #[test]
    fn missing_docker_fails_with_remediation() {
        let f = fixture(MockRuntime::new().without_docker(), Some("pw"));
        let report = check_prerequisites(&f.ctx.resolver, f.ctx.runner.as_ref());
        let checks = prereq_checks(&report);
        assert_eq!(checks.len(), 6);
        assert_eq!(checks[0].status, "fail");
        assert_eq!(checks[1].status, "fail");
        assert!(report.primary_issue().unwrap().contains("install Docker"));
        assert_eq!(run(&f.ctx).unwrap(), EXIT_FAILURE);
    }

    #[test]
    fn missing_password_is_reported_not_raised() {
        let f = fixture(MockRuntime::new(), None);
        let report = check_prerequisites(&f.ctx.resolver, f.ctx.runner.as_ref());
        let checks = prereq_checks(&report);
        let creds = checks.iter().find(|c| c.name == "NEO4J_PASSWORD set").unwrap();
        assert_eq!(creds.status, "fail");
        assert!(report
            .issues
            .iter()
            .any(|issue| issue.contains("export NEO4J_PASSWORD")));
    }
}
