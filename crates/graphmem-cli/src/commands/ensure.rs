use super::{
    json_pretty, spin_fail, spin_ok, Context, EXIT_CONFIG_ERROR, EXIT_FAILURE, EXIT_SUCCESS,
    EXIT_UNAVAILABLE,
};
use graphmem_core::{Bootstrapper, StartupOutcome};
use std::sync::Arc;
use std::time::Duration;

pub fn run(ctx: &Context, timeout_secs: Option<u64>) -> Result<u8, String> {
    let bootstrapper = Bootstrapper::new(ctx.resolver.clone(), Arc::clone(&ctx.runner));
    let pb = ctx.progress("ensuring Neo4j memory engine is running...");
    let handle = bootstrapper.spawn();
    let outcome = match timeout_secs {
        Some(secs) => handle.wait_timeout(Duration::from_secs(secs)),
        None => Some(handle.wait()),
    };

    let Some(outcome) = outcome else {
        spin_fail(pb.as_ref(), "startup still in progress");
        return Err(format!(
            "engine unavailable: startup did not finish within {}s",
            timeout_secs.unwrap_or_default()
        ));
    };

    if outcome.is_ready() {
        spin_ok(pb.as_ref(), "engine ready");
    } else {
        spin_fail(pb.as_ref(), &outcome.to_string());
    }

    if ctx.json {
        let json = serde_json::json!({
            "ready": outcome.is_ready(),
            "outcome": outcome.to_string(),
        });
        println!("{}", json_pretty(&json)?);
    } else if let StartupOutcome::SkippedPrerequisites { issues } = &outcome {
        for issue in issues {
            eprintln!("  {issue}");
        }
    }

    Ok(exit_code(&outcome))
}

fn exit_code(outcome: &StartupOutcome) -> u8 {
    match outcome {
        StartupOutcome::Ready => EXIT_SUCCESS,
        StartupOutcome::ConfigInvalid(_) => EXIT_CONFIG_ERROR,
        StartupOutcome::EngineUnavailable => EXIT_UNAVAILABLE,
        StartupOutcome::SkippedPrerequisites { .. } | StartupOutcome::SchemaFailed => EXIT_FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::fixture::fixture;
    use graphmem_runtime::MockRuntime;

    #[test]
    fn outcomes_map_to_exit_codes() {
        assert_eq!(exit_code(&StartupOutcome::Ready), EXIT_SUCCESS);
        assert_eq!(
            exit_code(&StartupOutcome::ConfigInvalid("x".into())),
            EXIT_CONFIG_ERROR
        );
        assert_eq!(exit_code(&StartupOutcome::EngineUnavailable), EXIT_UNAVAILABLE);
        assert_eq!(exit_code(&StartupOutcome::SchemaFailed), EXIT_FAILURE);
    }

    #[test]
    fn skipped_without_docker() {
        let f = fixture(MockRuntime::new().without_docker(), Some("pw"));
        assert_eq!(run(&f.ctx, Some(10)).unwrap(), EXIT_FAILURE);
        assert_eq!(f.mock.count("up"), 0);
    }
}
