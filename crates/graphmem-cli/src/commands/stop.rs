use super::{json_pretty, logs_hint, spin_fail, spin_ok, Context, EXIT_FAILURE, EXIT_SUCCESS};
use std::time::Duration;

pub fn run(ctx: &Context, timeout_secs: u64) -> Result<u8, String> {
    let config = ctx.config()?;
    let hint = logs_hint(&config);
    let name = config.container_name.clone();
    let manager = ctx.manager(config);

    let pb = ctx.progress(&format!("stopping {name}..."));
    let stopped = manager.stop(Duration::from_secs(timeout_secs));
    if stopped {
        spin_ok(pb.as_ref(), &format!("stopped {name}"));
    } else {
        spin_fail(pb.as_ref(), &format!("failed to stop {name}"));
    }

    if ctx.json {
        let json = serde_json::json!({ "container": name, "stopped": stopped });
        println!("{}", json_pretty(&json)?);
    } else if !stopped {
        eprintln!("{hint}");
    }

    Ok(if stopped { EXIT_SUCCESS } else { EXIT_FAILURE })
}
