use super::{
    colorize_status, json_pretty, logs_hint, spin_fail, spin_ok, Context, EXIT_SUCCESS,
    EXIT_UNAVAILABLE,
};

pub fn run(ctx: &Context, wait_for_ready: bool) -> Result<u8, String> {
    let config = ctx.config_with_compose()?;
    let hint = logs_hint(&config);
    let manager = ctx.manager(config);

    let pb = ctx.progress("restarting Neo4j memory engine...");
    let restarted = manager.restart(wait_for_ready);
    let status = manager.status();
    if restarted {
        spin_ok(pb.as_ref(), &format!("engine {}", colorize_status(status)));
    } else {
        spin_fail(pb.as_ref(), "restart failed");
    }

    if ctx.json {
        let json = serde_json::json!({ "restarted": restarted, "status": status });
        println!("{}", json_pretty(&json)?);
    } else if !restarted {
        eprintln!("{hint}");
    }

    Ok(if restarted {
        EXIT_SUCCESS
    } else {
        EXIT_UNAVAILABLE
    })
}
