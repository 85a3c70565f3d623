use super::{
    colorize_status, json_pretty, logs_hint, spin_fail, spin_ok, Context, EXIT_SUCCESS,
    EXIT_UNAVAILABLE,
};

pub fn run(ctx: &Context, wait_for_ready: bool) -> Result<u8, String> {
    let config = ctx.config_with_compose()?;
    let hint = logs_hint(&config);
    let http_url = config.http_url();
    let manager = ctx.manager(config);

    let pb = ctx.progress("starting Neo4j memory engine...");
    let started = manager.start(wait_for_ready);
    let status = manager.status();

    if started {
        spin_ok(pb.as_ref(), &format!("engine {} at {http_url}", colorize_status(status)));
    } else {
        spin_fail(pb.as_ref(), "engine failed to start");
    }

    if ctx.json {
        let json = serde_json::json!({
            "started": started,
            "status": status,
            "http_url": http_url,
        });
        println!("{}", json_pretty(&json)?);
    } else if !started {
        eprintln!("{hint}");
    }

    Ok(if started { EXIT_SUCCESS } else { EXIT_UNAVAILABLE })
}
