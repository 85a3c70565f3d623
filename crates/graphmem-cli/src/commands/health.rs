use super::{json_pretty, Context, EXIT_SUCCESS, EXIT_UNAVAILABLE};
use tracing::debug;

pub fn run(ctx: &Context) -> Result<u8, String> {
    let config = ctx.config()?;
    let url = config.http_url();
    let healthy = ctx.manager(config).is_healthy();
    debug!("health check against {url}: {healthy}");

    if ctx.json {
        let json = serde_json::json!({ "healthy": healthy, "http_url": url });
        println!("{}", json_pretty(&json)?);
    } else if healthy {
        println!("engine at {url} is answering queries");
    } else {
        println!("engine at {url} is not answering queries");
    }
    Ok(if healthy { EXIT_SUCCESS } else { EXIT_UNAVAILABLE })
}
