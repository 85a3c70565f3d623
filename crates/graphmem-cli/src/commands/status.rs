use super::{colorize_status, json_pretty, Context, EXIT_SUCCESS};
use graphmem_runtime::ContainerStatus;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct StatusReport {
    container: String,
    status: ContainerStatus,
    image: String,
    http_url: String,
    bolt_uri: String,
}

pub fn run(ctx: &Context) -> Result<u8, String> {
    let config = ctx.config()?;
    let mut report = StatusReport {
        container: config.container_name.clone(),
        status: ContainerStatus::NotFound,
        image: config.image.clone(),
        http_url: config.http_url(),
        bolt_uri: config.uri.clone(),
    };
    report.status = ctx.manager(config).status();

    if ctx.json {
        println!("{}", json_pretty(&report)?);
    } else {
        println!("container: {}", report.container);
        println!("status:    {}", colorize_status(report.status));
        println!("image:     {}", report.image);
        println!("http:      {}", report.http_url);
        println!("bolt:      {}", report.bolt_uri);
    }
    Ok(EXIT_SUCCESS)
}
