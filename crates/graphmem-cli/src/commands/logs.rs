use super::{json_pretty, Context, EXIT_SUCCESS};

pub fn run(ctx: &Context, tail: usize) -> Result<u8, String> {
    let config = ctx.config()?;
    let name = config.container_name.clone();
    let output = ctx.manager(config).logs(tail);

    if ctx.json {
        let json = serde_json::json!({ "container": name, "tail": tail, "logs": output });
        println!("{}", json_pretty(&json)?);
    } else {
        print!("{output}");
        if !output.ends_with('\n') {
            println!();
        }
    }
    Ok(EXIT_SUCCESS)
}
