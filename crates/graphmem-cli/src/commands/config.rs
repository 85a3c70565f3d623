use super::{json_pretty, Context, EXIT_SUCCESS};

pub fn run(ctx: &Context) -> Result<u8, String> {
    let config = ctx.config_with_compose()?;

    if ctx.json {
        println!("{}", json_pretty(&config)?);
        return Ok(EXIT_SUCCESS);
    }

    let rows = [
        ("uri", config.uri.clone()),
        ("host", config.host.clone()),
        ("user", config.user.clone()),
        ("password", "********".to_owned()),
        ("bolt_port", config.bolt_port.to_string()),
        ("http_port", config.http_port.to_string()),
        ("database", config.database.clone()),
        ("container_name", config.container_name.clone()),
        ("image", config.image.clone()),
        ("compose_file", config.compose_file.display().to_string()),
        ("compose_tool", config.compose_tool.to_string()),
        ("project_root", config.project_root.display().to_string()),
        ("schema_dir", config.schema_dir.display().to_string()),
        ("heap_size", config.heap_size.clone()),
        ("page_cache", config.page_cache.clone()),
        ("startup_timeout", format!("{:?}", config.startup_timeout)),
        ("health_check_interval", format!("{:?}", config.health_check_interval)),
        ("http_timeout", format!("{:?}", config.http_timeout)),
    ];
    for (key, value) in rows {
        println!("{key:<22} {value}");
    }
    Ok(EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::fixture::fixture;
    use graphmem_runtime::MockRuntime;

    #[test]
    fn prints_resolved_config() {
        let f = fixture(MockRuntime::new(), Some("pw"));
        assert_eq!(run(&f.ctx).unwrap(), EXIT_SUCCESS);
    }

    #[test]
    fn json_never_contains_password() {
        let f = fixture(MockRuntime::new(), Some("very-secret"));
        let config = f.ctx.config().unwrap();
        assert!(!json_pretty(&config).unwrap().contains("very-secret"));
    }
}
