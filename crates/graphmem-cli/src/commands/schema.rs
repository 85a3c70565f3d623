use super::{json_pretty, spin_fail, spin_ok, Context, EXIT_FAILURE, EXIT_SUCCESS};
use graphmem_config::Config;
use graphmem_db::{Connector, SchemaManager, SchemaScripts};
use std::path::Path;

/// Open a connector and make sure the engine answers before any schema work.
fn connect(config: &Config) -> Result<Connector, String> {
    let conn = Connector::open(config);
    if conn.verify_connectivity() {
        Ok(conn)
    } else {
        Err(format!(
            "engine unavailable: no answer from {} (start it with `graphmem start`)",
            config.http_url()
        ))
    }
}

pub fn init(ctx: &Context, scripts_dir: Option<&Path>) -> Result<u8, String> {
    let config = ctx.config()?;
    let scripts = match scripts_dir {
        Some(dir) => SchemaScripts::load_dir(dir).map_err(|e| e.to_string())?,
        None => SchemaScripts::builtin(),
    };
    let conn = connect(&config)?;

    let pb = ctx.progress(&format!("applying {} schema statements...", scripts.len()));
    let statements = scripts.len();
    let applied = SchemaManager::with_scripts(&conn, scripts).initialize_schema();
    if applied {
        spin_ok(pb.as_ref(), "schema initialized");
    } else {
        spin_fail(pb.as_ref(), "schema initialization failed (see log output)");
    }

    if ctx.json {
        let json = serde_json::json!({ "initialized": applied, "statements": statements });
        println!("{}", json_pretty(&json)?);
    }
    Ok(if applied { EXIT_SUCCESS } else { EXIT_FAILURE })
}

pub fn verify(ctx: &Context) -> Result<u8, String> {
    let config = ctx.config()?;
    let conn = connect(&config)?;
    let verification = SchemaManager::new(&conn)
        .verify()
        .map_err(|e| format!("schema verification failed: {e}"))?;
    let complete = verification.is_complete();

    if ctx.json {
        let json = serde_json::json!({ "complete": complete, "details": verification });
        println!("{}", json_pretty(&json)?);
    } else {
        for name in &verification.missing_constraints {
            println!("  ✗ missing constraint {name}");
        }
        for name in &verification.missing_indexes {
            println!("  ✗ missing index {name}");
        }
        if verification.agent_types < verification.expected_agent_types {
            println!(
                "  ✗ {} of {} agent types seeded",
                verification.agent_types, verification.expected_agent_types
            );
        }
        if complete {
            println!("schema complete");
        } else {
            println!("schema incomplete: run `graphmem schema init`");
        }
    }
    Ok(if complete { EXIT_SUCCESS } else { EXIT_FAILURE })
}

pub fn status(ctx: &Context) -> Result<u8, String> {
    let config = ctx.config()?;
    let conn = Connector::open(&config);
    let status = SchemaManager::new(&conn).schema_status();

    if ctx.json {
        println!("{}", json_pretty(&status)?);
    } else if let Some(err) = &status.error {
        println!("schema status unavailable: {err}");
    } else {
        println!("constraints ({}):", status.constraints.len());
        for name in &status.constraints {
            println!("  {name}");
        }
        println!("indexes ({}):", status.indexes.len());
        for name in &status.indexes {
            println!("  {name}");
        }
        println!("nodes:");
        for (label, count) in &status.node_counts {
            println!("  {label:<16} {count}");
        }
    }

    match status.error {
        Some(err) => Err(format!("engine unavailable: {err}")),
        None => Ok(EXIT_SUCCESS),
    }
}
