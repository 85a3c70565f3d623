mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{Context, EXIT_CONFIG_ERROR, EXIT_FAILURE, EXIT_UNAVAILABLE};
use graphmem_core::install_signal_handler;
use std::path::PathBuf;
use std::process::ExitCode;

const MAX_TIMEOUT_SECS: u64 = graphmem_config::MAX_DURATION.as_secs();

#[derive(Debug, Parser)]
#[command(
    name = "graphmem",
    version,
    about = "Lifecycle, schema and diagnostics for the graphmem Neo4j memory engine"
)]
struct Cli {
    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the engine container, creating it if needed.
    Start {
        /// Return as soon as the container is up instead of waiting for queries.
        #[arg(long, default_value_t = false)]
        no_wait: bool,
    },
    /// Stop the engine container.
    Stop {
        /// Seconds Docker gives the engine to shut down cleanly (at most one day).
        #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(0..=MAX_TIMEOUT_SECS))]
        timeout: u64,
    },
    /// Stop and start the engine container.
    Restart {
        /// Return as soon as the container is up instead of waiting for queries.
        #[arg(long, default_value_t = false)]
        no_wait: bool,
    },
    /// Show the engine container status.
    Status,
    /// Check whether the engine answers queries (exit 3 if not).
    Health,
    /// Print the engine container's recent log output.
    Logs {
        /// Number of lines from the end of the log.
        #[arg(long, default_value_t = 100)]
        tail: usize,
    },
    /// Apply, verify or inspect the graph schema.
    Schema {
        #[command(subcommand)]
        action: SchemaAction,
    },
    /// Run prerequisite checks on this host.
    Doctor,
    /// Print the resolved configuration (password redacted).
    Config,
    /// Run the full startup pipeline: prerequisites, start, schema.
    Ensure {
        /// Give up waiting after this many seconds (at most one day).
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..=MAX_TIMEOUT_SECS))]
        timeout: Option<u64>,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Debug, Subcommand)]
enum SchemaAction {
    /// Create constraints and indexes and seed agent types. Safe to repeat.
    Init {
        /// Read the schema scripts from this directory instead of the built-in copies.
        #[arg(long)]
        scripts: Option<PathBuf>,
    },
    /// Check that every expected constraint, index and seed exists.
    Verify,
    /// Show constraints, indexes and node counts.
    Status,
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("GRAPHMEM_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    install_signal_handler();

    let ctx = Context::from_process(cli.json);

    let result = match cli.command {
        Commands::Start { no_wait } => commands::start::run(&ctx, !no_wait),
        Commands::Stop { timeout } => commands::stop::run(&ctx, timeout),
        Commands::Restart { no_wait } => commands::restart::run(&ctx, !no_wait),
        Commands::Status => commands::status::run(&ctx),
        Commands::Health => commands::health::run(&ctx),
        Commands::Logs { tail } => commands::logs::run(&ctx, tail),
        Commands::Schema { action } => match action {
            SchemaAction::Init { scripts } => commands::schema::init(&ctx, scripts.as_deref()),
            SchemaAction::Verify => commands::schema::verify(&ctx),
            SchemaAction::Status => commands::schema::status(&ctx),
        },
        Commands::Doctor => commands::doctor::run(&ctx),
        Commands::Config => commands::config::run(&ctx),
        Commands::Ensure { timeout } => commands::ensure::run(&ctx, timeout),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("configuration error:") {
                EXIT_CONFIG_ERROR
            } else if msg.starts_with("engine unavailable:") {
                EXIT_UNAVAILABLE
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
