mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "bootgate",
    about = "Fail-closed host startup: wait for the database, bootstrap roles, migrate, then supervise",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: walk upward from the cwd looking for bootgate.yaml)
    #[arg(long, global = true, env = "BOOTGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Block until the database accepts connections or the attempt budget runs out
    WaitReady,

    /// Ensure the login role, its password, database ownership and schema grants
    BootstrapDb,

    /// Wait for the database, bootstrap it, then apply migrations
    Migrate,

    /// Start every unit in dependency order and supervise until Ctrl-C
    Up,

    /// Show what `up` would change relative to the last recorded status
    Plan,

    /// Show the last recorded unit status
    Status,

    /// Show the unit dependency graph in start order
    Graph,

    /// Inspect and validate the config
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Up | Commands::WaitReady | Commands::BootstrapDb | Commands::Migrate => {
            tracing::Level::INFO
        }
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = root::load(cli.config.as_deref()).and_then(|host| match cli.command {
        Commands::WaitReady => cmd::db::wait_ready(&host, cli.json),
        Commands::BootstrapDb => cmd::db::bootstrap(&host, cli.json),
        Commands::Migrate => cmd::db::migrate(&host, cli.json),
        Commands::Up => cmd::up::run(&host, cli.json),
        Commands::Plan => cmd::plan::run(&host, cli.json),
        Commands::Status => cmd::status::run(&host, cli.json),
        Commands::Graph => cmd::graph::run(&host, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&host, subcommand, cli.json),
    });

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
