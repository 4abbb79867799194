mod api;
mod client;
mod commands;
mod config;
mod domain;
mod server;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "cadence",
    version,
    about = "Fleet-wide concurrency governor for OS update operations"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the cadence daemon (REST + GraphQL + reconciliation loop)
    Daemon {
        /// HTTP listen address (overrides config)
        #[arg(long)]
        http_addr: Option<String>,

        /// Log level (overrides config)
        #[arg(long)]
        log_level: Option<String>,

        /// Maximum simultaneously active nodes (overrides config)
        #[arg(long)]
        max_cluster_active: Option<usize>,

        /// Path to config file (default: ~/.config/cadence/config.yaml)
        #[arg(long)]
        config: Option<String>,
    },

    /// Evaluate the admission policy for one intent, without a daemon
    Check {
        /// Lifecycle state, e.g. `pending-prepare-update`
        state: String,

        /// Update availability (`true`, `false`, `unknown`) for `stabilized`
        #[arg(long)]
        update_available: Option<String>,

        /// Nodes currently active across the fleet
        #[arg(long)]
        cluster_active: usize,

        /// Fleet size
        #[arg(long)]
        cluster_count: usize,

        /// Maximum simultaneously active nodes (overrides config)
        #[arg(long)]
        max_cluster_active: Option<usize>,
    },

    /// Show the active/gated classification of every lifecycle state
    Classify,

    /// Query a cadence daemon's REST API
    Query {
        /// Target daemon (from config nodes map; defaults to localhost)
        #[arg(long, global = true)]
        daemon: Option<String>,

        /// Output format (table or json)
        #[arg(long, global = true, default_value = "table")]
        format: String,

        #[command(subcommand)]
        command: commands::query::QueryCommands,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon {
            http_addr,
            log_level,
            max_cluster_active,
            config,
        } => commands::daemon::run(http_addr, log_level, max_cluster_active, config),
        Commands::Check {
            state,
            update_available,
            cluster_active,
            cluster_count,
            max_cluster_active,
        } => commands::check::run(
            &state,
            update_available,
            cluster_active,
            cluster_count,
            max_cluster_active,
        ),
        Commands::Classify => commands::classify::run(),
        Commands::Query {
            daemon,
            format,
            command,
        } => commands::query::run(daemon.as_deref(), &format, &command),
    }
}
