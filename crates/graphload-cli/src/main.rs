use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "graphload",
    about = "graphload: bulk loader for graph databases",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Work with graphload.toml
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a graphload.toml scaffold
    Init {
        /// Directory to write into (default: current directory)
        #[arg(short, long, default_value = ".")]
        path: String,
        /// Graph (space) the import targets
        #[arg(short, long, default_value = "basic")]
        graph: String,
        /// Overwrite an existing graphload.toml
        #[arg(long)]
        force: bool,
    },
    /// Parse and validate a configuration file
    Check {
        /// Path to graphload.toml
        #[arg(short, long, default_value = "graphload.toml")]
        path: String,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,graphload=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Init { path, graph, force } => {
                commands::config::init(&path, &graph, force)
            }
            ConfigAction::Check { path, format } => commands::config::check(&path, &format),
        },
    }
}
