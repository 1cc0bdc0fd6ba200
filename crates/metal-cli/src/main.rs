//! Metal CLI - deploy applications to the metal platform.

mod archive;
mod client;
mod commands;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "metal")]
#[command(about = "Deploy applications to the metal platform")]
#[command(version)]
struct Cli {
    /// Base URL of the API server.
    #[arg(long, global = true)]
    api_base_url: Option<String>,

    /// Bearer token for the API.
    #[arg(long, global = true)]
    api_token: Option<String>,

    /// Path to a config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the team the configured token belongs to
    Whoami,

    /// Upload an application source tree for deployment
    Up {
        /// Source directory (defaults to the current directory)
        path: Option<PathBuf>,

        /// App to deploy; overrides the project file
        #[arg(long)]
        app_id: Option<String>,

        /// Environment to deploy into; overrides the project file
        #[arg(long)]
        env_id: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match config::CliConfig::load(
        cli.config.as_deref(),
        cli.api_base_url.clone(),
        cli.api_token.clone(),
    ) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let result: Result<(), anyhow::Error> = match cli.command {
        Commands::Whoami => commands::whoami::run(&config).await,
        Commands::Up {
            path,
            app_id,
            env_id,
        } => commands::up::run(&config, path, app_id, env_id).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
