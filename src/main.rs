mod api;
mod cli;
mod config;
mod db;
mod models;
mod services;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

#[derive(Parser)]
#[command(name = "courtsight")]
#[command(about = "Player season stats and similar-player search")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Serve {
        #[arg(short, long, default_value = "8000")]
        port: u16,
    },
    /// Initialize the database
    InitDb,
    /// Load season stat files into the database
    Seed {
        #[arg(short, long = "file", required = true)]
        files: Vec<PathBuf>,
        /// Clear existing players and stats first
        #[arg(long)]
        reset: bool,
    },
    /// Build and publish the similarity model
    BuildModel {
        /// Season files to build from; the database is used when none are given
        #[arg(short, long = "file")]
        files: Vec<PathBuf>,
        /// Output directory (defaults to MODEL_DIR)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Find the player seasons most similar to one player's season
    Similar {
        #[arg(long)]
        first: String,
        #[arg(long)]
        last: String,
        #[arg(short, long)]
        season: String,
        #[arg(short)]
        k: Option<usize>,
    },
    /// List stored players
    Players {
        #[arg(long, default_value = "0")]
        skip: i64,
        #[arg(short, long, default_value = "100")]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve { port }) => {
            tracing::info!("Starting Courtsight API server on port {}", port);
            api::serve(config, port).await?;
        }
        Some(Commands::InitDb) => {
            tracing::info!("Initializing database...");
            db::init_database(&config.database_url).await?;
        }
        Some(Commands::Seed { files, reset }) => {
            tracing::info!("Seeding database from {} file(s)", files.len());
            cli::seed(&config, &files, reset).await?;
        }
        Some(Commands::BuildModel { files, out }) => {
            tracing::info!("Building similarity model...");
            cli::build_model(&config, &files, out).await?;
        }
        Some(Commands::Similar { first, last, season, k }) => {
            tracing::info!("Querying similar players for {} {} ({})", first, last, season);
            cli::show_similar(&config, &first, &last, &season, k).await?;
        }
        Some(Commands::Players { skip, limit }) => {
            cli::show_players(&config, skip, limit).await?;
        }
        None => {
            // Default to serving
            tracing::info!("Starting Courtsight API server on port 8000");
            api::serve(config, 8000).await?;
        }
    }

    Ok(())
}
