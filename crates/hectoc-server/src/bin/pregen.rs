use std::process::ExitCode;

use clap::Parser;
use sqlx::sqlite::SqlitePoolOptions;
use tracing_subscriber::EnvFilter;

use hectoc_core::Difficulty;
use hectoc_server::config::{CacheConfig, ServerConfig};
use hectoc_server::db;
use hectoc_server::store::PuzzleStore;

/// Pre-generate Hectoc puzzles into the durable store.
#[derive(Debug, Parser)]
#[command(name = "pregen")]
struct Args {
    /// Target puzzle count per difficulty.
    #[arg(long, default_value_t = 10)]
    count: i64,

    /// Difficulty level 1..5, or 0 for all levels.
    #[arg(long, default_value_t = 0)]
    difficulty: u8,

    /// Delete every stored puzzle before generating.
    #[arg(long)]
    clean: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if args.difficulty > 5 {
        tracing::error!("--difficulty must be 0..5");
        return ExitCode::FAILURE;
    }

    let config = ServerConfig::from_env();
    let pool = match SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("failed to open {}: {}", config.database_url, e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = db::init_db(&pool).await {
        tracing::error!("failed to initialize schema: {}", e);
        return ExitCode::FAILURE;
    }

    let store = PuzzleStore::new(pool, &CacheConfig::default());

    if args.clean {
        match store.clean().await {
            Ok(removed) => tracing::info!(removed, "cleared stored puzzles"),
            Err(e) => {
                tracing::error!("clean failed: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    let result = match Difficulty::from_level(args.difficulty) {
        Some(difficulty) => store.pre_generate_level(difficulty, args.count).await,
        None => store.pre_generate(args.count).await,
    };

    match result {
        Ok(created) => {
            tracing::info!(created, "pre-generation complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("pre-generation failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
