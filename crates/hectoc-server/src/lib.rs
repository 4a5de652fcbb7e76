pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod game;
pub mod matchmaker;
pub mod practice;
pub mod rating;
pub mod routes;
pub mod state;
pub mod store;
pub mod ws;

use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use dashmap::DashMap;
use sqlx::sqlite::SqlitePoolOptions;
use tower_http::cors::CorsLayer;

use crate::cache::TtlCache;
use crate::config::ServerConfig;
use crate::matchmaker::Matchmaker;
use crate::state::AppState;
use crate::store::PuzzleStore;

/// How often the validator memo entries stay warm.
const MEMO_TTL: Duration = Duration::from_secs(60 * 60);
const MEMO_CAPACITY: usize = 1000;

/// Room and practice-session sweeps run at this cadence.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

/// Build a fully configured Router + shared state, with the background
/// loops already running.
pub async fn build_app(config: ServerConfig) -> (Router, Arc<AppState>) {
    // A shared in-memory SQLite splits per connection; keep it on one.
    let max_db_connections = if config.database_url.contains(":memory:") {
        1
    } else {
        5
    };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_db_connections)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to SQLite");

    db::init_db(&pool)
        .await
        .expect("Failed to initialize database");

    let state = Arc::new(AppState {
        db: pool.clone(),
        store: PuzzleStore::new(pool, &config.cache),
        matchmaker: Matchmaker::new(config.matchmaking.clone()),
        rooms: DashMap::new(),
        practice: DashMap::new(),
        connections: DashMap::new(),
        room_members: DashMap::new(),
        active_games: DashMap::new(),
        validation_memo: TtlCache::new(MEMO_CAPACITY, MEMO_TTL),
        connection_count: AtomicU32::new(0),
        config,
    });

    spawn_background_tasks(state.clone());

    let app = Router::new()
        .route("/health", get(routes::health))
        .route("/auth/guest", post(routes::auth_guest))
        .route("/api/games", post(routes::create_game))
        .route("/api/games/{id}", get(routes::get_game))
        .route("/api/games/{id}/join", post(routes::join_game))
        .route("/api/games/{id}/submit", post(routes::submit))
        .route(
            "/api/matchmaking/queue",
            post(routes::queue_join).delete(routes::queue_leave),
        )
        .route("/api/matchmaking/queue/status", get(routes::queue_status))
        .route("/api/matchmaking/custom", post(routes::custom_game))
        .route("/api/puzzles", get(routes::list_puzzles))
        .route("/api/puzzles/user", get(routes::puzzle_for_user))
        .route("/api/puzzles/{id}/validate", post(routes::validate_puzzle))
        .route("/leaderboard", get(routes::leaderboard))
        .route("/profile/{username}", get(routes::profile))
        .route("/ws/game/{id}", get(routes::ws_upgrade))
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    (app, state)
}

/// Matchmaker pairing tick, queue expiry sweep, and room/practice GC.
/// Each loop logs and continues; a single bad game never takes one down.
fn spawn_background_tasks(state: Arc<AppState>) {
    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(state.config.matchmaking.pass_interval);
            loop {
                interval.tick().await;
                matchmaker::run_pass(&state).await;
            }
        });
    }

    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(state.config.matchmaking.sweep_interval);
            loop {
                interval.tick().await;
                matchmaker::run_sweep(&state).await;
            }
        });
    }

    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                game::cleanup(&state).await;
                practice::sweep(&state).await;
            }
        });
    }
}
