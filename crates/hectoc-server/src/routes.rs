use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use hectoc_core::protocol::GameType;
use hectoc_core::validation::ValidationResult;

use crate::db;
use crate::error::AppError;
use crate::game;
use crate::matchmaker::{self, QueueEntry, QueueStatus};
use crate::state::AppState;
use crate::ws;

// ── Health ──────────────────────────────────────────────────────────────

pub async fn health() -> &'static str {
    "ok"
}

// ── Auth ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct GuestAuthRequest {
    pub username: Option<String>,
}

/// Guest registration: create (or reuse) a named player and hand back a
/// session token, also set as a cookie.
pub async fn auth_guest(
    State(state): State<Arc<AppState>>,
    body: Option<Json<GuestAuthRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let username = body
        .and_then(|Json(b)| b.username)
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| {
            let mut suffix = Uuid::new_v4().simple().to_string();
            suffix.truncate(8);
            format!("guest_{}", suffix)
        });

    let user_id = db::retry(|| db::upsert_user(&state.db, &username)).await?;
    let token = db::create_session(&state.db, user_id).await?;
    let user = db::retry(|| db::get_user(&state.db, user_id))
        .await?
        .ok_or(AppError::NotFound("player"))?;

    let cookie = format!("session={}; Path=/; HttpOnly", token);
    let body = json!({
        "token": token,
        "user_id": user_id,
        "username": user.username,
        "rating": user.rating,
    });
    Ok(([(header::SET_COOKIE, cookie)], Json(body)))
}

/// Session lookup from the `session` cookie or a bearer token.
async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<(i64, String), AppError> {
    let token = session_token(headers).ok_or(AppError::Unauthorized)?;
    db::get_session(&state.db, &token)
        .await?
        .ok_or(AppError::Unauthorized)
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(cookies) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) {
        for part in cookies.split(';') {
            if let Some(value) = part.trim().strip_prefix("session=") {
                return Some(value.to_string());
            }
        }
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string())
}

// ── Games ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateGameRequest {
    pub game_type: GameType,
}

pub async fn create_game(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateGameRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (user_id, _) = authenticate(&state, &headers).await?;
    let game_id = game::create_game(&state, user_id, req.game_type).await?;
    Ok(Json(json!({ "game_id": game_id })))
}

pub async fn get_game(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(game_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    authenticate(&state, &headers).await?;
    let snapshot = game::snapshot(&state, &game_id).await?;
    Ok(Json(serde_json::to_value(&snapshot).unwrap_or_default()))
}

pub async fn join_game(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(game_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let (user_id, _) = authenticate(&state, &headers).await?;
    game::join_game(&state, &game_id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub solution: String,
}

pub async fn submit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(game_id): Path<String>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<ValidationResult>, AppError> {
    let (user_id, _) = authenticate(&state, &headers).await?;
    let result = game::submit(&state, &game_id, user_id, &req.solution).await?;
    Ok(Json(result))
}

// ── Matchmaking ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct QueueJoinRequest {
    pub game_type: GameType,
    #[serde(default)]
    pub ranked: bool,
}

pub async fn queue_join(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<QueueJoinRequest>,
) -> Result<Json<QueueStatus>, AppError> {
    let (user_id, username) = authenticate(&state, &headers).await?;
    if state.active_games.contains_key(&user_id) {
        return Err(AppError::Conflict("already in a game".into()));
    }
    let user = db::retry(|| db::get_user(&state.db, user_id))
        .await?
        .ok_or(AppError::NotFound("player"))?;

    state.matchmaker.join(QueueEntry {
        user_id,
        username,
        rating: user.rating,
        game_type: req.game_type,
        ranked: req.ranked,
        joined_at: std::time::Instant::now(),
    })?;

    // Fan out a pairing pass right away; the periodic tick covers the rest.
    matchmaker::run_pass(&state).await;

    Ok(Json(state.matchmaker.status(user_id)))
}

pub async fn queue_leave(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let (user_id, _) = authenticate(&state, &headers).await?;
    state.matchmaker.leave(user_id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn queue_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<QueueStatus>, AppError> {
    let (user_id, _) = authenticate(&state, &headers).await?;
    Ok(Json(state.matchmaker.status(user_id)))
}

#[derive(Debug, Deserialize)]
pub struct CustomGameRequest {
    pub opponent_ids: Vec<i64>,
    pub game_type: GameType,
}

pub async fn custom_game(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CustomGameRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (user_id, _) = authenticate(&state, &headers).await?;
    let game_id =
        game::create_custom_game(&state, user_id, &req.opponent_ids, req.game_type).await?;
    Ok(Json(json!({ "game_id": game_id })))
}

// ── Puzzles ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PuzzlePageQuery {
    pub difficulty: u8,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

/// Newest-first page of puzzles at one difficulty.
pub async fn list_puzzles(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(page): Query<PuzzlePageQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    authenticate(&state, &headers).await?;
    let difficulty = hectoc_core::Difficulty::from_level(page.difficulty)
        .ok_or_else(|| AppError::Invalid("difficulty must be 1..5".into()))?;
    let puzzles = state
        .store
        .get_by_difficulty(difficulty, page.limit.clamp(1, 100), page.offset.max(0))
        .await?;
    let entries: Vec<serde_json::Value> = puzzles
        .into_iter()
        .map(|p| {
            json!({
                "id": p.id,
                "sequence": p.sequence,
                "difficulty": p.difficulty,
                "solution_count": p.solution_count,
                "usage_count": p.usage_count,
                "success_rate": p.success_rate,
            })
        })
        .collect();
    Ok(Json(json!(entries)))
}

/// A puzzle matched to the caller's rating. Solutions stay server-side.
pub async fn puzzle_for_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    let (user_id, _) = authenticate(&state, &headers).await?;
    let user = db::retry(|| db::get_user(&state.db, user_id))
        .await?
        .ok_or(AppError::NotFound("player"))?;
    let puzzle = state.store.get_for_rating(user.rating).await?;
    Ok(Json(json!({
        "id": puzzle.id,
        "sequence": puzzle.sequence,
        "difficulty": puzzle.difficulty,
        "min_elo": puzzle.min_elo,
        "max_elo": puzzle.max_elo,
    })))
}

/// One-shot validation outside any game. Nothing is persisted.
pub async fn validate_puzzle(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(puzzle_id): Path<String>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<ValidationResult>, AppError> {
    let (user_id, _) = authenticate(&state, &headers).await?;
    let user = db::retry(|| db::get_user(&state.db, user_id))
        .await?
        .ok_or(AppError::NotFound("player"))?;
    let puzzle = state.store.get(&puzzle_id).await?;

    let memo_key = (puzzle.id.clone(), hectoc_core::eval::normalize(&req.solution));
    let result = match state.validation_memo.get(&memo_key) {
        Some(hit) => hit,
        None => {
            let fresh = hectoc_core::validate(
                &puzzle.sequence,
                puzzle.difficulty,
                &req.solution,
                user.rating,
                0.0,
            );
            state.validation_memo.insert(memo_key, fresh.clone());
            fresh
        }
    };
    Ok(Json(result))
}

// ── Leaderboard & profiles ──────────────────────────────────────────────

pub async fn leaderboard(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let rows = db::retry(|| db::get_leaderboard(&state.db, 100)).await?;
    let entries: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|r| {
            json!({
                "rank": r.rank,
                "username": r.username,
                "rating": r.rating,
                "games_played": r.games_played,
                "games_won": r.games_won,
            })
        })
        .collect();
    Ok(Json(json!(entries)))
}

pub async fn profile(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let user = db::retry(|| db::get_user_by_username(&state.db, &username))
        .await?
        .ok_or(AppError::NotFound("player"))?;
    Ok(Json(json!({
        "username": user.username,
        "rating": user.rating,
        "games_played": user.games_played,
        "games_won": user.games_won,
        "current_streak": user.current_streak,
        "max_streak": user.max_streak,
        "avg_solve_time": user.avg_solve_time,
    })))
}

// ── WebSocket upgrade ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

pub async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
    Path(game_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    let token = query
        .token
        .or_else(|| session_token(&headers))
        .ok_or(AppError::Unauthorized)?;
    let (user_id, username) = db::get_session(&state.db, &token)
        .await?
        .ok_or(AppError::Unauthorized)?;

    let current = state
        .connection_count
        .load(std::sync::atomic::Ordering::Relaxed);
    if current >= state.config.max_connections {
        return Err(AppError::Exhausted("connection limit reached".into()));
    }

    let user = db::retry(|| db::get_user(&state.db, user_id))
        .await?
        .ok_or(AppError::NotFound("player"))?;
    let rating = user.rating;

    Ok(ws.on_upgrade(move |socket| {
        ws::handle_socket(state, socket, user_id, username, rating, game_id)
    }))
}
