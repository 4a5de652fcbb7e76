use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use uuid::Uuid;

use hectoc_core::protocol::{
    now_ms, Envelope, GameEndPayload, GameStartPayload, GameStatePayload, GameStatus, GameType,
    MatchFoundPayload, MessageType, OpponentInfo, PlayerState, ProgressPayload, PuzzleInfo,
    SolutionSubmittedPayload,
};
use hectoc_core::validation::{self, ValidationResult};
use hectoc_core::{eval, Puzzle};

use crate::db;
use crate::error::AppError;
use crate::matchmaker::QueueEntry;
use crate::practice;
use crate::rating;
use crate::state::AppState;

/// Empty waiting rooms are considered deserted after this long.
const DESERTED_WAITING: Duration = Duration::from_secs(60);
/// Rooms stuck in waiting are dropped after this long regardless.
const MAX_WAITING: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct PlayerSlot {
    pub username: String,
    pub rating: i32,
    pub progress: f64,
    pub submission: Option<String>,
    pub solve_time: Option<f64>,
    pub is_correct: Option<bool>,
    pub score: Option<f64>,
    pub rating_delta: Option<i32>,
    pub attempts: u32,
    pub finished_at: Option<Instant>,
}

impl PlayerSlot {
    fn new(username: String, rating: i32) -> PlayerSlot {
        PlayerSlot {
            username,
            rating,
            progress: 0.0,
            submission: None,
            solve_time: None,
            is_correct: None,
            score: None,
            rating_delta: None,
            attempts: 0,
            finished_at: None,
        }
    }
}

/// In-memory session for one duel. Mutations happen under the rooms map's
/// per-entry lock; the status only ever moves forward.
#[derive(Debug, Clone)]
pub struct DuelRoom {
    pub game_id: String,
    pub puzzle: PuzzleInfo,
    pub status: GameStatus,
    pub game_type: GameType,
    pub created_at: Instant,
    pub started_at: Option<Instant>,
    pub started_at_ms: Option<i64>,
    pub completed_at: Option<Instant>,
    pub last_activity: Instant,
    pub players: HashMap<i64, PlayerSlot>,
    pub winner_id: Option<i64>,
}

impl DuelRoom {
    fn new(game_id: String, puzzle: &Puzzle) -> DuelRoom {
        let now = Instant::now();
        DuelRoom {
            game_id,
            puzzle: PuzzleInfo {
                id: puzzle.id.clone(),
                sequence: puzzle.sequence.clone(),
                difficulty: puzzle.difficulty,
            },
            status: GameStatus::Waiting,
            game_type: GameType::Duel,
            created_at: now,
            started_at: None,
            started_at_ms: None,
            completed_at: None,
            last_activity: now,
            players: HashMap::new(),
            winner_id: None,
        }
    }

    fn start(&mut self) {
        self.status = GameStatus::Active;
        self.started_at = Some(Instant::now());
        self.started_at_ms = Some(now_ms());
        self.last_activity = Instant::now();
    }

    pub fn player_states(&self) -> Vec<PlayerState> {
        self.players
            .iter()
            .map(|(id, slot)| PlayerState {
                user_id: id.to_string(),
                username: slot.username.clone(),
                progress: slot.progress,
                is_correct: slot.is_correct,
                score: slot.score,
            })
            .collect()
    }

    pub fn snapshot(&self) -> GameStatePayload {
        GameStatePayload {
            status: self.status,
            players: self.player_states(),
            started_at: self.started_at_ms,
            puzzle: self.puzzle.clone(),
        }
    }

    fn all_finished(&self) -> bool {
        !self.players.is_empty() && self.players.values().all(|s| s.finished_at.is_some())
    }

    /// Highest score wins; ties go to the earlier finisher.
    fn pick_winner(&self) -> Option<i64> {
        self.players
            .iter()
            .filter(|(_, s)| s.is_correct == Some(true))
            .max_by(|(_, a), (_, b)| {
                let score_a = a.score.unwrap_or(0.0);
                let score_b = b.score.unwrap_or(0.0);
                score_a
                    .partial_cmp(&score_b)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| {
                        // Later Instant means slower; invert.
                        b.finished_at.cmp(&a.finished_at)
                    })
            })
            .map(|(id, _)| *id)
    }
}

/// Guard that a user is free to enter a new game.
fn ensure_unengaged(state: &AppState, user_id: i64) -> Result<(), AppError> {
    if state.active_games.contains_key(&user_id) {
        return Err(AppError::Conflict("already in a game".into()));
    }
    Ok(())
}

/// Orchestrator create: route by game type. Duels open a waiting room;
/// practice starts a solo session.
pub async fn create_game(
    state: &Arc<AppState>,
    user_id: i64,
    game_type: GameType,
) -> Result<String, AppError> {
    match game_type {
        GameType::Duel => create_duel(state, user_id).await,
        GameType::Practice => practice::start_session(state, user_id, false, None).await,
    }
}

async fn create_duel(state: &Arc<AppState>, user_id: i64) -> Result<String, AppError> {
    ensure_unengaged(state, user_id)?;
    let user = db::retry(|| db::get_user(&state.db, user_id))
        .await?
        .ok_or(AppError::NotFound("player"))?;

    let puzzle = state.store.get_for_rating(user.rating).await?;
    let game_id = Uuid::new_v4().to_string();

    db::insert_game(
        &state.db,
        &game_id,
        &puzzle.id,
        &puzzle.sequence,
        GameType::Duel.as_str(),
        puzzle.difficulty,
    )
    .await?;
    db::insert_game_player(&state.db, &game_id, user_id).await?;

    let mut room = DuelRoom::new(game_id.clone(), &puzzle);
    room.players
        .insert(user_id, PlayerSlot::new(user.username, user.rating));
    state.rooms.insert(game_id.clone(), room);
    state.active_games.insert(user_id, game_id.clone());

    tracing::info!(%game_id, user_id, "duel created");
    Ok(game_id)
}

/// Matchmaker commit path: both players land in one fresh game, already
/// active.
pub async fn create_duel_for_pair(
    state: &Arc<AppState>,
    a: &QueueEntry,
    b: &QueueEntry,
) -> Result<String, AppError> {
    ensure_unengaged(state, a.user_id)?;
    ensure_unengaged(state, b.user_id)?;

    let midpoint = (a.rating + b.rating) / 2;
    let puzzle = state.store.get_for_rating(midpoint).await?;
    let game_id = Uuid::new_v4().to_string();

    db::insert_game(
        &state.db,
        &game_id,
        &puzzle.id,
        &puzzle.sequence,
        GameType::Duel.as_str(),
        puzzle.difficulty,
    )
    .await?;
    db::insert_game_player(&state.db, &game_id, a.user_id).await?;
    db::insert_game_player(&state.db, &game_id, b.user_id).await?;
    db::set_game_started(&state.db, &game_id).await?;

    let mut room = DuelRoom::new(game_id.clone(), &puzzle);
    room.players
        .insert(a.user_id, PlayerSlot::new(a.username.clone(), a.rating));
    room.players
        .insert(b.user_id, PlayerSlot::new(b.username.clone(), b.rating));
    room.start();
    let start_payload = GameStartPayload {
        status: GameStatus::Active,
        started_at: room.started_at_ms.unwrap_or_else(now_ms),
        puzzle: room.puzzle.clone(),
    };
    state.rooms.insert(game_id.clone(), room);
    state.active_games.insert(a.user_id, game_id.clone());
    state.active_games.insert(b.user_id, game_id.clone());

    state.broadcast(
        &game_id,
        Envelope::new(
            MessageType::GameStart,
            serde_json::to_value(&start_payload).unwrap_or_default(),
        )
        .with_game(&game_id),
    );

    tracing::info!(%game_id, a = a.user_id, b = b.user_id, "duel paired");
    Ok(game_id)
}

/// Custom game: queue bypass. The creator picks the opponents; everyone is
/// seated immediately.
pub async fn create_custom_game(
    state: &Arc<AppState>,
    creator_id: i64,
    opponent_ids: &[i64],
    game_type: GameType,
) -> Result<String, AppError> {
    if game_type != GameType::Duel {
        return Err(AppError::Invalid("custom games must be duels".into()));
    }
    if opponent_ids.is_empty() {
        return Err(AppError::Invalid("no opponents given".into()));
    }

    let mut users = Vec::new();
    for &id in std::iter::once(&creator_id).chain(opponent_ids) {
        ensure_unengaged(state, id)?;
        let user = db::retry(|| db::get_user(&state.db, id))
            .await?
            .ok_or(AppError::NotFound("player"))?;
        users.push(user);
    }

    let creator_rating = users[0].rating;
    let puzzle = state.store.get_for_rating(creator_rating).await?;
    let game_id = Uuid::new_v4().to_string();

    db::insert_game(
        &state.db,
        &game_id,
        &puzzle.id,
        &puzzle.sequence,
        game_type.as_str(),
        puzzle.difficulty,
    )
    .await?;

    let mut room = DuelRoom::new(game_id.clone(), &puzzle);
    for user in &users {
        db::insert_game_player(&state.db, &game_id, user.id).await?;
        room.players
            .insert(user.id, PlayerSlot::new(user.username.clone(), user.rating));
    }
    db::set_game_started(&state.db, &game_id).await?;
    room.start();
    state.rooms.insert(game_id.clone(), room);
    for user in &users {
        state.active_games.insert(user.id, game_id.clone());
    }

    // Invited players learn about the game the same way queued ones do.
    for user in users.iter().skip(1) {
        let payload = MatchFoundPayload {
            game_id: game_id.clone(),
            game_type,
            opponent: OpponentInfo {
                user_id: users[0].id.to_string(),
                username: users[0].username.clone(),
                rating: users[0].rating,
            },
            ranked: false,
        };
        state.send_to(
            user.id,
            Envelope::new(
                MessageType::MatchFound,
                serde_json::to_value(&payload).unwrap_or_default(),
            )
            .with_game(&game_id)
            .with_user(user.id.to_string()),
        );
    }

    tracing::info!(%game_id, creator_id, "custom duel created");
    Ok(game_id)
}

/// Duel join. Present players are re-admitted as a no-op; the second
/// distinct player flips the room to active.
pub async fn join_game(
    state: &Arc<AppState>,
    game_id: &str,
    user_id: i64,
) -> Result<(), AppError> {
    {
        let room = state.rooms.get(game_id).ok_or(AppError::NotFound("game"))?;
        if room.players.contains_key(&user_id) {
            return Ok(());
        }
        if room.status != GameStatus::Waiting {
            return Err(AppError::NotActive);
        }
    }
    ensure_unengaged(state, user_id)?;

    let user = db::retry(|| db::get_user(&state.db, user_id))
        .await?
        .ok_or(AppError::NotFound("player"))?;
    db::insert_game_player(&state.db, game_id, user_id).await?;

    let started = {
        let mut room = state.rooms.get_mut(game_id).ok_or(AppError::NotFound("game"))?;
        if room.status != GameStatus::Waiting {
            return Err(AppError::NotActive);
        }
        room.players
            .insert(user_id, PlayerSlot::new(user.username, user.rating));
        room.last_activity = Instant::now();
        if room.players.len() >= 2 {
            room.start();
            Some(GameStartPayload {
                status: GameStatus::Active,
                started_at: room.started_at_ms.unwrap_or_else(now_ms),
                puzzle: room.puzzle.clone(),
            })
        } else {
            None
        }
    };

    state.active_games.insert(user_id, game_id.to_string());

    if let Some(payload) = started {
        if let Err(e) = db::set_game_started(&state.db, game_id).await {
            tracing::error!(game_id, "failed to persist game start: {}", e);
        }
        state.broadcast(
            game_id,
            Envelope::new(
                MessageType::GameStart,
                serde_json::to_value(&payload).unwrap_or_default(),
            )
            .with_game(game_id),
        );
        tracing::info!(game_id, user_id, "duel started");
    }
    Ok(())
}

/// What the submission pipeline decided while the room lock was held.
struct SubmitOutcome {
    result: ValidationResult,
    solve_secs: f64,
    completed: Option<GameEndPayload>,
    winner_id: Option<i64>,
    attempts: u32,
    progress: f64,
}

/// Submission pipeline. Validation is memoized by (puzzle, expression);
/// side effects after a successful validation are best-effort.
pub async fn submit(
    state: &Arc<AppState>,
    game_id: &str,
    user_id: i64,
    solution: &str,
) -> Result<ValidationResult, AppError> {
    // Phase 1: read enough to validate without holding the room lock.
    let (puzzle_id, sequence, difficulty, rating, solve_secs) = {
        let room = state.rooms.get(game_id).ok_or(AppError::NotFound("game"))?;
        if room.status != GameStatus::Active {
            return Err(AppError::NotActive);
        }
        let slot = room.players.get(&user_id).ok_or(AppError::Unauthorized)?;
        if slot.finished_at.is_some() {
            return Err(AppError::Conflict("already submitted a correct solution".into()));
        }
        let solve_secs = room
            .started_at
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        (
            room.puzzle.id.clone(),
            room.puzzle.sequence.clone(),
            room.puzzle.difficulty,
            slot.rating,
            solve_secs,
        )
    };

    let normalized = eval::normalize(solution);
    let memo_key = (puzzle_id.clone(), normalized);
    let result = match state.validation_memo.get(&memo_key) {
        Some(mut hit) => {
            // Rating delta depends on this player's rating and clock.
            hit.rating_delta = if hit.is_correct {
                hectoc_core::elo::rating_delta(rating, difficulty, solve_secs)
            } else {
                0
            };
            hit
        }
        None => {
            let fresh = validation::validate(&sequence, difficulty, solution, rating, solve_secs);
            state.validation_memo.insert(memo_key, fresh.clone());
            fresh
        }
    };

    // Phase 2: apply to the room under its lock.
    let outcome = {
        let mut room = state.rooms.get_mut(game_id).ok_or(AppError::NotFound("game"))?;
        if room.status != GameStatus::Active {
            return Err(AppError::NotActive);
        }
        let slot = room.players.get_mut(&user_id).ok_or(AppError::Unauthorized)?;
        if slot.finished_at.is_some() {
            return Err(AppError::Conflict("already submitted a correct solution".into()));
        }

        slot.attempts += 1;
        slot.submission = Some(solution.to_string());
        slot.solve_time = Some(solve_secs);
        slot.is_correct = Some(result.is_correct);

        let attempts = slot.attempts;
        let progress;
        if result.is_correct {
            slot.finished_at = Some(Instant::now());
            slot.score = Some(result.score);
            slot.rating_delta = Some(result.rating_delta);
            slot.progress = 1.0;
            progress = 1.0;
        } else {
            slot.progress = (0.1 * attempts as f64).min(0.8);
            progress = slot.progress;
        }
        room.last_activity = Instant::now();

        let (completed, winner_id) = if result.is_correct && room.all_finished() {
            let winner = room.pick_winner();
            room.status = GameStatus::Completed;
            room.completed_at = Some(Instant::now());
            room.winner_id = winner;
            (
                Some(GameEndPayload {
                    winner_id: winner.map(|w| w.to_string()),
                    players: room.player_states(),
                }),
                winner,
            )
        } else {
            (None, None)
        };

        SubmitOutcome {
            result: result.clone(),
            solve_secs,
            completed,
            winner_id,
            attempts,
            progress,
        }
    };

    // Phase 3: persistence, ratings, stats, broadcasts. The validation
    // result is delivered even when these fail.
    if let Err(e) = db::update_game_player(
        &state.db,
        game_id,
        user_id,
        solution,
        Some(outcome.solve_secs),
        outcome.result.is_correct,
        outcome.result.is_correct.then_some(outcome.result.score),
        outcome.result.is_correct.then_some(outcome.result.rating_delta),
        outcome.attempts,
        outcome.result.is_correct,
    )
    .await
    {
        tracing::error!(game_id, user_id, "failed to persist slot: {}", e);
    }

    if outcome.result.is_correct {
        if let Err(e) =
            rating::apply_correct(&state.db, user_id, outcome.result.rating_delta, outcome.solve_secs)
                .await
        {
            tracing::error!(user_id, "rating update failed: {}", e);
        }
        if let Err(e) = state
            .store
            .update_stats(&puzzle_id, outcome.solve_secs, true)
            .await
        {
            tracing::error!(%puzzle_id, "puzzle stats update failed: {}", e);
        }

        let payload = SolutionSubmittedPayload {
            is_correct: true,
            score: Some(outcome.result.score),
            solution: solution.to_string(),
        };
        state.broadcast(
            game_id,
            Envelope::new(
                MessageType::SolutionSubmitted,
                serde_json::to_value(&payload).unwrap_or_default(),
            )
            .with_game(game_id)
            .with_user(user_id.to_string()),
        );
    } else {
        if let Err(e) = state
            .store
            .update_stats(&puzzle_id, outcome.solve_secs, false)
            .await
        {
            tracing::error!(%puzzle_id, "puzzle stats update failed: {}", e);
        }
        state.broadcast(
            game_id,
            Envelope::new(
                MessageType::PlayerProgress,
                serde_json::to_value(&ProgressPayload {
                    progress: outcome.progress,
                })
                .unwrap_or_default(),
            )
            .with_game(game_id)
            .with_user(user_id.to_string()),
        );
    }

    if let Some(end) = outcome.completed {
        finish_game(state, game_id, outcome.winner_id, end).await;
    }

    Ok(outcome.result)
}

/// Progress report from a client, fanned out to the room.
pub fn report_progress(state: &Arc<AppState>, game_id: &str, user_id: i64, progress: f64) {
    let progress = progress.clamp(0.0, 1.0);
    if let Some(mut room) = state.rooms.get_mut(game_id) {
        if room.status != GameStatus::Active {
            return;
        }
        if let Some(slot) = room.players.get_mut(&user_id) {
            // Progress never regresses past a correct solve.
            if slot.finished_at.is_none() {
                slot.progress = progress;
            }
        }
        room.last_activity = Instant::now();
    } else {
        return;
    }
    state.broadcast(
        game_id,
        Envelope::new(
            MessageType::PlayerProgress,
            json!({ "progress": progress }),
        )
        .with_game(game_id)
        .with_user(user_id.to_string()),
    );
}

async fn finish_game(
    state: &Arc<AppState>,
    game_id: &str,
    winner_id: Option<i64>,
    end: GameEndPayload,
) {
    let duration = state
        .rooms
        .get(game_id)
        .and_then(|r| r.started_at)
        .map(|t| t.elapsed().as_secs() as i64)
        .unwrap_or(0);

    if let Err(e) = db::set_game_completed(&state.db, game_id, winner_id, duration).await {
        tracing::error!(game_id, "failed to persist completion: {}", e);
    }

    let player_ids: Vec<i64> = state
        .rooms
        .get(game_id)
        .map(|r| r.players.keys().copied().collect())
        .unwrap_or_default();
    for id in player_ids {
        state.active_games.remove(&id);
    }

    state.broadcast(
        game_id,
        Envelope::new(
            MessageType::GameEnd,
            serde_json::to_value(&end).unwrap_or_default(),
        )
        .with_game(game_id),
    );
    tracing::info!(game_id, ?winner_id, "duel completed");
}

/// Snapshot for HTTP reads: the live room when present, the durable record
/// once the room is gone.
pub async fn snapshot(state: &Arc<AppState>, game_id: &str) -> Result<GameStatePayload, AppError> {
    if let Some(room) = state.rooms.get(game_id) {
        return Ok(room.snapshot());
    }

    let game = db::retry(|| db::get_game(&state.db, game_id))
        .await?
        .ok_or(AppError::NotFound("game"))?;
    let players = db::retry(|| db::get_game_players(&state.db, game_id)).await?;

    Ok(GameStatePayload {
        status: GameStatus::parse(&game.status).unwrap_or(GameStatus::Abandoned),
        players: players
            .into_iter()
            .map(|p| PlayerState {
                user_id: p.user_id.to_string(),
                username: p.username,
                progress: if p.finished { 1.0 } else { 0.0 },
                is_correct: p.is_correct,
                score: p.score,
            })
            .collect(),
        started_at: None,
        puzzle: PuzzleInfo {
            id: game.puzzle_id,
            sequence: game.puzzle_sequence,
            difficulty: hectoc_core::Difficulty::from_level(game.difficulty as u8)
                .unwrap_or(hectoc_core::Difficulty::D1),
        },
    })
}

/// Room sweep: forfeit idle duels, abandon deserted ones, drop rooms whose
/// retention window has passed. Runs periodically; failures are logged and
/// never stop the sweep.
pub async fn cleanup(state: &Arc<AppState>) {
    let now = Instant::now();
    let mut to_remove: Vec<String> = Vec::new();
    let mut to_abandon: Vec<String> = Vec::new();
    let mut to_forfeit: Vec<String> = Vec::new();

    for entry in state.rooms.iter() {
        let room = entry.value();
        match room.status {
            GameStatus::Waiting => {
                let deserted = now.duration_since(room.created_at) > DESERTED_WAITING
                    && !state.room_members.contains_key(&room.game_id);
                if deserted || now.duration_since(room.created_at) > MAX_WAITING {
                    to_abandon.push(room.game_id.clone());
                }
            }
            GameStatus::Active => {
                if now.duration_since(room.last_activity) > state.config.idle_game_limit {
                    if room.players.values().any(|s| s.finished_at.is_some()) {
                        to_forfeit.push(room.game_id.clone());
                    } else {
                        to_abandon.push(room.game_id.clone());
                    }
                }
            }
            GameStatus::Completed => {
                let done_for = room
                    .completed_at
                    .map(|t| now.duration_since(t))
                    .unwrap_or_default();
                if done_for > state.config.completed_room_ttl {
                    to_remove.push(room.game_id.clone());
                }
            }
            GameStatus::Abandoned => to_remove.push(room.game_id.clone()),
        }
    }

    for game_id in to_forfeit {
        forfeit_unfinished(state, &game_id).await;
    }

    for game_id in to_abandon {
        let player_ids: Vec<i64> = {
            match state.rooms.get_mut(&game_id) {
                Some(mut room) => {
                    room.status = GameStatus::Abandoned;
                    room.players.keys().copied().collect()
                }
                None => continue,
            }
        };
        for id in player_ids {
            state.active_games.remove(&id);
        }
        if let Err(e) = db::set_game_abandoned(&state.db, &game_id).await {
            tracing::error!(%game_id, "failed to persist abandonment: {}", e);
        }
        state.rooms.remove(&game_id);
        tracing::info!(%game_id, "duel abandoned");
    }

    for game_id in to_remove {
        state.rooms.remove(&game_id);
    }
}

/// Idle-timeout forfeit: somebody solved it, the rest ran out the clock.
async fn forfeit_unfinished(state: &Arc<AppState>, game_id: &str) {
    let (end, winner_id, losers) = {
        let mut room = match state.rooms.get_mut(game_id) {
            Some(r) => r,
            None => return,
        };
        if room.status != GameStatus::Active {
            return;
        }
        let losers: Vec<i64> = room
            .players
            .iter()
            .filter(|(_, s)| s.finished_at.is_none())
            .map(|(id, _)| *id)
            .collect();
        let winner = room.pick_winner();
        room.status = GameStatus::Completed;
        room.completed_at = Some(Instant::now());
        room.winner_id = winner;
        (
            GameEndPayload {
                winner_id: winner.map(|w| w.to_string()),
                players: room.player_states(),
            },
            winner,
            losers,
        )
    };

    for loser in losers {
        if let Err(e) = rating::record_incorrect(&state.db, loser).await {
            tracing::error!(user_id = loser, "forfeit stats update failed: {}", e);
        }
    }
    finish_game(state, game_id, winner_id, end).await;
    tracing::info!(game_id, "idle duel forfeited");
}
