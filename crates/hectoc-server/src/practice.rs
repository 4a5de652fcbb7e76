use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use uuid::Uuid;

use hectoc_core::protocol::{
    Envelope, GameType, MessageType, PracticeEndPayload, PracticeNextPuzzlePayload,
    PracticeResultPayload, PracticeStatus, PuzzleInfo,
};
use hectoc_core::validation::{self, ValidationResult};
use hectoc_core::eval;

use crate::db;
use crate::error::AppError;
use crate::rating;
use crate::state::AppState;

/// Timed mode fails a puzzle that took longer than this.
const TIMED_LIMIT_SECS: f64 = 60.0;

/// Solo adaptive loop: one player, one current puzzle, ELO advancing with
/// each correct solve.
#[derive(Debug, Clone)]
pub struct PracticeSession {
    pub game_id: String,
    pub user_id: i64,
    pub status: PracticeStatus,
    pub timed_mode: bool,
    pub elo: i32,
    pub puzzle: PuzzleInfo,
    pub puzzles_solved: u32,
    pub current_started: Instant,
    pub last_activity: Instant,
}

/// Begin a session. The starting ELO defaults to the player's rating.
pub async fn start_session(
    state: &Arc<AppState>,
    user_id: i64,
    timed_mode: bool,
    start_elo: Option<i32>,
) -> Result<String, AppError> {
    if state.practice.contains_key(&user_id) {
        return Err(AppError::Conflict("practice session already active".into()));
    }

    let user = db::retry(|| db::get_user(&state.db, user_id))
        .await?
        .ok_or(AppError::NotFound("player"))?;
    let elo = start_elo.unwrap_or(user.rating);

    let puzzle = state.store.get_for_rating(elo).await?;
    let game_id = Uuid::new_v4().to_string();

    db::insert_game(
        &state.db,
        &game_id,
        &puzzle.id,
        &puzzle.sequence,
        GameType::Practice.as_str(),
        puzzle.difficulty,
    )
    .await?;
    db::insert_game_player(&state.db, &game_id, user_id).await?;
    db::set_game_started(&state.db, &game_id).await?;

    let info = PuzzleInfo {
        id: puzzle.id.clone(),
        sequence: puzzle.sequence.clone(),
        difficulty: puzzle.difficulty,
    };
    let now = Instant::now();
    let session = PracticeSession {
        game_id: game_id.clone(),
        user_id,
        status: PracticeStatus::Active,
        timed_mode,
        elo,
        puzzle: info.clone(),
        puzzles_solved: 0,
        current_started: now,
        last_activity: now,
    };
    state.practice.insert(user_id, session);

    state.send_to(
        user_id,
        Envelope::new(
            MessageType::PracticeStart,
            json!({ "status": "active", "elo": elo, "timed_mode": timed_mode }),
        )
        .with_game(&game_id)
        .with_user(user_id.to_string()),
    );
    push_next_puzzle(state, user_id, &game_id, &info, elo, 0);

    tracing::info!(%game_id, user_id, timed_mode, "practice session started");
    Ok(game_id)
}

/// Submission in a practice session. Correct answers advance the ELO and
/// fetch the next puzzle; a slow wrong answer in timed mode fails the run.
pub async fn submit(
    state: &Arc<AppState>,
    user_id: i64,
    solution: &str,
) -> Result<ValidationResult, AppError> {
    let (game_id, sequence, difficulty, puzzle_id, elo, timed_mode, solve_secs) = {
        let mut session = state
            .practice
            .get_mut(&user_id)
            .ok_or(AppError::NotFound("practice session"))?;
        if session.status != PracticeStatus::Active {
            return Err(AppError::NotActive);
        }
        session.last_activity = Instant::now();
        (
            session.game_id.clone(),
            session.puzzle.sequence.clone(),
            session.puzzle.difficulty,
            session.puzzle.id.clone(),
            session.elo,
            session.timed_mode,
            session.current_started.elapsed().as_secs_f64(),
        )
    };

    let memo_key = (puzzle_id.clone(), eval::normalize(solution));
    let result = match state.validation_memo.get(&memo_key) {
        Some(mut hit) => {
            hit.rating_delta = if hit.is_correct {
                hectoc_core::elo::rating_delta(elo, difficulty, solve_secs)
            } else {
                0
            };
            hit
        }
        None => {
            let fresh = validation::validate(&sequence, difficulty, solution, elo, solve_secs);
            state.validation_memo.insert(memo_key, fresh.clone());
            fresh
        }
    };

    if let Err(e) = state
        .store
        .update_stats(&puzzle_id, solve_secs, result.is_correct)
        .await
    {
        tracing::error!(%puzzle_id, "puzzle stats update failed: {}", e);
    }

    if result.is_correct {
        let new_elo = elo + result.rating_delta;
        if let Err(e) = rating::apply_correct(&state.db, user_id, result.rating_delta, solve_secs).await
        {
            tracing::error!(user_id, "practice rating update failed: {}", e);
        }

        let next = state.store.get_for_rating(new_elo).await?;
        let info = PuzzleInfo {
            id: next.id.clone(),
            sequence: next.sequence.clone(),
            difficulty: next.difficulty,
        };
        let solved = {
            let mut session = state
                .practice
                .get_mut(&user_id)
                .ok_or(AppError::NotFound("practice session"))?;
            session.elo = new_elo;
            session.puzzles_solved += 1;
            session.puzzle = info.clone();
            session.current_started = Instant::now();
            session.puzzles_solved
        };

        push_result(state, user_id, &game_id, PracticeStatus::Active, &result);
        push_next_puzzle(state, user_id, &game_id, &info, new_elo, solved);
    } else if timed_mode && solve_secs > TIMED_LIMIT_SECS {
        {
            let mut session = state
                .practice
                .get_mut(&user_id)
                .ok_or(AppError::NotFound("practice session"))?;
            session.status = PracticeStatus::Failed;
        }
        push_result(state, user_id, &game_id, PracticeStatus::Failed, &result);
        end_session(state, user_id).await?;
    } else {
        push_result(state, user_id, &game_id, PracticeStatus::Active, &result);
    }

    Ok(result)
}

/// Close a session, push `practice_end`, and persist the outcome.
pub async fn end_session(state: &Arc<AppState>, user_id: i64) -> Result<(), AppError> {
    let (_, session) = state
        .practice
        .remove(&user_id)
        .ok_or(AppError::NotFound("practice session"))?;

    let duration = session.current_started.elapsed().as_secs() as i64;
    if let Err(e) = db::set_game_completed(&state.db, &session.game_id, None, duration).await {
        tracing::error!(game_id = %session.game_id, "failed to persist practice end: {}", e);
    }

    state.send_to(
        user_id,
        Envelope::new(
            MessageType::PracticeEnd,
            serde_json::to_value(&PracticeEndPayload {
                puzzles_solved: session.puzzles_solved,
                final_elo: session.elo,
            })
            .unwrap_or_default(),
        )
        .with_game(&session.game_id)
        .with_user(user_id.to_string()),
    );
    tracing::info!(
        game_id = %session.game_id,
        user_id,
        solved = session.puzzles_solved,
        "practice session ended"
    );
    Ok(())
}

/// Drop sessions idle past the limit.
pub async fn sweep(state: &Arc<AppState>) {
    let idle: Vec<i64> = state
        .practice
        .iter()
        .filter(|s| s.last_activity.elapsed() > state.config.practice_idle_limit)
        .map(|s| s.user_id)
        .collect();
    for user_id in idle {
        tracing::info!(user_id, "practice session idle, closing");
        if let Err(e) = end_session(state, user_id).await {
            tracing::warn!(user_id, "idle practice close failed: {}", e);
        }
    }
}

fn push_result(
    state: &Arc<AppState>,
    user_id: i64,
    game_id: &str,
    status: PracticeStatus,
    result: &ValidationResult,
) {
    let payload = PracticeResultPayload {
        status,
        is_correct: result.is_correct,
        score: result.is_correct.then_some(result.score),
        rating_delta: result.is_correct.then_some(result.rating_delta),
        steps: result.steps.clone(),
    };
    state.send_to(
        user_id,
        Envelope::new(
            MessageType::PracticeResult,
            serde_json::to_value(&payload).unwrap_or_default(),
        )
        .with_game(game_id)
        .with_user(user_id.to_string()),
    );
}

fn push_next_puzzle(
    state: &Arc<AppState>,
    user_id: i64,
    game_id: &str,
    puzzle: &PuzzleInfo,
    elo: i32,
    puzzles_solved: u32,
) {
    let payload = PracticeNextPuzzlePayload {
        puzzle: puzzle.clone(),
        elo,
        puzzles_solved,
    };
    state.send_to(
        user_id,
        Envelope::new(
            MessageType::PracticeNextPuzzle,
            serde_json::to_value(&payload).unwrap_or_default(),
        )
        .with_game(game_id)
        .with_user(user_id.to_string()),
    );
}
