use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::db::{self, UserRow};
use crate::error::AppError;

/// Hours of inactivity after which a streak restarts.
const STREAK_BREAK_HOURS: i64 = 48;

/// Apply a correct submission to a player's rating and rolling stats.
/// Optimistic concurrency: read, compute, conditional-write; re-read on
/// conflict, up to three attempts.
pub async fn apply_correct(
    pool: &SqlitePool,
    user_id: i64,
    rating_delta: i32,
    solve_secs: f64,
) -> Result<UserRow, AppError> {
    for _ in 0..3 {
        let user = db::retry(|| db::get_user(pool, user_id))
            .await?
            .ok_or(AppError::NotFound("player"))?;
        let expected = user.rating;
        let now = Utc::now();

        let mut next = user.clone();
        next.rating += rating_delta;
        next.games_played += 1;
        next.games_won += 1;
        let n = next.games_played as f64;
        next.avg_solve_time = ((n - 1.0) * user.avg_solve_time + solve_secs) / n;
        next.current_streak = advance_streak(&user, now);
        next.max_streak = next.max_streak.max(next.current_streak);
        next.last_game_at = Some(now.to_rfc3339());

        if db::retry(|| db::update_user_stats_conditional(pool, &next, expected)).await? {
            return Ok(next);
        }
        tracing::debug!(user_id, "rating write conflicted, re-reading");
    }
    Err(AppError::Conflict("rating update kept conflicting".into()))
}

/// Record an incorrect final submission: the game still counts as played,
/// rating and streak are untouched.
pub async fn record_incorrect(pool: &SqlitePool, user_id: i64) -> Result<(), AppError> {
    for _ in 0..3 {
        let user = db::retry(|| db::get_user(pool, user_id))
            .await?
            .ok_or(AppError::NotFound("player"))?;
        let expected = user.rating;

        let mut next = user.clone();
        next.games_played += 1;

        if db::retry(|| db::update_user_stats_conditional(pool, &next, expected)).await? {
            return Ok(());
        }
    }
    Err(AppError::Conflict("stats update kept conflicting".into()))
}

/// Streak rules: first game or a >48h gap resets to 1; a new calendar day
/// increments; another game the same day leaves it alone.
fn advance_streak(user: &UserRow, now: DateTime<Utc>) -> i64 {
    let last = user
        .last_game_at
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc));

    match last {
        None => 1,
        Some(last) => {
            if now.signed_duration_since(last).num_hours() > STREAK_BREAK_HOURS {
                1
            } else if now.date_naive() != last.date_naive() {
                user.current_streak.max(0) + 1
            } else {
                user.current_streak.max(1)
            }
        }
    }
}
