use std::future::Future;
use std::time::Duration;

use sqlx::{Row, SqlitePool};

use hectoc_core::puzzle::{Puzzle, PuzzleSolution};
use hectoc_core::Difficulty;

/// Create all tables if they don't exist.
pub async fn init_db(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            username TEXT UNIQUE NOT NULL,
            rating INTEGER NOT NULL DEFAULT 1000,
            games_played INTEGER NOT NULL DEFAULT 0,
            games_won INTEGER NOT NULL DEFAULT 0,
            current_streak INTEGER NOT NULL DEFAULT 0,
            max_streak INTEGER NOT NULL DEFAULT 0,
            avg_solve_time REAL NOT NULL DEFAULT 0,
            last_game_at TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS sessions (
            token TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL,
            expires_at TEXT NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users(id)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS puzzles (
            id TEXT PRIMARY KEY,
            sequence TEXT UNIQUE NOT NULL,
            difficulty INTEGER NOT NULL,
            complexity_score REAL NOT NULL,
            solution_count INTEGER NOT NULL,
            optimal_solution TEXT NOT NULL,
            explanation TEXT NOT NULL DEFAULT '',
            min_elo INTEGER NOT NULL,
            max_elo INTEGER NOT NULL,
            usage_count INTEGER NOT NULL DEFAULT 0,
            success_rate REAL NOT NULL DEFAULT 0,
            avg_solve_time REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS puzzle_solutions (
            puzzle_id TEXT NOT NULL,
            expression TEXT NOT NULL,
            complexity REAL NOT NULL,
            is_optimal INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (puzzle_id, expression),
            FOREIGN KEY (puzzle_id) REFERENCES puzzles(id)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS games (
            id TEXT PRIMARY KEY,
            puzzle_id TEXT NOT NULL,
            puzzle_sequence TEXT NOT NULL,
            game_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'waiting',
            difficulty INTEGER NOT NULL,
            winner_id INTEGER,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            started_at TEXT,
            completed_at TEXT,
            duration_secs INTEGER NOT NULL DEFAULT 0
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS game_players (
            game_id TEXT NOT NULL,
            user_id INTEGER NOT NULL,
            submission TEXT,
            solve_time REAL,
            is_correct INTEGER,
            score REAL,
            rating_delta INTEGER,
            attempts INTEGER NOT NULL DEFAULT 0,
            finished_at TEXT,
            PRIMARY KEY (game_id, user_id),
            FOREIGN KEY (game_id) REFERENCES games(id),
            FOREIGN KEY (user_id) REFERENCES users(id)
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Retry a storage operation on transient failure, exponential backoff,
/// three attempts total.
pub async fn retry<T, F, Fut>(mut op: F) -> Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let mut delay = Duration::from_millis(50);
    for attempt in 0..3 {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < 2 && is_transient(&e) => {
                tracing::warn!("transient storage error, retrying: {}", e);
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }
    unreachable!("retry loop always returns");
}

fn is_transient(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => {
            let msg = db.message();
            msg.contains("locked") || msg.contains("busy")
        }
        _ => false,
    }
}

// ── Users & sessions ────────────────────────────────────────────────────

/// Insert a user if the name is free, otherwise return the existing row id.
pub async fn upsert_user(pool: &SqlitePool, username: &str) -> Result<i64, sqlx::Error> {
    sqlx::query("INSERT INTO users (username) VALUES (?1) ON CONFLICT(username) DO NOTHING")
        .bind(username)
        .execute(pool)
        .await?;

    let row = sqlx::query("SELECT id FROM users WHERE username = ?1")
        .bind(username)
        .fetch_one(pool)
        .await?;

    Ok(row.get::<i64, _>("id"))
}

/// Create a new session token for the given user. Returns the token string.
pub async fn create_session(pool: &SqlitePool, user_id: i64) -> Result<String, sqlx::Error> {
    let token = uuid::Uuid::new_v4().to_string();

    // Expire in 30 days.
    sqlx::query(
        "INSERT INTO sessions (token, user_id, expires_at)
         VALUES (?1, ?2, datetime('now', '+30 days'))",
    )
    .bind(&token)
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(token)
}

/// Validate a session token. Returns (user_id, username) if valid.
pub async fn get_session(
    pool: &SqlitePool,
    token: &str,
) -> Result<Option<(i64, String)>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT s.user_id, u.username FROM sessions s
         JOIN users u ON u.id = s.user_id
         WHERE s.token = ?1 AND s.expires_at > datetime('now')",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| (r.get::<i64, _>("user_id"), r.get::<String, _>("username"))))
}

pub async fn get_user(pool: &SqlitePool, id: i64) -> Result<Option<UserRow>, sqlx::Error> {
    let row = sqlx::query("SELECT * FROM users WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(user_from_row))
}

pub async fn get_user_by_username(
    pool: &SqlitePool,
    username: &str,
) -> Result<Option<UserRow>, sqlx::Error> {
    let row = sqlx::query("SELECT * FROM users WHERE username = ?1")
        .bind(username)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(user_from_row))
}

/// Conditional rating write for optimistic concurrency: succeeds only if
/// the rating is still what the caller read.
pub async fn update_user_stats_conditional(
    pool: &SqlitePool,
    user: &UserRow,
    expected_rating: i32,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE users SET rating = ?1, games_played = ?2, games_won = ?3,
            current_streak = ?4, max_streak = ?5, avg_solve_time = ?6, last_game_at = ?7
         WHERE id = ?8 AND rating = ?9",
    )
    .bind(user.rating)
    .bind(user.games_played)
    .bind(user.games_won)
    .bind(user.current_streak)
    .bind(user.max_streak)
    .bind(user.avg_solve_time)
    .bind(&user.last_game_at)
    .bind(user.id)
    .bind(expected_rating)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn get_leaderboard(
    pool: &SqlitePool,
    limit: i64,
) -> Result<Vec<LeaderboardRow>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT username, rating, games_played, games_won FROM users
         ORDER BY rating DESC LIMIT ?1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .enumerate()
        .map(|(i, r)| LeaderboardRow {
            rank: (i + 1) as u32,
            username: r.get("username"),
            rating: r.get("rating"),
            games_played: r.get::<i64, _>("games_played") as u32,
            games_won: r.get::<i64, _>("games_won") as u32,
        })
        .collect())
}

// ── Puzzles ─────────────────────────────────────────────────────────────

pub async fn insert_puzzle(
    pool: &SqlitePool,
    puzzle: &Puzzle,
    solutions: &[PuzzleSolution],
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO puzzles (id, sequence, difficulty, complexity_score, solution_count,
            optimal_solution, explanation, min_elo, max_elo, usage_count, success_rate, avg_solve_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
    )
    .bind(&puzzle.id)
    .bind(&puzzle.sequence)
    .bind(puzzle.difficulty.level() as i64)
    .bind(puzzle.complexity_score)
    .bind(puzzle.solution_count)
    .bind(&puzzle.optimal_solution)
    .bind(&puzzle.explanation)
    .bind(puzzle.min_elo)
    .bind(puzzle.max_elo)
    .bind(puzzle.usage_count)
    .bind(puzzle.success_rate)
    .bind(puzzle.avg_solve_time)
    .execute(pool)
    .await?;

    for s in solutions {
        sqlx::query(
            "INSERT OR IGNORE INTO puzzle_solutions (puzzle_id, expression, complexity, is_optimal)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&s.puzzle_id)
        .bind(&s.expression)
        .bind(s.complexity)
        .bind(s.is_optimal as i64)
        .execute(pool)
        .await?;
    }

    Ok(())
}

pub async fn get_puzzle(pool: &SqlitePool, id: &str) -> Result<Option<Puzzle>, sqlx::Error> {
    let row = sqlx::query("SELECT * FROM puzzles WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(puzzle_from_row))
}

pub async fn get_puzzle_by_sequence(
    pool: &SqlitePool,
    sequence: &str,
) -> Result<Option<Puzzle>, sqlx::Error> {
    let row = sqlx::query("SELECT * FROM puzzles WHERE sequence = ?1")
        .bind(sequence)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(puzzle_from_row))
}

/// A random puzzle whose recommended band contains `rating`.
pub async fn random_puzzle_for_rating(
    pool: &SqlitePool,
    rating: i32,
) -> Result<Option<Puzzle>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT * FROM puzzles WHERE min_elo <= ?1 AND max_elo >= ?1
         ORDER BY RANDOM() LIMIT 1",
    )
    .bind(rating)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(puzzle_from_row))
}

/// Newest-first page of puzzles at one difficulty.
pub async fn puzzles_by_difficulty(
    pool: &SqlitePool,
    difficulty: Difficulty,
    limit: i64,
    offset: i64,
) -> Result<Vec<Puzzle>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT * FROM puzzles WHERE difficulty = ?1
         ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3",
    )
    .bind(difficulty.level() as i64)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(puzzle_from_row).collect())
}

pub async fn count_puzzles_by_difficulty(
    pool: &SqlitePool,
    difficulty: Difficulty,
) -> Result<i64, sqlx::Error> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM puzzles WHERE difficulty = ?1")
        .bind(difficulty.level() as i64)
        .fetch_one(pool)
        .await?;
    Ok(row.get::<i64, _>("n"))
}

/// Atomic read-modify-write of the rolling puzzle statistics. Success rate
/// is weighted over total uses, both means are cumulative.
pub async fn update_puzzle_stats(
    pool: &SqlitePool,
    id: &str,
    solve_time: f64,
    is_correct: bool,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE puzzles SET
            success_rate = (success_rate * usage_count + ?1) / (usage_count + 1),
            avg_solve_time = (avg_solve_time * usage_count + ?2) / (usage_count + 1),
            usage_count = usage_count + 1
         WHERE id = ?3",
    )
    .bind(if is_correct { 1.0 } else { 0.0 })
    .bind(solve_time)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete_all_puzzles(pool: &SqlitePool) -> Result<u64, sqlx::Error> {
    sqlx::query("DELETE FROM puzzle_solutions").execute(pool).await?;
    let result = sqlx::query("DELETE FROM puzzles").execute(pool).await?;
    Ok(result.rows_affected())
}

// ── Games ───────────────────────────────────────────────────────────────

pub async fn insert_game(
    pool: &SqlitePool,
    id: &str,
    puzzle_id: &str,
    puzzle_sequence: &str,
    game_type: &str,
    difficulty: Difficulty,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO games (id, puzzle_id, puzzle_sequence, game_type, difficulty)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(id)
    .bind(puzzle_id)
    .bind(puzzle_sequence)
    .bind(game_type)
    .bind(difficulty.level() as i64)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_game_started(pool: &SqlitePool, id: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE games SET status = 'active', started_at = datetime('now') WHERE id = ?1",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_game_completed(
    pool: &SqlitePool,
    id: &str,
    winner_id: Option<i64>,
    duration_secs: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE games SET status = 'completed', winner_id = ?1,
            completed_at = datetime('now'), duration_secs = ?2
         WHERE id = ?3",
    )
    .bind(winner_id)
    .bind(duration_secs)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_game_abandoned(pool: &SqlitePool, id: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE games SET status = 'abandoned', completed_at = datetime('now') WHERE id = ?1",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert_game_player(
    pool: &SqlitePool,
    game_id: &str,
    user_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO game_players (game_id, user_id) VALUES (?1, ?2)")
        .bind(game_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Persist a slot after a submission.
pub async fn update_game_player(
    pool: &SqlitePool,
    game_id: &str,
    user_id: i64,
    submission: &str,
    solve_time: Option<f64>,
    is_correct: bool,
    score: Option<f64>,
    rating_delta: Option<i32>,
    attempts: u32,
    finished: bool,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE game_players SET submission = ?1, solve_time = ?2, is_correct = ?3,
            score = ?4, rating_delta = ?5, attempts = ?6,
            finished_at = CASE WHEN ?7 THEN datetime('now') ELSE finished_at END
         WHERE game_id = ?8 AND user_id = ?9",
    )
    .bind(submission)
    .bind(solve_time)
    .bind(is_correct)
    .bind(score)
    .bind(rating_delta)
    .bind(attempts as i64)
    .bind(finished)
    .bind(game_id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_game_players(
    pool: &SqlitePool,
    game_id: &str,
) -> Result<Vec<GamePlayerRow>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT gp.*, u.username FROM game_players gp
         JOIN users u ON u.id = gp.user_id
         WHERE gp.game_id = ?1",
    )
    .bind(game_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| GamePlayerRow {
            user_id: r.get("user_id"),
            username: r.get("username"),
            submission: r.get("submission"),
            solve_time: r.get("solve_time"),
            is_correct: r.get("is_correct"),
            score: r.get("score"),
            rating_delta: r.get("rating_delta"),
            attempts: r.get("attempts"),
            finished: r.get::<Option<String>, _>("finished_at").is_some(),
        })
        .collect())
}

pub async fn get_game(pool: &SqlitePool, id: &str) -> Result<Option<GameRow>, sqlx::Error> {
    let row = sqlx::query("SELECT * FROM games WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(game_from_row))
}

pub async fn list_active_games(pool: &SqlitePool) -> Result<Vec<GameRow>, sqlx::Error> {
    let rows = sqlx::query("SELECT * FROM games WHERE status IN ('waiting', 'active')")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(game_from_row).collect())
}

// ── Row types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub rating: i32,
    pub games_played: i64,
    pub games_won: i64,
    pub current_streak: i64,
    pub max_streak: i64,
    pub avg_solve_time: f64,
    pub last_game_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GameRow {
    pub id: String,
    pub puzzle_id: String,
    pub puzzle_sequence: String,
    pub game_type: String,
    pub status: String,
    pub difficulty: i64,
    pub winner_id: Option<i64>,
    pub duration_secs: i64,
}

#[derive(Debug, Clone)]
pub struct GamePlayerRow {
    pub user_id: i64,
    pub username: String,
    pub submission: Option<String>,
    pub solve_time: Option<f64>,
    pub is_correct: Option<bool>,
    pub score: Option<f64>,
    pub rating_delta: Option<i64>,
    pub attempts: i64,
    pub finished: bool,
}

#[derive(Debug, Clone)]
pub struct LeaderboardRow {
    pub rank: u32,
    pub username: String,
    pub rating: i32,
    pub games_played: u32,
    pub games_won: u32,
}

fn user_from_row(r: sqlx::sqlite::SqliteRow) -> UserRow {
    UserRow {
        id: r.get("id"),
        username: r.get("username"),
        rating: r.get("rating"),
        games_played: r.get("games_played"),
        games_won: r.get("games_won"),
        current_streak: r.get("current_streak"),
        max_streak: r.get("max_streak"),
        avg_solve_time: r.get("avg_solve_time"),
        last_game_at: r.get("last_game_at"),
    }
}

fn game_from_row(r: sqlx::sqlite::SqliteRow) -> GameRow {
    GameRow {
        id: r.get("id"),
        puzzle_id: r.get("puzzle_id"),
        puzzle_sequence: r.get("puzzle_sequence"),
        game_type: r.get("game_type"),
        status: r.get("status"),
        difficulty: r.get("difficulty"),
        winner_id: r.get("winner_id"),
        duration_secs: r.get("duration_secs"),
    }
}

fn puzzle_from_row(r: sqlx::sqlite::SqliteRow) -> Puzzle {
    let level: i64 = r.get("difficulty");
    Puzzle {
        id: r.get("id"),
        sequence: r.get("sequence"),
        difficulty: Difficulty::from_level(level as u8).unwrap_or(Difficulty::D1),
        complexity_score: r.get("complexity_score"),
        solution_count: r.get("solution_count"),
        optimal_solution: r.get("optimal_solution"),
        explanation: r.get("explanation"),
        min_elo: r.get("min_elo"),
        max_elo: r.get("max_elo"),
        usage_count: r.get("usage_count"),
        success_rate: r.get("success_rate"),
        avg_solve_time: r.get("avg_solve_time"),
    }
}
