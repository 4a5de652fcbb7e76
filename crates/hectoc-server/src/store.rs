use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use rand::RngExt;
use sqlx::SqlitePool;
use uuid::Uuid;

use hectoc_core::generator;
use hectoc_core::puzzle::Puzzle;
use hectoc_core::Difficulty;

use crate::cache::TtlCache;
use crate::config::CacheConfig;
use crate::db;
use crate::error::AppError;

/// Bounded retries per difficulty target during pre-generation.
const PREGEN_RETRIES: u32 = 4;

/// Deduplicated puzzle set over the durable store, fronted by a bounded
/// LRU+TTL cache and a rating-bucket index for O(1) band lookup.
pub struct PuzzleStore {
    pool: SqlitePool,
    cache: TtlCache<String, Puzzle>,
    /// `⌊min_elo/100⌋·100` -> cached puzzle ids.
    buckets: Mutex<HashMap<i32, HashSet<String>>>,
}

fn bucket_of(min_elo: i32) -> i32 {
    (min_elo / 100) * 100
}

impl PuzzleStore {
    pub fn new(pool: SqlitePool, config: &CacheConfig) -> PuzzleStore {
        PuzzleStore {
            pool,
            cache: TtlCache::new(config.max_entries, config.ttl),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn cache_put(&self, puzzle: &Puzzle) {
        self.cache.insert(puzzle.id.clone(), puzzle.clone());
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        buckets
            .entry(bucket_of(puzzle.min_elo))
            .or_default()
            .insert(puzzle.id.clone());
    }

    /// Cached snapshot if fresh, else a durable-store load.
    pub async fn get(&self, id: &str) -> Result<Puzzle, AppError> {
        if let Some(p) = self.cache.get(&id.to_string()) {
            return Ok(p);
        }
        let puzzle = db::retry(|| db::get_puzzle(&self.pool, id))
            .await?
            .ok_or(AppError::NotFound("puzzle"))?;
        self.cache_put(&puzzle);
        Ok(puzzle)
    }

    /// A puzzle whose recommended band contains `rating`, uniformly random
    /// over the cached candidates; durable store on miss; generation when
    /// the store has nothing for this band.
    pub async fn get_for_rating(&self, rating: i32) -> Result<Puzzle, AppError> {
        let mut candidates = Vec::new();
        {
            let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
            for (bucket, ids) in buckets.iter_mut() {
                if *bucket > rating {
                    continue;
                }
                // Drop ids whose cache entries were evicted or expired.
                ids.retain(|id| {
                    if let Some(p) = self.cache.get(id) {
                        if p.min_elo <= rating && rating <= p.max_elo {
                            candidates.push(p);
                        }
                        true
                    } else {
                        false
                    }
                });
            }
        }

        if !candidates.is_empty() {
            let mut rng = rand::rng();
            let pick = rng.random_range(0..candidates.len());
            return Ok(candidates.swap_remove(pick));
        }

        if let Some(puzzle) = db::retry(|| db::random_puzzle_for_rating(&self.pool, rating)).await?
        {
            self.cache_put(&puzzle);
            return Ok(puzzle);
        }

        // Nothing stored for this band: generate on demand.
        let difficulty = Difficulty::for_rating(rating);
        let generated = generate_off_thread(difficulty).await?;
        self.create(&generated.sequence, &generated.solutions).await
    }

    /// Newest-first page at one difficulty.
    pub async fn get_by_difficulty(
        &self,
        difficulty: Difficulty,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Puzzle>, AppError> {
        let puzzles =
            db::retry(|| db::puzzles_by_difficulty(&self.pool, difficulty, limit, offset)).await?;
        Ok(puzzles)
    }

    /// Insert a puzzle built from an enumerated solution set. Idempotent on
    /// the sequence: re-inserting returns the stored record untouched.
    pub async fn create(&self, sequence: &str, solutions: &[String]) -> Result<Puzzle, AppError> {
        if let Some(existing) =
            db::retry(|| db::get_puzzle_by_sequence(&self.pool, sequence)).await?
        {
            self.cache_put(&existing);
            return Ok(existing);
        }

        let puzzle = Puzzle::from_solutions(
            Uuid::new_v4().to_string(),
            sequence.to_string(),
            solutions,
        )
        .ok_or_else(|| AppError::Invalid(format!("sequence {} has no solutions", sequence)))?;

        let rows = puzzle.solution_rows(solutions);
        db::insert_puzzle(&self.pool, &puzzle, &rows).await?;
        self.cache_put(&puzzle);
        Ok(puzzle)
    }

    /// Fold one play into the rolling stats. The cached snapshot is
    /// invalidated so readers observe the update.
    pub async fn update_stats(
        &self,
        id: &str,
        solve_time: f64,
        is_correct: bool,
    ) -> Result<(), AppError> {
        db::retry(|| db::update_puzzle_stats(&self.pool, id, solve_time, is_correct)).await?;
        self.cache.remove(&id.to_string());
        Ok(())
    }

    /// Top up the store to at least `count` puzzles per difficulty.
    /// Returns how many were created.
    pub async fn pre_generate(&self, count: i64) -> Result<u32, AppError> {
        let mut created = 0u32;
        for &difficulty in Difficulty::all() {
            created += self.pre_generate_level(difficulty, count).await?;
        }
        Ok(created)
    }

    /// Top up one difficulty with bounded retries.
    pub async fn pre_generate_level(
        &self,
        difficulty: Difficulty,
        count: i64,
    ) -> Result<u32, AppError> {
        let have = db::retry(|| db::count_puzzles_by_difficulty(&self.pool, difficulty)).await?;
        let mut missing = (count - have).max(0);
        let mut attempts = (missing as u32) * PREGEN_RETRIES;
        let mut created = 0u32;

        while missing > 0 && attempts > 0 {
            attempts -= 1;
            let generated = match generate_off_thread(difficulty).await {
                Ok(g) => g,
                Err(e) => {
                    tracing::warn!(level = difficulty.level(), "generation failed: {}", e);
                    continue;
                }
            };
            // A duplicate sequence counts as found, not created.
            let before =
                db::retry(|| db::get_puzzle_by_sequence(&self.pool, &generated.sequence)).await?;
            let puzzle = self.create(&generated.sequence, &generated.solutions).await?;
            if before.is_none() {
                created += 1;
                if puzzle.difficulty == difficulty {
                    missing -= 1;
                }
            }
        }
        if missing > 0 {
            tracing::warn!(
                level = difficulty.level(),
                missing,
                "pre-generation fell short"
            );
        }
        Ok(created)
    }

    pub async fn clean(&self) -> Result<u64, AppError> {
        let removed = db::retry(|| db::delete_all_puzzles(&self.pool)).await?;
        Ok(removed)
    }
}

/// Solution enumeration is CPU-bound; keep it off the async workers.
async fn generate_off_thread(
    difficulty: Difficulty,
) -> Result<generator::GeneratedPuzzle, AppError> {
    tokio::task::spawn_blocking(move || generator::generate_with_difficulty(difficulty))
        .await
        .map_err(|e| AppError::Exhausted(format!("generator task failed: {}", e)))?
        .map_err(|e| AppError::Exhausted(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;

    async fn test_store() -> PuzzleStore {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        db::init_db(&pool).await.unwrap();
        PuzzleStore::new(pool, &CacheConfig::default())
    }

    #[tokio::test]
    async fn create_is_idempotent_on_sequence() {
        let store = test_store().await;
        let sols = generator::solutions("123456");
        let a = store.create("123456", &sols).await.unwrap();
        let b = store.create("123456", &sols).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.usage_count, 0);
    }

    #[tokio::test]
    async fn unsolvable_sequence_rejected() {
        let store = test_store().await;
        let err = store.create("111112", &[]).await.unwrap_err();
        assert!(matches!(err, AppError::Invalid(_)));
    }

    #[tokio::test]
    async fn get_round_trips_through_cache() {
        let store = test_store().await;
        let sols = generator::solutions("123456");
        let created = store.create("123456", &sols).await.unwrap();
        let loaded = store.get(&created.id).await.unwrap();
        assert_eq!(loaded.sequence, "123456");
        assert!(store.get("missing").await.is_err());
    }

    #[tokio::test]
    async fn get_for_rating_respects_band() {
        let store = test_store().await;
        let sols = generator::solutions("123456");
        let created = store.create("123456", &sols).await.unwrap();
        // A rating inside the created puzzle's band finds it.
        let mid = (created.min_elo + created.max_elo) / 2;
        let found = store.get_for_rating(mid).await.unwrap();
        assert!(found.min_elo <= mid && mid <= found.max_elo);
    }

    #[tokio::test]
    async fn update_stats_keeps_cumulative_means() {
        let store = test_store().await;
        let sols = generator::solutions("123456");
        let p = store.create("123456", &sols).await.unwrap();

        store.update_stats(&p.id, 30.0, true).await.unwrap();
        store.update_stats(&p.id, 60.0, false).await.unwrap();

        let p = store.get(&p.id).await.unwrap();
        assert_eq!(p.usage_count, 2);
        assert!((p.success_rate - 0.5).abs() < 1e-9);
        assert!((p.avg_solve_time - 45.0).abs() < 1e-9);
    }
}
