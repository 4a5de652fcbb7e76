use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::json;

use hectoc_core::protocol::{
    Envelope, GameType, MatchFoundPayload, MessageType, OpponentInfo,
};

use crate::config::MatchmakingConfig;
use crate::error::AppError;
use crate::game;
use crate::state::AppState;

/// How long a completed pairing stays visible to `status` polls.
const RECENT_MATCH_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub user_id: i64,
    pub username: String,
    pub rating: i32,
    pub game_type: GameType,
    pub ranked: bool,
    pub joined_at: Instant,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueStatus {
    pub in_queue: bool,
    pub wait_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_id: Option<String>,
}

struct Inner {
    entries: HashMap<i64, QueueEntry>,
    /// user -> (game id, when paired), for status polls after a match.
    recent: HashMap<i64, (String, Instant)>,
}

/// Rating-banded queue. One mutex serializes every mutation, so pairing
/// passes and sweeps are totally ordered.
pub struct Matchmaker {
    inner: Mutex<Inner>,
    config: MatchmakingConfig,
}

impl Matchmaker {
    pub fn new(config: MatchmakingConfig) -> Matchmaker {
        Matchmaker {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                recent: HashMap::new(),
            }),
            config,
        }
    }

    /// Acceptance window after `wait` in the queue.
    pub fn band(&self, wait: Duration) -> i32 {
        let steps = (wait.as_secs() / self.config.increment_interval.as_secs().max(1)) as i32;
        (self.config.initial_elo_range + steps * self.config.increment)
            .min(self.config.max_elo_range)
    }

    pub fn join(&self, entry: QueueEntry) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.entries.contains_key(&entry.user_id) {
            return Err(AppError::Conflict("already queued".into()));
        }
        inner.recent.remove(&entry.user_id);
        inner.entries.insert(entry.user_id, entry);
        Ok(())
    }

    pub fn leave(&self, user_id: i64) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .entries
            .remove(&user_id)
            .map(|_| ())
            .ok_or(AppError::NotFound("queue entry"))
    }

    /// Silent removal, for disconnect cleanup.
    pub fn discard(&self, user_id: i64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.remove(&user_id);
    }

    pub fn status(&self, user_id: i64) -> QueueStatus {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = inner.entries.get(&user_id) {
            return QueueStatus {
                in_queue: true,
                wait_seconds: entry.joined_at.elapsed().as_secs(),
                game_id: None,
            };
        }
        QueueStatus {
            in_queue: false,
            wait_seconds: 0,
            game_id: inner.recent.get(&user_id).map(|(id, _)| id.clone()),
        }
    }

    /// One pairing pass over a snapshot of the queue. Candidates are
    /// scanned oldest first; the first same-type opponent inside the
    /// scanning player's band wins. Paired entries are removed atomically.
    pub fn take_pairs(&self) -> Vec<(QueueEntry, QueueEntry)> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        let mut queued: Vec<QueueEntry> = inner.entries.values().cloned().collect();
        queued.sort_by_key(|e| e.joined_at);

        let mut taken: Vec<i64> = Vec::new();
        let mut pairs = Vec::new();

        for i in 0..queued.len() {
            let a = &queued[i];
            if taken.contains(&a.user_id) {
                continue;
            }
            let band = self.band(now.duration_since(a.joined_at));
            let found = queued[i + 1..].iter().find(|b| {
                !taken.contains(&b.user_id)
                    && b.game_type == a.game_type
                    && (a.rating - b.rating).abs() <= band
            });
            if let Some(b) = found {
                taken.push(a.user_id);
                taken.push(b.user_id);
                pairs.push((a.clone(), b.clone()));
            }
        }

        for (a, b) in &pairs {
            inner.entries.remove(&a.user_id);
            inner.entries.remove(&b.user_id);
        }
        pairs
    }

    /// Entries past their TTL, removed and returned for notification.
    pub fn expire(&self) -> Vec<QueueEntry> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let ttl = self.config.entry_ttl;
        let expired: Vec<i64> = inner
            .entries
            .values()
            .filter(|e| e.joined_at.elapsed() >= ttl)
            .map(|e| e.user_id)
            .collect();
        let mut out = Vec::new();
        for id in expired {
            if let Some(e) = inner.entries.remove(&id) {
                out.push(e);
            }
        }
        inner
            .recent
            .retain(|_, (_, at)| at.elapsed() < RECENT_MATCH_TTL);
        out
    }

    pub fn record_match(&self, users: &[i64], game_id: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        for &user in users {
            inner.recent.insert(user, (game_id.to_string(), now));
        }
    }

    /// Re-insert entries whose pairing could not be committed.
    fn restore(&self, a: QueueEntry, b: QueueEntry) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.entry(a.user_id).or_insert(a);
        inner.entries.entry(b.user_id).or_insert(b);
    }
}

/// Pairing pass driver: commit each pair through the Orchestrator and push
/// `match_found` to both sides. Failures re-queue the pair and never take
/// the loop down.
pub async fn run_pass(state: &Arc<AppState>) {
    let pairs = state.matchmaker.take_pairs();
    for (a, b) in pairs {
        match game::create_duel_for_pair(state, &a, &b).await {
            Ok(game_id) => {
                state.matchmaker.record_match(&[a.user_id, b.user_id], &game_id);
                notify_match(state, &game_id, &a, &b);
                notify_match(state, &game_id, &b, &a);
            }
            Err(e) => {
                tracing::error!("pairing commit failed: {}", e);
                state.matchmaker.restore(a, b);
            }
        }
    }
}

/// Expiry sweep driver: drop stale entries and tell their owners.
pub async fn run_sweep(state: &Arc<AppState>) {
    for entry in state.matchmaker.expire() {
        tracing::info!(user_id = entry.user_id, "queue entry timed out");
        state.send_to(
            entry.user_id,
            Envelope::new(
                MessageType::QueueTimeout,
                json!({ "wait_seconds": entry.joined_at.elapsed().as_secs() }),
            )
            .with_user(entry.user_id.to_string()),
        );
    }
}

fn notify_match(state: &Arc<AppState>, game_id: &str, to: &QueueEntry, opponent: &QueueEntry) {
    let payload = MatchFoundPayload {
        game_id: game_id.to_string(),
        game_type: to.game_type,
        opponent: OpponentInfo {
            user_id: opponent.user_id.to_string(),
            username: opponent.username.clone(),
            rating: opponent.rating,
        },
        ranked: to.ranked,
    };
    let envelope = Envelope::new(
        MessageType::MatchFound,
        serde_json::to_value(&payload).unwrap_or_default(),
    )
    .with_game(game_id)
    .with_user(to.user_id.to_string());
    state.send_to(to.user_id, envelope);
}
