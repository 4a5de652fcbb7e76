use std::collections::HashSet;
use std::sync::atomic::AtomicU32;
use std::time::Instant;

use dashmap::DashMap;
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use hectoc_core::protocol::Envelope;
use hectoc_core::validation::ValidationResult;

use crate::cache::TtlCache;
use crate::config::ServerConfig;
use crate::game::DuelRoom;
use crate::matchmaker::Matchmaker;
use crate::practice::PracticeSession;
use crate::store::PuzzleStore;

/// Handle to push messages to a connected WebSocket client. The queue is
/// bounded; a full queue marks the client for eviction instead of blocking.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub user_id: i64,
    pub username: String,
    pub rating: i32,
    pub tx: mpsc::Sender<Envelope>,
    pub game_id: Option<String>,
    /// Messages received in the current second window.
    pub message_count: u32,
    pub rate_limit_window: Instant,
}

/// Shared application state.
pub struct AppState {
    pub db: SqlitePool,
    pub config: ServerConfig,
    pub store: PuzzleStore,
    pub matchmaker: Matchmaker,
    pub rooms: DashMap<String, DuelRoom>,
    pub practice: DashMap<i64, PracticeSession>,
    pub connections: DashMap<i64, ConnectionHandle>,
    /// Room membership: game id -> connected user ids.
    pub room_members: DashMap<String, HashSet<i64>>,
    /// Which active game a user is in, to keep players out of two at once.
    pub active_games: DashMap<i64, String>,
    /// Validator memo keyed by (puzzle id, normalized expression).
    pub validation_memo: TtlCache<(String, String), ValidationResult>,
    pub connection_count: AtomicU32,
}

impl AppState {
    /// Direct send to one user. A full queue evicts the client; a closed
    /// queue cleans up the stale handle.
    pub fn send_to(&self, user_id: i64, envelope: Envelope) {
        let result = match self.connections.get(&user_id) {
            Some(conn) => conn.tx.try_send(envelope),
            None => return,
        };
        match result {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(user_id, "outbound queue full, evicting client");
                self.drop_client(user_id);
            }
            Err(TrySendError::Closed(_)) => {
                self.drop_client(user_id);
            }
        }
    }

    /// Broadcast to every connected member of a room, in hub order.
    pub fn broadcast(&self, game_id: &str, envelope: Envelope) {
        let members: Vec<i64> = match self.room_members.get(game_id) {
            Some(set) => set.iter().copied().collect(),
            None => return,
        };
        for user_id in members {
            self.send_to(user_id, envelope.clone());
        }
    }

    /// Broadcast to a room, skipping one member.
    pub fn broadcast_except(&self, game_id: &str, except: i64, envelope: Envelope) {
        let members: Vec<i64> = match self.room_members.get(game_id) {
            Some(set) => set.iter().copied().collect(),
            None => return,
        };
        for user_id in members {
            if user_id != except {
                self.send_to(user_id, envelope.clone());
            }
        }
    }

    /// Remove a client from the hub and from any room it was in. The
    /// closed sender wakes the socket task, which then exits its loop.
    pub fn drop_client(&self, user_id: i64) {
        let game_id = self
            .connections
            .remove(&user_id)
            .and_then(|(_, c)| c.game_id);
        if let Some(game_id) = game_id {
            self.leave_room(&game_id, user_id);
        }
    }

    pub fn join_room(&self, game_id: &str, user_id: i64) {
        self.room_members
            .entry(game_id.to_string())
            .or_default()
            .insert(user_id);
    }

    /// O(1) removal; empty rooms are deleted.
    pub fn leave_room(&self, game_id: &str, user_id: i64) {
        let mut empty = false;
        if let Some(mut set) = self.room_members.get_mut(game_id) {
            set.remove(&user_id);
            empty = set.is_empty();
        }
        if empty {
            self.room_members.remove(game_id);
        }
    }
}
