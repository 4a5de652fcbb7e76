use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::difficulty::Difficulty;
use crate::validation::ValidationStep;

/// Message types visible on the wire, client and server side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    GameState,
    PlayerJoined,
    PlayerLeft,
    GameStart,
    GameEnd,
    PlayerProgress,
    SolutionSubmitted,
    MatchFound,
    QueueTimeout,
    PracticeStart,
    PracticeNextPuzzle,
    PracticeSubmitSolution,
    PracticeResult,
    PracticeEnd,
    Ping,
    Pong,
    Error,
}

/// The one-per-frame JSON envelope. Payload shape depends on `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Milliseconds since the Unix epoch. Stamped by the sender; absent on
    /// inbound frames from thin clients.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(kind: MessageType, payload: Value) -> Envelope {
        Envelope {
            kind,
            game_id: None,
            user_id: None,
            timestamp: now_ms(),
            payload,
        }
    }

    pub fn with_game(mut self, game_id: impl Into<String>) -> Envelope {
        self.game_id = Some(game_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Envelope {
        self.user_id = Some(user_id.into());
        self
    }
}

pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Waiting,
    Active,
    Completed,
    Abandoned,
}

impl GameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameStatus::Waiting => "waiting",
            GameStatus::Active => "active",
            GameStatus::Completed => "completed",
            GameStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Option<GameStatus> {
        match s {
            "waiting" => Some(GameStatus::Waiting),
            "active" => Some(GameStatus::Active),
            "completed" => Some(GameStatus::Completed),
            "abandoned" => Some(GameStatus::Abandoned),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameType {
    Duel,
    Practice,
}

impl GameType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameType::Duel => "duel",
            GameType::Practice => "practice",
        }
    }

    pub fn parse(s: &str) -> Option<GameType> {
        match s {
            "duel" => Some(GameType::Duel),
            "practice" => Some(GameType::Practice),
            _ => None,
        }
    }
}

/// Puzzle fields pushed to players. The solution set never crosses the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PuzzleInfo {
    pub id: String,
    pub sequence: String,
    pub difficulty: Difficulty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerState {
    pub user_id: String,
    pub username: String,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameStatePayload {
    pub status: GameStatus,
    pub players: Vec<PlayerState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    pub puzzle: PuzzleInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameStartPayload {
    pub status: GameStatus,
    pub started_at: i64,
    pub puzzle: PuzzleInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameEndPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<String>,
    pub players: Vec<PlayerState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressPayload {
    pub progress: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolutionSubmittedPayload {
    pub is_correct: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub solution: String,
}

/// Client-side submission body, shared by the WebSocket and HTTP paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitPayload {
    pub solution: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpponentInfo {
    pub user_id: String,
    pub username: String,
    pub rating: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchFoundPayload {
    pub game_id: String,
    pub game_type: GameType,
    pub opponent: OpponentInfo,
    pub ranked: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PracticeStatus {
    Active,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PracticeStartPayload {
    #[serde(default)]
    pub timed_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_elo: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PracticeNextPuzzlePayload {
    pub puzzle: PuzzleInfo,
    pub elo: i32,
    pub puzzles_solved: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PracticeResultPayload {
    pub status: PracticeStatus,
    pub is_correct: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating_delta: Option<i32>,
    pub steps: Vec<ValidationStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PracticeEndPayload {
    pub puzzles_solved: u32,
    pub final_elo: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_serializes_snake_case_type() {
        let env = Envelope::new(MessageType::GameStart, json!({"status": "active"}))
            .with_game("g-1");
        let text = serde_json::to_string(&env).unwrap();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["type"], "game_start");
        assert_eq!(parsed["game_id"], "g-1");
        assert!(parsed["timestamp"].as_i64().unwrap() > 0);
        // Absent user_id is omitted, not null.
        assert!(parsed.get("user_id").is_none());
    }

    #[test]
    fn client_envelope_parses_without_optionals() {
        let env: Envelope = serde_json::from_str(
            r#"{"type":"player_progress","timestamp":1,"payload":{"progress":0.4}}"#,
        )
        .unwrap();
        assert_eq!(env.kind, MessageType::PlayerProgress);
        let p: ProgressPayload = serde_json::from_value(env.payload).unwrap();
        assert_eq!(p.progress, 0.4);
    }

    #[test]
    fn status_round_trip() {
        for s in ["waiting", "active", "completed", "abandoned"] {
            assert_eq!(GameStatus::parse(s).unwrap().as_str(), s);
        }
        assert!(GameStatus::parse("bogus").is_none());
    }

    #[test]
    fn match_found_payload_shape() {
        let payload = MatchFoundPayload {
            game_id: "g-2".into(),
            game_type: GameType::Duel,
            opponent: OpponentInfo {
                user_id: "7".into(),
                username: "kai".into(),
                rating: 1500,
            },
            ranked: true,
        };
        let v = serde_json::to_value(&payload).unwrap();
        assert_eq!(v["game_type"], "duel");
        assert_eq!(v["opponent"]["rating"], 1500);
    }
}
