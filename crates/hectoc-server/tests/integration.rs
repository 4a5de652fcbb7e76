use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use hectoc_core::generator;
use hectoc_core::puzzle::Puzzle;
use hectoc_server::config::ServerConfig;
use hectoc_server::state::AppState;

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;
type WsStream = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

/// Spin up a test server on a random port, return (base URL, state).
async fn start_server() -> (String, Arc<AppState>) {
    // In-memory SQLite so tests don't clash.
    let config = ServerConfig {
        database_url: "sqlite::memory:".to_string(),
        ..ServerConfig::default()
    };
    let (app, state) = hectoc_server::build_app(config).await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://127.0.0.1:{}", port), state)
}

/// Seed the store with the canonical 123456 puzzle and return it.
async fn seed_puzzle(state: &Arc<AppState>) -> Puzzle {
    let solutions = generator::solutions("123456");
    state.store.create("123456", &solutions).await.unwrap()
}

/// Register a guest, return (token, username, user_id).
async fn guest(base: &str, username: &str) -> (String, String, i64) {
    let client = reqwest::Client::new();
    let resp: serde_json::Value = client
        .post(format!("{}/auth/guest", base))
        .json(&json!({ "username": username }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    (
        resp["token"].as_str().unwrap().to_string(),
        resp["username"].as_str().unwrap().to_string(),
        resp["user_id"].as_i64().unwrap(),
    )
}

/// Pin a user's rating so puzzle selection is deterministic.
async fn set_rating(state: &Arc<AppState>, user_id: i64, rating: i32) {
    sqlx::query("UPDATE users SET rating = ?1 WHERE id = ?2")
        .bind(rating)
        .bind(user_id)
        .execute(&state.db)
        .await
        .unwrap();
}

fn authed(client: &reqwest::Client, method: reqwest::Method, url: String, token: &str) -> reqwest::RequestBuilder {
    client
        .request(method, url)
        .header("Cookie", format!("session={}", token))
}

/// Connect a WebSocket client to one game room.
async fn ws_connect(base: &str, game_id: &str, token: &str) -> (WsSink, WsStream) {
    let ws_url = base.replace("http://", "ws://");
    let url = format!("{}/ws/game/{}?token={}", ws_url, game_id, token);
    let (stream, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    stream.split()
}

async fn ws_send(sink: &mut WsSink, msg: serde_json::Value) {
    sink.send(Message::Text(msg.to_string().into()))
        .await
        .unwrap();
}

/// Receive messages until one matches the expected type.
async fn ws_recv_type(stream: &mut WsStream, msg_type: &str) -> serde_json::Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let remaining = deadline - tokio::time::Instant::now();
        if remaining.is_zero() {
            panic!("Timed out waiting for message type: {}", msg_type);
        }
        let msg = tokio::time::timeout(remaining, stream.next())
            .await
            .unwrap_or_else(|_| panic!("Timed out waiting for {}", msg_type))
            .unwrap()
            .unwrap();

        if let Message::Text(text) = msg {
            let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
            if parsed["type"].as_str() == Some(msg_type) {
                return parsed;
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health() {
    let (base, _state) = start_server().await;
    let resp = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(resp, "ok");
}

#[tokio::test]
async fn test_guest_auth_assigns_default_rating() {
    let (base, _state) = start_server().await;
    let client = reqwest::Client::new();
    let resp: serde_json::Value = client
        .post(format!("{}/auth/guest", base))
        .json(&json!({ "username": "ada" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["username"], "ada");
    assert_eq!(resp["rating"], 1000);

    // Same name logs back into the same player.
    let again: serde_json::Value = client
        .post(format!("{}/auth/guest", base))
        .json(&json!({ "username": "ada" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(again["user_id"], resp["user_id"]);
    assert_ne!(again["token"], resp["token"]);
}

#[tokio::test]
async fn test_puzzle_for_user_matches_rating_band() {
    let (base, state) = start_server().await;
    let puzzle = seed_puzzle(&state).await;
    let (token, _, user_id) = guest(&base, "ada").await;
    let mid = (puzzle.min_elo + puzzle.max_elo) / 2;
    set_rating(&state, user_id, mid).await;

    let client = reqwest::Client::new();
    let resp: serde_json::Value = authed(
        &client,
        reqwest::Method::GET,
        format!("{}/api/puzzles/user", base),
        &token,
    )
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();

    assert_eq!(resp["sequence"], "123456");
    assert!(resp["min_elo"].as_i64().unwrap() <= mid as i64);
    assert!(resp["max_elo"].as_i64().unwrap() >= mid as i64);
}

#[tokio::test]
async fn test_puzzle_page_lists_newest_first() {
    let (base, state) = start_server().await;
    let puzzle = seed_puzzle(&state).await;
    let (token, _, _) = guest(&base, "ada").await;

    let client = reqwest::Client::new();
    let page: serde_json::Value = authed(
        &client,
        reqwest::Method::GET,
        format!(
            "{}/api/puzzles?difficulty={}&limit=10",
            base,
            puzzle.difficulty.level()
        ),
        &token,
    )
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();

    let entries = page.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["sequence"], "123456");

    // Difficulty outside 1..5 is invalid.
    let bad = authed(
        &client,
        reqwest::Method::GET,
        format!("{}/api/puzzles?difficulty=9", base),
        &token,
    )
    .send()
    .await
    .unwrap();
    assert_eq!(bad.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_one_shot_validation_rejects_wrong_digits() {
    let (base, state) = start_server().await;
    let puzzle = seed_puzzle(&state).await;
    let (token, _, _) = guest(&base, "ada").await;

    let client = reqwest::Client::new();
    // Evaluates to 90 and reorders nothing, but skips no digit check.
    let resp: serde_json::Value = authed(
        &client,
        reqwest::Method::POST,
        format!("{}/api/puzzles/{}/validate", base, puzzle.id),
        &token,
    )
    .json(&json!({ "solution": "(1+2+3)*(4+5+6)" }))
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();

    assert_eq!(resp["is_correct"], false);
    assert_eq!(resp["error_kind"], "wrong_digits");
    let steps = resp["steps"].as_array().unwrap();
    assert!(steps
        .iter()
        .any(|s| s["name"] == "digit_order" && s["passed"] == false));
}

#[tokio::test]
async fn test_duel_end_to_end() {
    let (base, state) = start_server().await;
    let puzzle = seed_puzzle(&state).await;
    let mid = (puzzle.min_elo + puzzle.max_elo) / 2;

    let (t1, _, u1) = guest(&base, "ada").await;
    let (t2, _, u2) = guest(&base, "grace").await;
    set_rating(&state, u1, mid).await;
    set_rating(&state, u2, mid).await;

    let client = reqwest::Client::new();

    // P1 creates a duel and connects.
    let created: serde_json::Value = authed(
        &client,
        reqwest::Method::POST,
        format!("{}/api/games", base),
        &t1,
    )
    .json(&json!({ "game_type": "duel" }))
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    let game_id = created["game_id"].as_str().unwrap().to_string();

    let (mut _sink1, mut stream1) = ws_connect(&base, &game_id, &t1).await;
    let snapshot = ws_recv_type(&mut stream1, "game_state").await;
    assert_eq!(snapshot["payload"]["status"], "waiting");

    // P2 joins over HTTP; P1 sees the start.
    let join = authed(
        &client,
        reqwest::Method::POST,
        format!("{}/api/games/{}/join", base, game_id),
        &t2,
    )
    .send()
    .await
    .unwrap();
    assert_eq!(join.status(), reqwest::StatusCode::NO_CONTENT);

    let start = ws_recv_type(&mut stream1, "game_start").await;
    assert_eq!(start["payload"]["puzzle"]["sequence"], "123456");

    // P2 connects late and still sees the full state.
    let (mut sink2, mut stream2) = ws_connect(&base, &game_id, &t2).await;
    let snapshot2 = ws_recv_type(&mut stream2, "game_state").await;
    assert_eq!(snapshot2["payload"]["status"], "active");
    assert_eq!(snapshot2["payload"]["puzzle"]["sequence"], "123456");

    // P1 submits a wrong expression; P2 watches the progress tick.
    let wrong: serde_json::Value = authed(
        &client,
        reqwest::Method::POST,
        format!("{}/api/games/{}/submit", base, game_id),
        &t1,
    )
    .json(&json!({ "solution": "1+2+3+4+5+6" }))
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    assert_eq!(wrong["is_correct"], false);
    assert_eq!(wrong["error_kind"], "wrong_value");

    let progress = ws_recv_type(&mut stream2, "player_progress").await;
    assert_eq!(progress["user_id"].as_str().unwrap(), u1.to_string());
    assert!((progress["payload"]["progress"].as_f64().unwrap() - 0.1).abs() < 1e-9);

    // P2 submits a real solution over the socket.
    let solution = generator::solutions("123456").remove(0);
    ws_send(
        &mut sink2,
        json!({
            "type": "solution_submitted",
            "payload": { "solution": solution },
        }),
    )
    .await;
    let submitted = ws_recv_type(&mut stream1, "solution_submitted").await;
    assert_eq!(submitted["user_id"].as_str().unwrap(), u2.to_string());
    assert_eq!(submitted["payload"]["is_correct"], true);
    assert!(submitted["payload"]["score"].as_f64().unwrap() > 0.0);

    // P1 finishes with the same expression; the duel completes and the
    // faster finisher takes the tie.
    let late: serde_json::Value = authed(
        &client,
        reqwest::Method::POST,
        format!("{}/api/games/{}/submit", base, game_id),
        &t1,
    )
    .json(&json!({ "solution": solution }))
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    assert_eq!(late["is_correct"], true);

    let end = ws_recv_type(&mut stream2, "game_end").await;
    assert_eq!(end["payload"]["winner_id"].as_str().unwrap(), u2.to_string());

    // Ratings moved for both correct solvers.
    let profile: serde_json::Value = reqwest::get(format!("{}/profile/grace", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(profile["rating"].as_i64().unwrap() >= mid as i64);
    assert_eq!(profile["games_won"], 1);
}

#[tokio::test]
async fn test_submit_to_completed_game_is_rejected() {
    let (base, state) = start_server().await;
    let puzzle = seed_puzzle(&state).await;
    let mid = (puzzle.min_elo + puzzle.max_elo) / 2;

    let (t1, _, u1) = guest(&base, "ada").await;
    let (t2, _, u2) = guest(&base, "grace").await;
    set_rating(&state, u1, mid).await;
    set_rating(&state, u2, mid).await;

    let client = reqwest::Client::new();
    let created: serde_json::Value = authed(
        &client,
        reqwest::Method::POST,
        format!("{}/api/games", base),
        &t1,
    )
    .json(&json!({ "game_type": "duel" }))
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    let game_id = created["game_id"].as_str().unwrap().to_string();

    authed(
        &client,
        reqwest::Method::POST,
        format!("{}/api/games/{}/join", base, game_id),
        &t2,
    )
    .send()
    .await
    .unwrap();

    let solution = generator::solutions("123456").remove(0);
    for token in [&t1, &t2] {
        let resp: serde_json::Value = authed(
            &client,
            reqwest::Method::POST,
            format!("{}/api/games/{}/submit", base, game_id),
            token,
        )
        .json(&json!({ "solution": solution }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
        assert_eq!(resp["is_correct"], true);
    }

    // Game is completed now; a further submission conflicts.
    let resp = authed(
        &client,
        reqwest::Method::POST,
        format!("{}/api/games/{}/submit", base, game_id),
        &t1,
    )
    .json(&json!({ "solution": solution }))
    .send()
    .await
    .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_matchmaking_pairs_and_notifies() {
    let (base, state) = start_server().await;
    let puzzle = seed_puzzle(&state).await;
    let mid = (puzzle.min_elo + puzzle.max_elo) / 2;

    let (t1, _, u1) = guest(&base, "ada").await;
    let (t2, _, u2) = guest(&base, "grace").await;
    set_rating(&state, u1, mid).await;
    set_rating(&state, u2, mid).await;

    // Both hold a pre-game socket so match_found can reach them.
    let (mut _s1, mut stream1) = ws_connect(&base, "lobby", &t1).await;
    let (mut _s2, mut stream2) = ws_connect(&base, "lobby", &t2).await;

    let client = reqwest::Client::new();
    let first: serde_json::Value = authed(
        &client,
        reqwest::Method::POST,
        format!("{}/api/matchmaking/queue", base),
        &t1,
    )
    .json(&json!({ "game_type": "duel", "ranked": true }))
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    assert_eq!(first["in_queue"], true);

    let second: serde_json::Value = authed(
        &client,
        reqwest::Method::POST,
        format!("{}/api/matchmaking/queue", base),
        &t2,
    )
    .json(&json!({ "game_type": "duel", "ranked": true }))
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    // Equal ratings pair inside the initial band on the immediate pass.
    assert_eq!(second["in_queue"], false);
    assert!(second["game_id"].is_string());

    let m1 = ws_recv_type(&mut stream1, "match_found").await;
    let m2 = ws_recv_type(&mut stream2, "match_found").await;
    assert_eq!(m1["payload"]["opponent"]["username"], "grace");
    assert_eq!(m2["payload"]["opponent"]["username"], "ada");
    assert_eq!(m1["payload"]["ranked"], true);
    assert_eq!(m1["payload"]["game_id"], m2["payload"]["game_id"]);

    // Status poll agrees with the push.
    let status: serde_json::Value = authed(
        &client,
        reqwest::Method::GET,
        format!("{}/api/matchmaking/queue/status", base),
        &t1,
    )
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    assert_eq!(status["in_queue"], false);
    assert_eq!(status["game_id"], m1["payload"]["game_id"]);
}

#[tokio::test]
async fn test_queue_join_is_exclusive_and_leave_round_trips() {
    let (base, _state) = start_server().await;
    let (t1, _, _) = guest(&base, "ada").await;
    let client = reqwest::Client::new();

    let join = |token: &str| {
        authed(
            &client,
            reqwest::Method::POST,
            format!("{}/api/matchmaking/queue", base),
            token,
        )
        .json(&json!({ "game_type": "duel", "ranked": false }))
    };

    assert!(join(&t1).send().await.unwrap().status().is_success());
    // Double join conflicts.
    assert_eq!(
        join(&t1).send().await.unwrap().status(),
        reqwest::StatusCode::CONFLICT
    );

    let leave = authed(
        &client,
        reqwest::Method::DELETE,
        format!("{}/api/matchmaking/queue", base),
        &t1,
    )
    .send()
    .await
    .unwrap();
    assert_eq!(leave.status(), reqwest::StatusCode::NO_CONTENT);

    // Leaving again reports no entry.
    let again = authed(
        &client,
        reqwest::Method::DELETE,
        format!("{}/api/matchmaking/queue", base),
        &t1,
    )
    .send()
    .await
    .unwrap();
    assert_eq!(again.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_distant_ratings_stay_queued_on_first_pass() {
    let (base, state) = start_server().await;
    let (t1, _, u1) = guest(&base, "ada").await;
    let (t2, _, u2) = guest(&base, "grace").await;
    set_rating(&state, u1, 1000).await;
    set_rating(&state, u2, 1400).await;

    let client = reqwest::Client::new();
    for token in [&t1, &t2] {
        authed(
            &client,
            reqwest::Method::POST,
            format!("{}/api/matchmaking/queue", base),
            token,
        )
        .json(&json!({ "game_type": "duel", "ranked": true }))
        .send()
        .await
        .unwrap();
    }

    // 400 apart with a fresh band of 100: both still waiting.
    let status: serde_json::Value = authed(
        &client,
        reqwest::Method::GET,
        format!("{}/api/matchmaking/queue/status", base),
        &t1,
    )
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    assert_eq!(status["in_queue"], true);
}

#[tokio::test]
async fn test_custom_game_seats_everyone() {
    let (base, state) = start_server().await;
    let puzzle = seed_puzzle(&state).await;
    let mid = (puzzle.min_elo + puzzle.max_elo) / 2;

    let (t1, _, u1) = guest(&base, "ada").await;
    let (t2, _, u2) = guest(&base, "grace").await;
    set_rating(&state, u1, mid).await;
    set_rating(&state, u2, mid).await;

    let (mut _s2, mut stream2) = ws_connect(&base, "lobby", &t2).await;

    let client = reqwest::Client::new();
    let created: serde_json::Value = authed(
        &client,
        reqwest::Method::POST,
        format!("{}/api/matchmaking/custom", base),
        &t1,
    )
    .json(&json!({ "opponent_ids": [u2], "game_type": "duel" }))
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    let game_id = created["game_id"].as_str().unwrap().to_string();

    let invite = ws_recv_type(&mut stream2, "match_found").await;
    assert_eq!(invite["payload"]["game_id"].as_str().unwrap(), game_id);
    assert_eq!(invite["payload"]["opponent"]["username"], "ada");
    assert_eq!(invite["payload"]["ranked"], false);

    let snapshot: serde_json::Value = authed(
        &client,
        reqwest::Method::GET,
        format!("{}/api/games/{}", base, game_id),
        &t1,
    )
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    assert_eq!(snapshot["status"], "active");
    assert_eq!(snapshot["players"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_practice_flow() {
    let (base, state) = start_server().await;
    let puzzle = seed_puzzle(&state).await;
    let mid = (puzzle.min_elo + puzzle.max_elo) / 2;

    let (t1, _, u1) = guest(&base, "ada").await;
    set_rating(&state, u1, mid).await;

    let (mut sink, mut stream) = ws_connect(&base, "lobby", &t1).await;

    ws_send(
        &mut sink,
        json!({ "type": "practice_start", "payload": { "timed_mode": false } }),
    )
    .await;

    let started = ws_recv_type(&mut stream, "practice_start").await;
    assert_eq!(started["payload"]["elo"].as_i64().unwrap(), mid as i64);

    let first = ws_recv_type(&mut stream, "practice_next_puzzle").await;
    let sequence = first["payload"]["puzzle"]["sequence"]
        .as_str()
        .unwrap()
        .to_string();

    // Solve whatever the store handed us.
    let solution = generator::solutions(&sequence).remove(0);
    ws_send(
        &mut sink,
        json!({ "type": "practice_submit_solution", "payload": { "solution": solution } }),
    )
    .await;

    let result = ws_recv_type(&mut stream, "practice_result").await;
    assert_eq!(result["payload"]["is_correct"], true);
    assert_eq!(result["payload"]["status"], "active");
    assert!(result["payload"]["rating_delta"].as_i64().unwrap() > 0);

    let next = ws_recv_type(&mut stream, "practice_next_puzzle").await;
    assert_eq!(next["payload"]["puzzles_solved"], 1);
    assert!(next["payload"]["elo"].as_i64().unwrap() > mid as i64);

    // A wrong answer in untimed mode keeps the session alive.
    ws_send(
        &mut sink,
        json!({ "type": "practice_submit_solution", "payload": { "solution": "1+1+1+1+1+1" } }),
    )
    .await;
    let wrong = ws_recv_type(&mut stream, "practice_result").await;
    assert_eq!(wrong["payload"]["is_correct"], false);
    assert_eq!(wrong["payload"]["status"], "active");

    ws_send(&mut sink, json!({ "type": "practice_end", "payload": {} })).await;
    let ended = ws_recv_type(&mut stream, "practice_end").await;
    assert_eq!(ended["payload"]["puzzles_solved"], 1);
}

#[tokio::test]
async fn test_practice_timed_failure() {
    let (base, state) = start_server().await;
    let puzzle = seed_puzzle(&state).await;
    let mid = (puzzle.min_elo + puzzle.max_elo) / 2;

    let (t1, _, u1) = guest(&base, "ada").await;
    set_rating(&state, u1, mid).await;

    let (mut sink, mut stream) = ws_connect(&base, "lobby", &t1).await;
    ws_send(
        &mut sink,
        json!({ "type": "practice_start", "payload": { "timed_mode": true } }),
    )
    .await;
    let _ = ws_recv_type(&mut stream, "practice_next_puzzle").await;

    // Rewind the puzzle clock past the timed limit.
    {
        let mut session = state.practice.get_mut(&u1).unwrap();
        session.current_started = std::time::Instant::now() - Duration::from_secs(65);
    }

    ws_send(
        &mut sink,
        json!({ "type": "practice_submit_solution", "payload": { "solution": "1+1+1+1+1+1" } }),
    )
    .await;

    let result = ws_recv_type(&mut stream, "practice_result").await;
    assert_eq!(result["payload"]["is_correct"], false);
    assert_eq!(result["payload"]["status"], "failed");

    let ended = ws_recv_type(&mut stream, "practice_end").await;
    assert_eq!(ended["payload"]["puzzles_solved"], 0);
}

#[tokio::test]
async fn test_ws_ping_pong() {
    let (base, _state) = start_server().await;
    let (t1, _, _) = guest(&base, "ada").await;
    let (mut sink, mut stream) = ws_connect(&base, "lobby", &t1).await;

    ws_send(&mut sink, json!({ "type": "ping", "payload": {} })).await;
    let pong = ws_recv_type(&mut stream, "pong").await;
    assert!(pong["timestamp"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn test_unknown_message_type_is_an_error() {
    let (base, _state) = start_server().await;
    let (t1, _, _) = guest(&base, "ada").await;
    let (mut sink, mut stream) = ws_connect(&base, "lobby", &t1).await;

    // game_state is hub-to-client only.
    ws_send(&mut sink, json!({ "type": "game_state", "payload": {} })).await;
    let err = ws_recv_type(&mut stream, "error").await;
    assert_eq!(err["payload"]["code"], "invalid");
}

#[tokio::test]
async fn test_ws_requires_session() {
    let (base, _state) = start_server().await;
    let ws_url = base.replace("http://", "ws://");
    let url = format!("{}/ws/game/lobby?token=bogus", ws_url);
    assert!(tokio_tungstenite::connect_async(&url).await.is_err());
}
