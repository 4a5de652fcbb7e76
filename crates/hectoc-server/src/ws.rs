use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use serde_json::json;
use tokio::sync::mpsc;

use hectoc_core::protocol::{
    Envelope, ErrorPayload, MessageType, PracticeStartPayload, SubmitPayload,
};

use crate::error::AppError;
use crate::game;
use crate::practice;
use crate::state::{AppState, ConnectionHandle};

/// Max inbound messages per second before the client is told to slow down.
const RATE_LIMIT: u32 = 20;

/// Top-level WebSocket handler, spawned per connection. The connection is
/// scoped to one game room for its lifetime.
pub async fn handle_socket(
    state: Arc<AppState>,
    mut socket: WebSocket,
    user_id: i64,
    username: String,
    rating: i32,
    game_id: String,
) {
    state.connection_count.fetch_add(1, Ordering::Relaxed);

    let (tx, mut rx) = mpsc::channel::<Envelope>(state.config.send_queue);

    state.connections.insert(
        user_id,
        ConnectionHandle {
            user_id,
            username: username.clone(),
            rating,
            tx: tx.clone(),
            game_id: Some(game_id.clone()),
            message_count: 0,
            rate_limit_window: Instant::now(),
        },
    );

    // Room membership and the join fan-out.
    state.join_room(&game_id, user_id);
    state.broadcast_except(
        &game_id,
        user_id,
        Envelope::new(MessageType::PlayerJoined, json!({}))
            .with_game(&game_id)
            .with_user(user_id.to_string()),
    );

    // Current state straight to the late subscriber. Pre-game sockets
    // (the game id is not minted yet) just wait for their match_found.
    match game::snapshot(&state, &game_id).await {
        Ok(snapshot) => {
            let _ = tx
                .try_send(
                    Envelope::new(
                        MessageType::GameState,
                        serde_json::to_value(&snapshot).unwrap_or_default(),
                    )
                    .with_game(&game_id),
                );
        }
        Err(AppError::NotFound(_)) => {
            tracing::debug!(user_id, %game_id, "socket opened ahead of its game");
        }
        Err(e) => {
            let _ = tx.try_send(error_envelope(&e));
        }
    }

    let mut ping_interval = tokio::time::interval(state.config.ping_period());
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping_interval.tick().await; // first tick fires immediately
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            // Outbound: forward queued envelopes to the WebSocket.
            maybe_env = rx.recv() => {
                match maybe_env {
                    Some(env) => {
                        if let Ok(text) = serde_json::to_string(&env) {
                            if socket.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    // Sender side closed: we were evicted.
                    None => break,
                }
            }
            // Liveness: ping on schedule, drop on a missed pong deadline.
            _ = ping_interval.tick() => {
                if last_pong.elapsed() > state.config.pong_wait {
                    tracing::info!(user_id, "pong deadline missed, closing");
                    break;
                }
                let ping = Envelope::new(MessageType::Ping, json!({}));
                if let Ok(text) = serde_json::to_string(&ping) {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
            }
            // Inbound: read from the WebSocket.
            maybe_msg = socket.recv() => {
                match maybe_msg {
                    Some(Ok(Message::Text(text))) => {
                        last_pong = Instant::now();

                        if text.len() > state.config.read_limit {
                            let _ = tx.try_send(plain_error(
                                "invalid",
                                "message exceeds the read limit",
                            ));
                            continue;
                        }

                        if rate_limited(&state, user_id) {
                            let _ = tx.try_send(plain_error("rate_limited", "slow down"));
                            continue;
                        }

                        let envelope: Envelope = match serde_json::from_str(text.trim()) {
                            Ok(env) => env,
                            Err(e) => {
                                let _ = tx.try_send(plain_error(
                                    "invalid",
                                    format!("malformed envelope: {}", e),
                                ));
                                continue;
                            }
                        };

                        handle_message(&state, user_id, &game_id, &tx, envelope).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => continue,
                }
            }
        }
    }

    // Unregister; a replacement connection for the same user keeps its own
    // handle.
    let ours = state
        .connections
        .get(&user_id)
        .map(|c| c.tx.same_channel(&tx))
        .unwrap_or(false);
    if ours {
        state.connections.remove(&user_id);
        state.leave_room(&game_id, user_id);
        state.broadcast(
            &game_id,
            Envelope::new(MessageType::PlayerLeft, json!({}))
                .with_game(&game_id)
                .with_user(user_id.to_string()),
        );
        state.matchmaker.discard(user_id);
    }
    state.connection_count.fetch_sub(1, Ordering::Relaxed);
    tracing::debug!(user_id, %game_id, "socket closed");
}

/// Sliding one-second message allowance, tracked on the connection handle.
fn rate_limited(state: &AppState, user_id: i64) -> bool {
    let mut conn = match state.connections.get_mut(&user_id) {
        Some(c) => c,
        None => return true,
    };
    let now = Instant::now();
    if now.duration_since(conn.rate_limit_window) > Duration::from_secs(1) {
        conn.rate_limit_window = now;
        conn.message_count = 0;
    }
    conn.message_count += 1;
    conn.message_count > RATE_LIMIT
}

/// Dispatch one inbound envelope.
async fn handle_message(
    state: &Arc<AppState>,
    user_id: i64,
    game_id: &str,
    tx: &mpsc::Sender<Envelope>,
    envelope: Envelope,
) {
    match envelope.kind {
        MessageType::Ping => {
            let _ = tx.try_send(Envelope::new(MessageType::Pong, json!({})));
        }
        MessageType::Pong => {}

        MessageType::PlayerProgress => {
            let progress = envelope.payload["progress"].as_f64().unwrap_or(0.0);
            game::report_progress(state, game_id, user_id, progress);
        }

        MessageType::SolutionSubmitted => {
            let payload: SubmitPayload = match serde_json::from_value(envelope.payload) {
                Ok(p) => p,
                Err(e) => {
                    let _ = tx.try_send(plain_error("invalid", format!("bad payload: {}", e)));
                    return;
                }
            };
            if let Err(e) = game::submit(state, game_id, user_id, &payload.solution).await {
                let _ = tx.try_send(error_envelope(&e));
            }
        }

        MessageType::PracticeStart => {
            let payload: PracticeStartPayload =
                serde_json::from_value(envelope.payload).unwrap_or(PracticeStartPayload {
                    timed_mode: false,
                    start_elo: None,
                });
            if let Err(e) =
                practice::start_session(state, user_id, payload.timed_mode, payload.start_elo)
                    .await
            {
                let _ = tx.try_send(error_envelope(&e));
            }
        }

        MessageType::PracticeSubmitSolution => {
            let payload: SubmitPayload = match serde_json::from_value(envelope.payload) {
                Ok(p) => p,
                Err(e) => {
                    let _ = tx.try_send(plain_error("invalid", format!("bad payload: {}", e)));
                    return;
                }
            };
            if let Err(e) = practice::submit(state, user_id, &payload.solution).await {
                let _ = tx.try_send(error_envelope(&e));
            }
        }

        MessageType::PracticeEnd => {
            if let Err(e) = practice::end_session(state, user_id).await {
                let _ = tx.try_send(error_envelope(&e));
            }
        }

        other => {
            let _ = tx.try_send(plain_error(
                "invalid",
                format!("unsupported client message type: {:?}", other),
            ));
        }
    }
}

fn error_envelope(e: &AppError) -> Envelope {
    plain_error(e.code(), e.to_string())
}

fn plain_error(code: &str, message: impl Into<String>) -> Envelope {
    Envelope::new(
        MessageType::Error,
        serde_json::to_value(&ErrorPayload {
            code: code.to_string(),
            message: message.into(),
        })
        .unwrap_or_default(),
    )
}
