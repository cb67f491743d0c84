use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use murmur_types::events::{ErrorCode, GatewayCommand, GatewayEvent};
use tracing::{info, warn};
use uuid::Uuid;

use crate::GatewayState;
use crate::error::blocking;
use crate::handlers::{Session, handle_command, notify_peers};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

fn encode(event: &GatewayEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            warn!("Failed to encode gateway event: {}", e);
            None
        }
    }
}

/// Drive a socket whose JWT was already validated at the HTTP upgrade.
pub async fn handle_connection(
    socket: WebSocket,
    state: GatewayState,
    user_id: Uuid,
    username: String,
) {
    let (mut sender, mut receiver) = socket.split();
    let dispatcher = state.engine.dispatcher().clone();

    // Subscribe before announcing ourselves so our own userConnected arrives too
    let mut broadcast_rx = dispatcher.subscribe();
    let (conn_id, mut user_rx) = dispatcher.connect(user_id).await;
    let session = Session {
        conn_id,
        user_id,
        username: username.clone(),
    };
    info!("{} ({}) connected to gateway as {}", username, user_id, conn_id);

    let connected = GatewayEvent::Connected {
        user_id,
        username: username.clone(),
    };
    let sent = match encode(&connected) {
        Some(msg) => sender.send(msg).await.is_ok(),
        None => false,
    };
    if !sent {
        close_session(&state, &session).await;
        return;
    }

    dispatcher.broadcast(GatewayEvent::UserConnected { user_id });
    let user_ids = dispatcher.online_users().await;
    dispatcher
        .send_to_connection(conn_id, GatewayEvent::CurrentOnlineUsers { user_ids })
        .await;

    if let Err(e) = blocking(state.engine.db(), move |db| db.update_online_flag(user_id, true)).await {
        warn!("Could not set online flag for {}: {}", user_id, e);
    }
    if let Err(e) = notify_peers(&state, user_id, true).await {
        warn!("Could not announce {} to peers: {}", user_id, e);
    }
    if let Err(e) = state.engine.catch_up_delivered(user_id).await {
        warn!("Delivered catch-up for {} failed: {}", user_id, e);
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts + targeted events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(_) => break,
                    };
                    let Some(msg) = encode(&event) else { continue };
                    if sender.send(msg).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let Some(event) = result else { break };
                    let Some(msg) = encode(&event) else { continue };
                    if sender.send(msg).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client, one at a time so replies keep their order
    let recv_state = state.clone();
    let recv_session = session.clone();
    let mut recv_task = tokio::spawn(async move {
        let dispatcher = recv_state.engine.dispatcher().clone();
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let raw = text.as_str();
                    match serde_json::from_str::<GatewayCommand>(raw) {
                        Ok(cmd) => {
                            let name = cmd.name();
                            if let Err(e) = handle_command(&recv_state, &recv_session, cmd).await {
                                warn!(
                                    "{} ({}) {} rejected: {}",
                                    recv_session.username, recv_session.user_id, name, e
                                );
                                dispatcher
                                    .send_to_connection(recv_session.conn_id, e.to_event(Some(name)))
                                    .await;
                            }
                        }
                        Err(e) => {
                            warn!(
                                "{} ({}) bad command: {} -- raw: {}",
                                recv_session.username,
                                recv_session.user_id,
                                e,
                                raw.chars().take(200).collect::<String>()
                            );
                            dispatcher
                                .send_to_connection(
                                    recv_session.conn_id,
                                    GatewayEvent::Error {
                                        code: ErrorCode::Validation,
                                        message: format!("malformed command: {}", e),
                                        command: None,
                                    },
                                )
                                .await;
                        }
                    }
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    close_session(&state, &session).await;
}

/// Disconnect bookkeeping. Only the user's current connection announces the
/// user as gone; a superseded one just removes itself.
///
/// Teardown awaits the database, so the user can reconnect halfway through.
/// Each step re-checks for a newer registration and backs out if one exists.
pub async fn close_session(state: &GatewayState, session: &Session) {
    let dispatcher = state.engine.dispatcher();
    let user_id = session.user_id;
    if !dispatcher.disconnect(user_id, session.conn_id).await {
        info!(
            "{} ({}) superseded connection {} closed",
            session.username, user_id, session.conn_id
        );
        return;
    }

    if let Err(e) = blocking(state.engine.db(), move |db| db.update_online_flag(user_id, false)).await {
        warn!("Could not clear online flag for {}: {}", user_id, e);
    }
    if dispatcher.has_connection(user_id).await {
        restore_online(state, session, false).await;
        return;
    }

    if let Err(e) = notify_peers(state, user_id, false).await {
        warn!("Could not announce {} offline to peers: {}", user_id, e);
    }
    if !dispatcher
        .broadcast_unless_connected(user_id, GatewayEvent::UserDisconnected { user_id })
        .await
    {
        restore_online(state, session, true).await;
        return;
    }
    info!("{} ({}) disconnected from gateway", session.username, user_id);
}

/// Undo a teardown overtaken by a reconnect. `announced` means peers were
/// already told the user went offline.
async fn restore_online(state: &GatewayState, session: &Session, announced: bool) {
    let user_id = session.user_id;
    info!(
        "{} ({}) reconnected while {} was closing",
        session.username, user_id, session.conn_id
    );
    if let Err(e) = blocking(state.engine.db(), move |db| db.update_online_flag(user_id, true)).await {
        warn!("Could not restore online flag for {}: {}", user_id, e);
    }
    if announced {
        if let Err(e) = notify_peers(state, user_id, true).await {
            warn!("Could not re-announce {} to peers: {}", user_id, e);
        }
    }
}
