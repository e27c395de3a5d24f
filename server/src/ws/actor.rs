use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::engine::{ConnectionId, EngineEvent, PresenceStatus, ServerEvent, Topic, UserId};
use crate::state::AppState;
use crate::ws::protocol;
use crate::ws::transport::encode_event;

/// WebSocket keepalive. The server pings every `interval` so that abrupt
/// disconnects are detected and deregistered; a connection that does not
/// answer within `timeout` is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Last presence status this client was told about, per user.
///
/// The subscription opens before the snapshot is taken, so the stream can
/// repeat what the snapshot already said (including this user's own online
/// edge). Only real changes are forwarded.
#[derive(Debug, Default)]
struct PresenceFilter {
    known: HashMap<UserId, PresenceStatus>,
}

impl PresenceFilter {
    fn seeded(online: &[UserId]) -> Self {
        Self {
            known: online
                .iter()
                .map(|user_id| (user_id.clone(), PresenceStatus::Online))
                .collect(),
        }
    }

    fn admit(&mut self, event: &EngineEvent) -> bool {
        let (user_id, status) = match event {
            EngineEvent::UserOnline(user_id) => (user_id, PresenceStatus::Online),
            EngineEvent::UserOffline(user_id) => (user_id, PresenceStatus::Offline),
            _ => return true,
        };
        let previous = self
            .known
            .insert(user_id.clone(), status)
            .unwrap_or(PresenceStatus::Offline);
        previous != status
    }
}

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// - Writer task: owns the sink, drains the connection's outbound queue
/// - Presence task: forwards global online/offline events into the queue
/// - Ping task: closes the socket when pongs stop arriving
/// - Reader loop: decodes client frames and hands them to the engine
///
/// The queue sender is attached to the transport under a fresh connection
/// id, so the engine can push to this client like any other.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: UserId) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();
    let connection_id = ConnectionId::new();

    // Subscribe before registering so this client also sees its own
    // online transition and nothing between snapshot and stream is lost.
    let mut presence = state.engine.subscribe(Topic::Presence);

    state.transport.attach(connection_id, tx.clone());
    if let Err(e) = state
        .engine
        .register_connection(user_id.clone(), connection_id)
    {
        tracing::error!(
            user_id = %user_id,
            connection_id = %connection_id,
            error = %e,
            "Connection registration failed"
        );
        state.transport.detach(connection_id);
        return;
    }

    // Send the current presence snapshot to the newly connected client
    let snapshot = state.engine.registry().online_users();
    for online in &snapshot {
        let event = ServerEvent::Presence {
            user_id: online.clone(),
            status: PresenceStatus::Online,
        };
        if let Err(e) = state.transport.send_event(connection_id, &event) {
            tracing::warn!(
                connection_id = %connection_id,
                error = %e,
                "Presence snapshot not delivered"
            );
            break;
        }
    }
    let mut filter = PresenceFilter::seeded(&snapshot);

    tracing::info!(
        user_id = %user_id,
        connection_id = %connection_id,
        "WebSocket actor started"
    );

    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    let presence_tx = tx.clone();
    let presence_handle = tokio::spawn(async move {
        while let Some(event) = presence.recv().await {
            if !filter.admit(&event) {
                continue;
            }
            let Ok(msg) = encode_event(&event.to_server_event()) else {
                continue;
            };
            if presence_tx.send(msg).is_err() {
                break;
            }
        }
    });

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    let ping_tx = tx.clone();
    let heartbeat = state.heartbeat;
    let ping_user = user_id.clone();
    let mut ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(heartbeat.interval);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died, connection is gone
                break;
            }

            match timeout(heartbeat.timeout, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!(user_id = %ping_user, "Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Reader loop: process incoming WebSocket messages until the client
    // leaves or the heartbeat gives up on it
    loop {
        let incoming = tokio::select! {
            incoming = ws_receiver.next() => incoming,
            _ = &mut ping_handle => {
                tracing::info!(user_id = %user_id, "Heartbeat ended, dropping connection");
                break;
            }
        };
        match incoming {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text_frame(text.as_str(), &state, &user_id, connection_id)
                        .await;
                }
                Message::Binary(data) => {
                    tracing::debug!(
                        user_id = %user_id,
                        bytes = data.len(),
                        "Ignoring binary frame (protocol is JSON text)"
                    );
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        user_id = %user_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(user_id = %user_id, "WebSocket stream ended");
                break;
            }
        }
    }

    writer_handle.abort();
    presence_handle.abort();
    ping_handle.abort();

    // Stop routing to this socket before the engine announces departure
    state.transport.detach(connection_id);
    state.engine.on_disconnect(connection_id).await;

    tracing::info!(
        user_id = %user_id,
        connection_id = %connection_id,
        "WebSocket actor stopped"
    );
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            break;
        }
    }
}
