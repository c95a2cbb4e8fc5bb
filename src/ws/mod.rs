pub mod handlers;
mod room;
mod round;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::broadcast::{GameSnapshot, RoomEvent};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;
use crate::types::{PlayerId, RoundId};

/// Per-socket state: who this connection plays as and what it observes
#[derive(Default)]
pub struct Connection {
    pub player_id: Option<PlayerId>,
    pub room_updates: Option<broadcast::Receiver<RoomEvent>>,
    pub game_updates: Option<(RoundId, broadcast::Receiver<GameSnapshot>)>,
}

impl Connection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the bound player and stop observing
    pub fn unbind(&mut self) {
        self.player_id = None;
        self.room_updates = None;
        self.game_updates = None;
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

enum Incoming {
    Room(Option<RoomEvent>),
    Game(Option<GameSnapshot>),
    Frame(Option<Result<Message, axum::Error>>),
}

/// Wait for the next update on an optional topic. A closed topic yields None;
/// a missing one never resolves.
async fn next_update<T: Clone>(rx: Option<&mut broadcast::Receiver<T>>) -> Option<T> {
    let Some(rx) = rx else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(update) => return Some(update),
            // Snapshots are full state, so skipping stale ones loses nothing
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!("Observer lagged, skipped {} snapshots", skipped);
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

async fn send_all(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    messages: Vec<ServerMessage>,
) -> Result<(), axum::Error> {
    for msg in messages {
        match serde_json::to_string(&msg) {
            Ok(json) => sender.send(Message::Text(json.into())).await?,
            Err(e) => tracing::error!("Failed to serialize server message: {}", e),
        }
    }
    Ok(())
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut conn = Connection::new();

    tracing::info!("WebSocket connected");

    loop {
        let incoming = tokio::select! {
            event = next_update(conn.room_updates.as_mut()) => Incoming::Room(event),
            snapshot = next_update(conn.game_updates.as_mut().map(|(_, rx)| rx)) => {
                Incoming::Game(snapshot)
            }
            frame = receiver.next() => Incoming::Frame(frame),
        };

        let replies = match incoming {
            Incoming::Room(Some(event)) => handlers::handle_room_event(event, &mut conn),
            Incoming::Room(None) => {
                conn.room_updates = None;
                Vec::new()
            }
            Incoming::Game(Some(snapshot)) => vec![ServerMessage::Game(snapshot)],
            Incoming::Game(None) => {
                conn.game_updates = None;
                Vec::new()
            }
            Incoming::Frame(Some(Ok(Message::Text(text)))) => {
                tracing::debug!("Received message: {}", text);
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(msg) => handlers::handle_message(msg, &mut conn, &state).await,
                    Err(e) => {
                        tracing::warn!("Failed to parse client message: {}", e);
                        vec![ServerMessage::error(
                            "PARSE_ERROR",
                            format!("Invalid message format: {}", e),
                        )]
                    }
                }
            }
            Incoming::Frame(Some(Ok(Message::Ping(data)))) => {
                if sender.send(Message::Pong(data)).await.is_err() {
                    break;
                }
                Vec::new()
            }
            Incoming::Frame(Some(Ok(Message::Close(_)))) | Incoming::Frame(None) => break,
            Incoming::Frame(Some(Ok(_))) => Vec::new(),
            Incoming::Frame(Some(Err(e))) => {
                tracing::warn!("WebSocket error: {}", e);
                break;
            }
        };

        if send_all(&mut sender, replies).await.is_err() {
            break;
        }
    }

    // A closed socket is an explicit "tab closed"
    if let Some(player_id) = conn.player_id.take() {
        if let Err(e) = state.mark_offline(&player_id).await {
            tracing::debug!("Could not mark {} offline: {}", player_id, e);
        }
    }
    tracing::info!("WebSocket connection closed");
}
