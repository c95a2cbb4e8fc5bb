use super::AppState;
use crate::error::{GameError, GameResult};
use crate::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How long (seconds) a heartbeat keeps an online player green
pub const PRESENCE_FRESHNESS_SECS: i64 = 20;

/// What observers render next to a player's name
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Green,
    Yellow,
    Red,
}

/// Classify a player from stored status and last heartbeat. Never cached.
pub fn classify_presence(player: &Player, now: DateTime<Utc>) -> Presence {
    match player.status {
        ConnectionStatus::Offline => Presence::Red,
        ConnectionStatus::Away => Presence::Yellow,
        ConnectionStatus::Online => {
            let age = now.signed_duration_since(player.last_seen);
            if age <= chrono::Duration::seconds(PRESENCE_FRESHNESS_SECS) {
                Presence::Green
            } else {
                // Online but stale
                Presence::Yellow
            }
        }
    }
}

impl AppState {
    /// Record a heartbeat: refresh last-seen, mark online and broadcast
    pub async fn heartbeat(&self, player_id: &str) -> GameResult<()> {
        let room_id = self
            .set_connection_status(player_id, ConnectionStatus::Online)
            .await?;
        self.broadcast_room(&room_id).await;
        Ok(())
    }

    /// Explicit "tab closed" signal
    pub async fn mark_offline(&self, player_id: &str) -> GameResult<()> {
        let room_id = self
            .set_connection_status(player_id, ConnectionStatus::Offline)
            .await?;
        tracing::info!("Player {} went offline", player_id);
        self.broadcast_room(&room_id).await;
        Ok(())
    }

    /// Explicit "tab hidden" signal
    pub async fn mark_away(&self, player_id: &str) -> GameResult<()> {
        let room_id = self
            .set_connection_status(player_id, ConnectionStatus::Away)
            .await?;
        self.broadcast_room(&room_id).await;
        Ok(())
    }

    /// Update presence without notifying anyone. Returns the player's room.
    pub(crate) async fn set_connection_status(
        &self,
        player_id: &str,
        status: ConnectionStatus,
    ) -> GameResult<RoomId> {
        let mut players = self.players.write().await;
        let player = players
            .get_mut(player_id)
            .filter(|p| p.is_active())
            .ok_or(GameError::PlayerNotFound)?;

        // Last write wins; heartbeats from the same player may arrive out of order
        player.status = status;
        player.last_seen = Utc::now();
        Ok(player.room_id.clone())
    }
}
