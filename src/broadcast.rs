//! Per-room and per-round publish/subscribe topics.
//!
//! The hub only moves snapshots around; building them is the state layer's job.

use crate::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};

const TOPIC_CAPACITY: usize = 100;

/// Player as seen by observers, with presence already classified
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerView {
    #[serde(flatten)]
    pub player: Player,
    pub presence: crate::state::Presence,
}

/// Full state of a room and its active players
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub room: Room,
    pub players: Vec<PlayerView>,
    pub server_now: DateTime<Utc>,
}

/// Full state of a round: the round plus every answer and guess
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub round: Round,
    pub answers: Vec<Answer>,
    pub guesses: Vec<Guess>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoomEvent {
    Updated(RoomSnapshot),
    /// The last player left and the room was deleted
    Closed { room_id: RoomId },
}

#[derive(Default)]
pub struct Hub {
    rooms: RwLock<HashMap<RoomId, broadcast::Sender<RoomEvent>>>,
    games: RwLock<HashMap<RoundId, broadcast::Sender<GameSnapshot>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe_room(&self, room_id: &str) -> broadcast::Receiver<RoomEvent> {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room_id.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe()
    }

    pub async fn subscribe_game(&self, round_id: &str) -> broadcast::Receiver<GameSnapshot> {
        let mut games = self.games.write().await;
        games
            .entry(round_id.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe()
    }

    /// Publish to a room's observers. Returns how many received it.
    pub async fn publish_room(&self, room_id: &str, event: RoomEvent) -> usize {
        match self.rooms.read().await.get(room_id) {
            // No receivers connected is fine
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        }
    }

    pub async fn publish_game(&self, snapshot: GameSnapshot) -> usize {
        match self.games.read().await.get(&snapshot.round.id) {
            Some(tx) => tx.send(snapshot).unwrap_or(0),
            None => 0,
        }
    }

    /// Tell observers the room is gone, then drop its topics
    pub async fn close_room(&self, room_id: &str, round_ids: &[RoundId]) {
        if let Some(tx) = self.rooms.write().await.remove(room_id) {
            let _ = tx.send(RoomEvent::Closed {
                room_id: room_id.to_string(),
            });
        }
        let mut games = self.games.write().await;
        for round_id in round_ids {
            games.remove(round_id);
        }
    }

    /// Drop topics nobody listens to anymore
    pub async fn prune(&self) -> usize {
        let mut pruned = 0;
        {
            let mut rooms = self.rooms.write().await;
            let before = rooms.len();
            rooms.retain(|_, tx| tx.receiver_count() > 0);
            pruned += before - rooms.len();
        }
        let mut games = self.games.write().await;
        let before = games.len();
        games.retain(|_, tx| tx.receiver_count() > 0);
        pruned + before - games.len()
    }
}

/// Spawn a background task that periodically drops topics without observers
pub fn spawn_topic_pruner(hub: Arc<Hub>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;
            let pruned = hub.prune().await;
            if pruned > 0 {
                tracing::debug!("Pruned {} idle notification topics", pruned);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(round_id: &str) -> GameSnapshot {
        GameSnapshot {
            round: Round {
                id: round_id.to_string(),
                room_id: "room".to_string(),
                number: 1,
                question: "Q?".to_string(),
                phase: RoundPhase::Answering,
                started_at: Utc::now(),
                ended_at: None,
            },
            answers: Vec::new(),
            guesses: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let hub = Hub::new();
        assert_eq!(hub.publish_game(snapshot("r1")).await, 0);
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let hub = Hub::new();
        let mut rx1 = hub.subscribe_game("r1").await;
        let mut rx2 = hub.subscribe_game("r2").await;

        assert_eq!(hub.publish_game(snapshot("r1")).await, 1);

        assert_eq!(rx1.recv().await.unwrap().round.id, "r1");
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_room_notifies_and_drops_topics() {
        let hub = Hub::new();
        let mut room_rx = hub.subscribe_room("room").await;
        let _game_rx = hub.subscribe_game("r1").await;

        hub.close_room("room", &["r1".to_string()]).await;

        match room_rx.recv().await.unwrap() {
            RoomEvent::Closed { room_id } => assert_eq!(room_id, "room"),
            other => panic!("Expected Closed, got {:?}", other),
        }
        assert_eq!(hub.publish_game(snapshot("r1")).await, 0);
    }

    #[tokio::test]
    async fn test_prune_drops_abandoned_topics() {
        let hub = Hub::new();
        let rx = hub.subscribe_room("room").await;
        let _kept = hub.subscribe_game("r1").await;
        drop(rx);

        assert_eq!(hub.prune().await, 1);
    }
}
