mod presence;
mod rating;
mod room;
mod round;

#[cfg(test)]
pub(crate) mod test_support;

pub use presence::{classify_presence, Presence, PRESENCE_FRESHNESS_SECS};
pub use rating::parse_rating;
pub use room::RoomView;
pub use round::assign_guess_target;

use crate::broadcast::{GameSnapshot, Hub, PlayerView, RoomEvent, RoomSnapshot};
use crate::error::{GameError, GameResult};
use crate::llm::{GuessJudge, LlmConfig, LlmManager, QuestionGenerator};
use crate::types::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};

type CodeGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Current snapshot plus the stream of every later one
pub struct Subscription<S, E> {
    pub initial: S,
    pub updates: broadcast::Receiver<E>,
}

/// Shared application state.
///
/// Locks are always taken in field order (rooms, players, rounds, answers,
/// guesses) so that multi-collection updates cannot deadlock.
#[derive(Clone)]
pub struct AppState {
    pub rooms: Arc<RwLock<HashMap<RoomId, Room>>>,
    pub players: Arc<RwLock<HashMap<PlayerId, Player>>>,
    pub rounds: Arc<RwLock<HashMap<RoundId, Round>>>,
    pub answers: Arc<RwLock<HashMap<AnswerId, Answer>>>,
    pub guesses: Arc<RwLock<HashMap<GuessId, Guess>>>,
    /// Fan-out for room and round snapshots
    pub hub: Arc<Hub>,
    pub questions: Arc<dyn QuestionGenerator>,
    pub judge: Arc<dyn GuessJudge>,
    pub question_timeout: Duration,
    pub judge_timeout: Duration,
    code_generator: CodeGenerator,
}

impl AppState {
    pub fn new(questions: Arc<dyn QuestionGenerator>, judge: Arc<dyn GuessJudge>) -> Self {
        let defaults = LlmConfig::default();
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            players: Arc::new(RwLock::new(HashMap::new())),
            rounds: Arc::new(RwLock::new(HashMap::new())),
            answers: Arc::new(RwLock::new(HashMap::new())),
            guesses: Arc::new(RwLock::new(HashMap::new())),
            hub: Arc::new(Hub::new()),
            questions,
            judge,
            question_timeout: defaults.question_timeout,
            judge_timeout: defaults.judge_timeout,
            code_generator: Arc::new(room::random_room_code),
        }
    }

    /// Build state backed by the configured LLM providers
    pub fn new_with_llm(llm: LlmManager, config: &LlmConfig) -> Self {
        let llm = Arc::new(llm);
        Self::new(llm.clone(), llm).with_timeouts(config.question_timeout, config.judge_timeout)
    }

    pub fn with_timeouts(mut self, question_timeout: Duration, judge_timeout: Duration) -> Self {
        self.question_timeout = question_timeout;
        self.judge_timeout = judge_timeout;
        self
    }

    /// Replace the room code source (used to exercise code exhaustion)
    pub fn with_code_generator(
        mut self,
        generator: impl Fn() -> String + Send + Sync + 'static,
    ) -> Self {
        self.code_generator = Arc::new(generator);
        self
    }

    pub async fn get_player(&self, player_id: &str) -> Option<Player> {
        self.players.read().await.get(player_id).cloned()
    }

    pub async fn get_round(&self, round_id: &str) -> Option<Round> {
        self.rounds.read().await.get(round_id).cloned()
    }

    /// Build the current snapshot of a room, if it still exists
    pub async fn room_snapshot(&self, room_id: &str) -> Option<RoomSnapshot> {
        let room = self.rooms.read().await.get(room_id).cloned()?;
        let now = chrono::Utc::now();
        let players = self.players.read().await;

        let mut members: Vec<&Player> = active_members(&players, room_id);
        members.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)));

        Some(RoomSnapshot {
            room,
            players: members
                .into_iter()
                .map(|p| PlayerView {
                    player: p.clone(),
                    presence: classify_presence(p, now),
                })
                .collect(),
            server_now: now,
        })
    }

    /// Build the current snapshot of a round with all answers and guesses
    pub async fn game_snapshot(&self, round_id: &str) -> Option<GameSnapshot> {
        let round = self.rounds.read().await.get(round_id).cloned()?;

        let mut answers: Vec<Answer> = self
            .answers
            .read()
            .await
            .values()
            .filter(|a| a.round_id == round_id)
            .cloned()
            .collect();
        answers.sort_by(|a, b| a.id.cmp(&b.id));

        let mut guesses: Vec<Guess> = self
            .guesses
            .read()
            .await
            .values()
            .filter(|g| g.round_id == round_id)
            .cloned()
            .collect();
        guesses.sort_by(|a, b| a.id.cmp(&b.id));

        Some(GameSnapshot {
            round,
            answers,
            guesses,
        })
    }

    /// Push the room's current snapshot to its observers
    pub async fn broadcast_room(&self, room_id: &str) {
        if let Some(snapshot) = self.room_snapshot(room_id).await {
            let delivered = self
                .hub
                .publish_room(room_id, RoomEvent::Updated(snapshot))
                .await;
            tracing::debug!("Room {} snapshot delivered to {} observers", room_id, delivered);
        }
    }

    /// Push the round's current snapshot to its observers
    pub async fn broadcast_game(&self, round_id: &str) {
        if let Some(snapshot) = self.game_snapshot(round_id).await {
            let delivered = self.hub.publish_game(snapshot).await;
            tracing::debug!("Round {} snapshot delivered to {} observers", round_id, delivered);
        }
    }

    /// Subscribe to a round: the current snapshot first, then every update
    pub async fn subscribe_game(
        &self,
        round_id: &str,
    ) -> GameResult<Subscription<GameSnapshot, GameSnapshot>> {
        if !self.rounds.read().await.contains_key(round_id) {
            return Err(GameError::RoundNotFound);
        }
        // Subscribe before reading so nothing falls between snapshot and stream
        let updates = self.hub.subscribe_game(round_id).await;
        let initial = self
            .game_snapshot(round_id)
            .await
            .ok_or(GameError::RoundNotFound)?;
        Ok(Subscription { initial, updates })
    }
}

/// Active members of a room, in no particular order
fn active_members<'a>(players: &'a HashMap<PlayerId, Player>, room_id: &str) -> Vec<&'a Player> {
    players
        .values()
        .filter(|p| p.room_id == room_id && p.is_active())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn test_room_snapshot_orders_by_join_time() {
        let state = test_state();
        let (room, alice) = state
            .create_room("Alice", "s-alice", None)
            .await
            .unwrap();
        let (_, bob) = state
            .join_room(&room.code, "Bob", "s-bob", Some("DE"))
            .await
            .unwrap();

        let snapshot = state.room_snapshot(&room.id).await.unwrap();
        let ids: Vec<_> = snapshot.players.iter().map(|v| v.player.id.clone()).collect();
        assert_eq!(ids, vec![alice.id, bob.id]);
        assert!(snapshot
            .players
            .iter()
            .all(|v| v.presence == Presence::Green));
    }

    #[tokio::test]
    async fn test_subscribe_game_unknown_round() {
        let state = test_state();
        let result = state.subscribe_game("missing").await;
        assert!(matches!(
            result,
            Err(GameError::RoundNotFound)
        ));
    }

    #[tokio::test]
    async fn test_snapshot_serializes_without_session() {
        let state = test_state();
        let (room, _) = state
            .create_room("Alice", "secret-session", None)
            .await
            .unwrap();

        let snapshot = state.room_snapshot(&room.id).await.unwrap();
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(!json.contains("secret-session"));
        assert!(json.contains("\"presence\":\"green\""));
    }
}
