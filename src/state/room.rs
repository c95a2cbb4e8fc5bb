use super::{active_members, AppState, Subscription};
use crate::broadcast::{RoomEvent, RoomSnapshot};
use crate::error::{GameError, GameResult};
use crate::types::*;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Generate a random room code (5 uppercase letters)
pub(super) fn random_room_code() -> String {
    let mut rng = rand::rng();
    (0..ROOM_CODE_LENGTH)
        .map(|_| CODE_CHARS[rng.random_range(0..CODE_CHARS.len())] as char)
        .collect()
}

fn validate_name(name: &str) -> GameResult<String> {
    let name = name.trim();
    let len = name.chars().count();
    if len == 0 || len > MAX_NAME_CHARS {
        return Err(GameError::Validation(format!(
            "name must be between 1 and {} characters",
            MAX_NAME_CHARS
        )));
    }
    Ok(name.to_string())
}

fn validate_country(country: Option<&str>) -> GameResult<Option<String>> {
    match country.map(str::trim).filter(|c| !c.is_empty()) {
        Some(c) if c.chars().count() > MAX_COUNTRY_CHARS => Err(GameError::Validation(
            format!("country tag must be at most {} characters", MAX_COUNTRY_CHARS),
        )),
        other => Ok(other.map(str::to_string)),
    }
}

/// Hand the creator role to the earliest-joined active player
fn transfer_creator(room: &mut Room, players: &mut HashMap<PlayerId, Player>) -> Option<PlayerId> {
    let next = active_members(players, &room.id)
        .into_iter()
        .min_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)))
        .map(|p| p.id.clone())?;

    for player in players.values_mut().filter(|p| p.room_id == room.id) {
        player.is_creator = player.id == next;
    }
    room.creator_id = next.clone();
    Some(next)
}

/// A room as returned to a (possibly returning) caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomView {
    #[serde(flatten)]
    pub snapshot: RoomSnapshot,
    /// The caller's own player id, if their session belongs to this room
    pub me: Option<PlayerId>,
}

enum Departure {
    Left { room_id: RoomId },
    RoomClosed { room_id: RoomId, round_ids: Vec<RoundId> },
}

impl AppState {
    /// Create a room in the lobby with the caller as its creator
    pub async fn create_room(
        &self,
        player_name: &str,
        session: &str,
        country: Option<&str>,
    ) -> GameResult<(Room, Player)> {
        let name = validate_name(player_name)?;
        let country = validate_country(country)?;
        let now = Utc::now();

        let (room, player) = {
            let mut rooms = self.rooms.write().await;

            // Checked and inserted under the same lock, so codes stay unique
            let code = (0..ROOM_CODE_ATTEMPTS)
                .map(|_| (self.code_generator)())
                .find(|code| !rooms.values().any(|r| r.code == *code))
                .ok_or_else(|| {
                    tracing::warn!(
                        "No unused room code after {} attempts",
                        ROOM_CODE_ATTEMPTS
                    );
                    GameError::RoomCreationFailed
                })?;

            let room = Room {
                id: ulid::Ulid::new().to_string(),
                code,
                status: RoomStatus::Lobby,
                creator_id: ulid::Ulid::new().to_string(),
                current_round: 0,
                config: RoomConfig::default(),
                created_at: now,
            };
            let player = Player {
                id: room.creator_id.clone(),
                room_id: room.id.clone(),
                name,
                country,
                is_creator: true,
                status: ConnectionStatus::Online,
                last_seen: now,
                score: 0.0,
                ready: false,
                session: session.to_string(),
                joined_at: now,
                left_at: None,
            };

            rooms.insert(room.id.clone(), room.clone());
            self.players
                .write()
                .await
                .insert(player.id.clone(), player.clone());
            (room, player)
        };

        tracing::info!("Room {} created by {}", room.code, player.name);
        self.broadcast_room(&room.id).await;
        Ok((room, player))
    }

    /// Join a lobby by code. A session that already belongs to the room rejoins
    /// as the same player instead of creating a duplicate.
    pub async fn join_room(
        &self,
        code: &str,
        player_name: &str,
        session: &str,
        country: Option<&str>,
    ) -> GameResult<(Room, Player)> {
        let name = validate_name(player_name)?;
        let country = validate_country(country)?;
        let code = code.trim().to_uppercase();
        let now = Utc::now();

        let (room, player) = {
            let rooms = self.rooms.read().await;
            let room = rooms
                .values()
                .find(|r| r.code == code)
                .cloned()
                .ok_or(GameError::RoomNotFound)?;
            if room.status != RoomStatus::Lobby {
                return Err(GameError::RoomNotJoinable);
            }

            let mut players = self.players.write().await;
            let existing = players
                .values_mut()
                .find(|p| p.room_id == room.id && p.session == session);

            let player = match existing {
                Some(player) => {
                    tracing::info!("Player {} rejoined room {}", player.id, room.code);
                    player.name = name;
                    player.country = country;
                    player.status = ConnectionStatus::Online;
                    player.last_seen = now;
                    player.left_at = None;
                    player.clone()
                }
                None => {
                    let player = Player {
                        id: ulid::Ulid::new().to_string(),
                        room_id: room.id.clone(),
                        name,
                        country,
                        is_creator: false,
                        status: ConnectionStatus::Online,
                        last_seen: now,
                        score: 0.0,
                        ready: false,
                        session: session.to_string(),
                        joined_at: now,
                        left_at: None,
                    };
                    tracing::info!("Player {} joined room {}", player.name, room.code);
                    players.insert(player.id.clone(), player.clone());
                    player
                }
            };
            (room, player)
        };

        self.broadcast_room(&room.id).await;
        Ok((room, player))
    }

    /// Fetch a room with its players. A known session also gets its own
    /// player id back and counts as a sign of life.
    pub async fn get_room(&self, room_id: &str, session: Option<&str>) -> GameResult<RoomView> {
        if !self.rooms.read().await.contains_key(room_id) {
            return Err(GameError::RoomNotFound);
        }

        let me = match session {
            Some(session) => self
                .players
                .read()
                .await
                .values()
                .find(|p| p.room_id == room_id && p.is_active() && p.session == session)
                .map(|p| p.id.clone()),
            None => None,
        };
        if let Some(player_id) = &me {
            self.set_connection_status(player_id, ConnectionStatus::Online)
                .await?;
        }

        let snapshot = self
            .room_snapshot(room_id)
            .await
            .ok_or(GameError::RoomNotFound)?;
        Ok(RoomView { snapshot, me })
    }

    /// Subscribe to a room: the current snapshot first, then every update
    pub async fn subscribe_room(
        &self,
        room_id: &str,
    ) -> GameResult<Subscription<RoomSnapshot, RoomEvent>> {
        if !self.rooms.read().await.contains_key(room_id) {
            return Err(GameError::RoomNotFound);
        }
        let updates = self.hub.subscribe_room(room_id).await;
        let initial = self
            .room_snapshot(room_id)
            .await
            .ok_or(GameError::RoomNotFound)?;
        Ok(Subscription { initial, updates })
    }

    /// Change game settings. Creator only, lobby only, all or nothing.
    pub async fn update_config(
        &self,
        room_id: &str,
        player_id: &str,
        total_rounds: u32,
        round_time_limit: u32,
        initial_prompt: &str,
    ) -> GameResult<Room> {
        let config = RoomConfig {
            total_rounds,
            round_time_limit,
            initial_prompt: initial_prompt.trim().to_string(),
        };

        let room = {
            let mut rooms = self.rooms.write().await;
            let room = rooms.get_mut(room_id).ok_or(GameError::RoomNotFound)?;
            if room.creator_id != player_id {
                return Err(GameError::Forbidden(
                    "only the room creator can change settings".to_string(),
                ));
            }
            if room.status != RoomStatus::Lobby {
                return Err(GameError::InvalidPhase(
                    "settings can only change in the lobby".to_string(),
                ));
            }
            config.validate().map_err(GameError::Validation)?;

            room.config = config;
            room.clone()
        };

        tracing::info!(
            "Room {} configured: {} rounds, {}s, theme {:?}",
            room.code,
            room.config.total_rounds,
            room.config.round_time_limit,
            room.config.initial_prompt
        );
        self.broadcast_room(room_id).await;
        Ok(room)
    }

    /// Move the room from the lobby into round 1
    pub async fn start_game(&self, room_id: &str, player_id: &str) -> GameResult<Room> {
        let room = {
            let mut rooms = self.rooms.write().await;
            let room = rooms.get_mut(room_id).ok_or(GameError::RoomNotFound)?;
            if room.creator_id != player_id {
                return Err(GameError::Forbidden(
                    "only the room creator can start the game".to_string(),
                ));
            }
            if room.status != RoomStatus::Lobby {
                return Err(GameError::InvalidPhase("game already started".to_string()));
            }

            let mut players = self.players.write().await;
            if active_members(&players, room_id).len() < MIN_PLAYERS {
                return Err(GameError::Validation(format!(
                    "at least {} players are needed to start",
                    MIN_PLAYERS
                )));
            }
            for player in players
                .values_mut()
                .filter(|p| p.room_id == room_id)
            {
                player.ready = false;
            }

            room.status = RoomStatus::Playing;
            room.current_round = 1;
            room.clone()
        };

        tracing::info!(
            "Room {} started a {}-round game",
            room.code,
            room.config.total_rounds
        );
        self.broadcast_room(room_id).await;
        Ok(room)
    }

    /// Leave the room. Players who never took part are deleted outright;
    /// the rest are retired so their answers and guesses keep an author.
    pub async fn leave_room(&self, player_id: &str) -> GameResult<()> {
        let departure = {
            let mut rooms = self.rooms.write().await;
            let mut players = self.players.write().await;
            let player = players
                .get(player_id)
                .filter(|p| p.is_active())
                .cloned()
                .ok_or(GameError::PlayerNotFound)?;
            let room_id = player.room_id.clone();

            let participated = self
                .answers
                .read()
                .await
                .values()
                .any(|a| a.player_id == player_id)
                || self
                    .guesses
                    .read()
                    .await
                    .values()
                    .any(|g| g.guesser_id == player_id);

            if participated {
                if let Some(p) = players.get_mut(player_id) {
                    p.status = ConnectionStatus::Offline;
                    p.left_at = Some(Utc::now());
                    p.is_creator = false;
                    p.ready = false;
                }
            } else {
                players.remove(player_id);
            }
            tracing::info!(
                "Player {} left room {} ({})",
                player.name,
                room_id,
                if participated { "retired" } else { "removed" }
            );

            if active_members(&players, &room_id).is_empty() {
                rooms.remove(&room_id);
                players.retain(|_, p| p.room_id != room_id);

                let mut rounds = self.rounds.write().await;
                let round_ids: Vec<RoundId> = rounds
                    .values()
                    .filter(|r| r.room_id == room_id)
                    .map(|r| r.id.clone())
                    .collect();
                rounds.retain(|_, r| r.room_id != room_id);
                self.answers
                    .write()
                    .await
                    .retain(|_, a| !round_ids.contains(&a.round_id));
                self.guesses
                    .write()
                    .await
                    .retain(|_, g| !round_ids.contains(&g.round_id));

                Departure::RoomClosed { room_id, round_ids }
            } else {
                if player.is_creator {
                    if let Some(room) = rooms.get_mut(&room_id) {
                        if let Some(next) = transfer_creator(room, &mut players) {
                            tracing::info!("Creator role in room {} passed to {}", room_id, next);
                        }
                    }
                }
                Departure::Left { room_id }
            }
        };

        match departure {
            Departure::RoomClosed { room_id, round_ids } => {
                tracing::info!("Room {} is empty and was deleted", room_id);
                self.hub.close_room(&room_id, &round_ids).await;
            }
            Departure::Left { room_id } => {
                self.broadcast_room(&room_id).await;
                self.reevaluate_current_round(&room_id).await;
            }
        }
        Ok(())
    }

    /// Remove another player. Only the creator may kick, and not themselves.
    pub async fn kick_player(&self, target_id: &str, kicker_id: &str) -> GameResult<()> {
        let room_id = {
            let rooms = self.rooms.read().await;
            let mut players = self.players.write().await;

            let kicker = players
                .get(kicker_id)
                .filter(|p| p.is_active())
                .ok_or(GameError::PlayerNotFound)?;
            let room = rooms.get(&kicker.room_id).ok_or(GameError::RoomNotFound)?;
            if room.creator_id != kicker_id || kicker_id == target_id {
                return Err(GameError::Forbidden(
                    "only the room creator can remove other players".to_string(),
                ));
            }
            let in_room = players
                .get(target_id)
                .is_some_and(|p| p.is_active() && p.room_id == room.id);
            if !in_room {
                return Err(GameError::PlayerNotInRoom);
            }

            players.remove(target_id);
            room.id.clone()
        };

        tracing::info!("Player {} was removed from room {}", target_id, room_id);
        self.broadcast_room(&room_id).await;
        self.reevaluate_current_round(&room_id).await;
        Ok(())
    }

    /// Active players by total score, best first
    pub async fn get_standings(&self, room_id: &str) -> GameResult<Vec<Standing>> {
        if !self.rooms.read().await.contains_key(room_id) {
            return Err(GameError::RoomNotFound);
        }
        let players = self.players.read().await;
        let mut standings: Vec<Standing> = active_members(&players, room_id)
            .into_iter()
            .map(|p| Standing {
                player: p.into(),
                score: p.score,
            })
            .collect();
        standings.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.player.name.cmp(&b.player.name))
        });
        Ok(standings)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn test_random_room_code_shape() {
        for _ in 0..50 {
            let code = random_room_code();
            assert_eq!(code.len(), ROOM_CODE_LENGTH);
            assert!(code.chars().all(|c| c.is_ascii_uppercase()));
        }
    }

    #[tokio::test]
    async fn test_create_room() {
        let state = test_state();
        let (room, creator) = state
            .create_room("  Alice ", "s1", Some("NL"))
            .await
            .unwrap();

        assert_eq!(room.status, RoomStatus::Lobby);
        assert_eq!(room.current_round, 0);
        assert_eq!(room.config, RoomConfig::default());
        assert_eq!(room.creator_id, creator.id);
        assert!(creator.is_creator);
        assert_eq!(creator.name, "Alice");
        assert_eq!(creator.country.as_deref(), Some("NL"));
    }

    #[tokio::test]
    async fn test_create_room_validates_name() {
        let state = test_state();
        assert!(matches!(
            state.create_room("   ", "s1", None).await,
            Err(GameError::Validation(_))
        ));
        let long_name = "x".repeat(MAX_NAME_CHARS + 1);
        assert!(matches!(
            state.create_room(&long_name, "s1", None).await,
            Err(GameError::Validation(_))
        ));
        assert!(state.rooms.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_code_exhaustion_creates_nothing() {
        let state = test_state().with_code_generator(|| "AAAAA".to_string());
        state.create_room("Alice", "s1", None).await.unwrap();

        let result = state.create_room("Bob", "s2", None).await;
        assert!(matches!(result, Err(GameError::RoomCreationFailed)));
        assert_eq!(state.rooms.read().await.len(), 1);
        assert_eq!(state.players.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_join_unknown_code() {
        let state = test_state();
        assert!(matches!(
            state.join_room("ZZZZZ", "Bob", "s2", None).await,
            Err(GameError::RoomNotFound)
        ));
    }

    #[tokio::test]
    async fn test_join_is_case_insensitive() {
        let state = test_state();
        let (room, _) = state.create_room("Alice", "s1", None).await.unwrap();
        let (joined, _) = state
            .join_room(&room.code.to_lowercase(), "Bob", "s2", None)
            .await
            .unwrap();
        assert_eq!(joined.id, room.id);
    }

    #[tokio::test]
    async fn test_rejoin_same_session_reuses_player() {
        let state = test_state();
        let (room, _) = state.create_room("Alice", "s1", None).await.unwrap();
        let (_, first) = state.join_room(&room.code, "Bob", "s2", None).await.unwrap();
        let (_, second) = state
            .join_room(&room.code, "Bobby", "s2", None)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "Bobby");
        let players = state.players.read().await;
        assert_eq!(players.values().filter(|p| p.session == "s2").count(), 1);
    }

    #[tokio::test]
    async fn test_join_after_start_rejected() {
        let state = test_state();
        let (room, _, _) = playing_room(&state, 2).await;
        assert!(matches!(
            state.join_room(&room.code, "Late", "late", None).await,
            Err(GameError::RoomNotJoinable)
        ));
    }

    #[tokio::test]
    async fn test_get_room_resolves_session() {
        let state = test_state();
        let (room, alice) = state.create_room("Alice", "s1", None).await.unwrap();

        let view = state.get_room(&room.id, Some("s1")).await.unwrap();
        assert_eq!(view.me, Some(alice.id));
        assert_eq!(view.snapshot.players.len(), 1);

        let anonymous = state.get_room(&room.id, Some("unknown")).await.unwrap();
        assert!(anonymous.me.is_none());

        assert!(matches!(
            state.get_room("gone", None).await,
            Err(GameError::RoomNotFound)
        ));
    }

    #[tokio::test]
    async fn test_update_config_rules() {
        let state = test_state();
        let (room, alice) = state.create_room("Alice", "s1", None).await.unwrap();
        let (_, bob) = state.join_room(&room.code, "Bob", "s2", None).await.unwrap();

        let result = state.update_config(&room.id, &bob.id, 5, 60, "Food").await;
        assert!(matches!(result, Err(GameError::Forbidden(_))));

        let result = state.update_config(&room.id, &alice.id, 11, 60, "Food").await;
        assert!(matches!(result, Err(GameError::Validation(_))));
        let result = state.update_config(&room.id, &alice.id, 5, 29, "Food").await;
        assert!(matches!(result, Err(GameError::Validation(_))));
        let result = state.update_config(&room.id, &alice.id, 5, 60, " ").await;
        assert!(matches!(result, Err(GameError::Validation(_))));

        // Nothing was applied by the failed attempts
        assert_eq!(
            state.rooms.read().await.get(&room.id).unwrap().config,
            RoomConfig::default()
        );

        let updated = state
            .update_config(&room.id, &alice.id, 5, 60, "Food")
            .await
            .unwrap();
        assert_eq!(updated.config.total_rounds, 5);
        assert_eq!(updated.config.initial_prompt, "Food");

        state.start_game(&room.id, &alice.id).await.unwrap();
        let result = state.update_config(&room.id, &alice.id, 2, 60, "Food").await;
        assert!(matches!(result, Err(GameError::InvalidPhase(_))));
    }

    #[tokio::test]
    async fn test_start_game_requires_two_players() {
        let state = test_state();
        let (room, alice) = state.create_room("Alice", "s1", None).await.unwrap();

        let result = state.start_game(&room.id, &alice.id).await;
        assert!(matches!(result, Err(GameError::Validation(_))));

        let (_, bob) = state.join_room(&room.code, "Bob", "s2", None).await.unwrap();
        assert!(matches!(
            state.start_game(&room.id, &bob.id).await,
            Err(GameError::Forbidden(_))
        ));

        let started = state.start_game(&room.id, &alice.id).await.unwrap();
        assert_eq!(started.status, RoomStatus::Playing);
        assert_eq!(started.current_round, 1);
    }

    #[tokio::test]
    async fn test_leave_without_participation_deletes_player() {
        let state = test_state();
        let (room, _) = state.create_room("Alice", "s1", None).await.unwrap();
        let (_, bob) = state.join_room(&room.code, "Bob", "s2", None).await.unwrap();

        state.leave_room(&bob.id).await.unwrap();
        assert!(state.get_player(&bob.id).await.is_none());
    }

    #[tokio::test]
    async fn test_leave_after_participation_retires_player() {
        let state = test_state();
        let (room, players, round) = playing_room(&state, 3).await;
        let leaver = &players[2];
        state
            .save_answer(&round.id, &leaver.id, "my answer", true)
            .await
            .unwrap();

        state.leave_room(&leaver.id).await.unwrap();

        let retired = state.get_player(&leaver.id).await.unwrap();
        assert!(!retired.is_active());
        assert_eq!(retired.status, ConnectionStatus::Offline);
        let snapshot = state.room_snapshot(&room.id).await.unwrap();
        assert_eq!(snapshot.players.len(), 2);
    }

    #[tokio::test]
    async fn test_creator_transfer_picks_earliest_joiner() {
        let state = test_state();
        let (room, alice) = state.create_room("Alice", "s1", None).await.unwrap();
        let (_, bob) = state.join_room(&room.code, "Bob", "s2", None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        state.join_room(&room.code, "Carol", "s3", None).await.unwrap();

        state.leave_room(&alice.id).await.unwrap();

        let room = state.rooms.read().await.get(&room.id).cloned().unwrap();
        assert_eq!(room.creator_id, bob.id);
        assert!(state.get_player(&bob.id).await.unwrap().is_creator);
    }

    #[tokio::test]
    async fn test_last_player_leaving_deletes_room() {
        let state = test_state();
        let (room, alice) = state.create_room("Alice", "s1", None).await.unwrap();
        let mut sub = state.subscribe_room(&room.id).await.unwrap();

        state.leave_room(&alice.id).await.unwrap();

        assert!(state.rooms.read().await.is_empty());
        assert!(matches!(
            state.get_room(&room.id, None).await,
            Err(GameError::RoomNotFound)
        ));
        assert!(matches!(
            sub.updates.recv().await.unwrap(),
            RoomEvent::Closed { .. }
        ));
    }

    #[tokio::test]
    async fn test_kick_rules() {
        let state = test_state();
        let (room, alice) = state.create_room("Alice", "s1", None).await.unwrap();
        let (_, bob) = state.join_room(&room.code, "Bob", "s2", None).await.unwrap();

        assert!(matches!(
            state.kick_player(&alice.id, &bob.id).await,
            Err(GameError::Forbidden(_))
        ));
        assert!(matches!(
            state.kick_player(&alice.id, &alice.id).await,
            Err(GameError::Forbidden(_))
        ));

        state.kick_player(&bob.id, &alice.id).await.unwrap();
        assert!(state.get_player(&bob.id).await.is_none());
    }

    #[tokio::test]
    async fn test_standings_sorted_by_score() {
        let state = test_state();
        let (room, players, _) = playing_room(&state, 3).await;
        {
            let mut all = state.players.write().await;
            all.get_mut(&players[0].id).unwrap().score = 4.0;
            all.get_mut(&players[1].id).unwrap().score = 9.0;
            all.get_mut(&players[2].id).unwrap().score = 6.0;
        }

        let standings = state.get_standings(&room.id).await.unwrap();
        let scores: Vec<f64> = standings.iter().map(|s| s.score).collect();
        assert_eq!(scores, vec![9.0, 6.0, 4.0]);
    }
}
