use crate::broadcast::GameSnapshot;
use crate::error::GameError;
use crate::state::RoomView;
use crate::types::*;
use serde::{Deserialize, Serialize};

/// Messages sent by the browser. Everything after create/join acts as the
/// player bound to the connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ClientMessage {
    CreateRoom {
        name: String,
        session: String,
        country: Option<String>,
    },
    JoinRoom {
        code: String,
        name: String,
        session: String,
        country: Option<String>,
    },
    /// Fetch a room; a known session rebinds the connection to its player
    GetRoom {
        room_id: RoomId,
        session: Option<String>,
    },
    UpdateConfig {
        total_rounds: u32,
        round_time_limit: u32,
        initial_prompt: String,
    },
    StartGame,
    LeaveRoom,
    KickPlayer {
        player_id: PlayerId,
    },
    Heartbeat,
    MarkAway,
    GetCurrentRound,
    SaveAnswer {
        round_id: RoundId,
        text: String,
        #[serde(default)]
        submit: bool,
    },
    SaveGuess {
        round_id: RoundId,
        target_id: PlayerId,
        text: String,
        #[serde(default)]
        submit: bool,
    },
    GetGuessTarget {
        round_id: RoundId,
    },
    MarkReady {
        round_id: RoundId,
    },
    GetReadyStatus,
    GetResults {
        round_id: RoundId,
    },
    GetStandings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The connection now acts as this player
    Joined {
        room_id: RoomId,
        code: String,
        player_id: PlayerId,
    },
    Room(RoomView),
    /// The room was deleted after its last player left
    RoomClosed {
        room_id: RoomId,
    },
    /// Confirms this connection's own departure
    Left {
        room_id: RoomId,
    },
    Game(GameSnapshot),
    GuessTarget {
        round_id: RoundId,
        target: Option<PlayerSummary>,
    },
    ReadyStatus(ReadyStatus),
    Results {
        round_id: RoundId,
        results: Vec<RoundResult>,
    },
    Standings {
        room_id: RoomId,
        standings: Vec<Standing>,
    },
    Error {
        code: String,
        msg: String,
    },
}

impl ServerMessage {
    pub fn error(code: &str, msg: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.to_string(),
            msg: msg.into(),
        }
    }
}

impl From<GameError> for ServerMessage {
    fn from(e: GameError) -> Self {
        ServerMessage::error(e.code(), e.to_string())
    }
}
