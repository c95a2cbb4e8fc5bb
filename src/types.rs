use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque ID types for type safety
pub type RoomId = String;
pub type PlayerId = String;
pub type RoundId = String;
pub type AnswerId = String;
pub type GuessId = String;

/// Length of a room join code
pub const ROOM_CODE_LENGTH: usize = 5;
/// Maximum attempts at finding an unused room code before giving up
pub const ROOM_CODE_ATTEMPTS: usize = 10;

pub const MIN_ROUNDS: u32 = 1;
pub const MAX_ROUNDS: u32 = 10;
pub const MIN_ROUND_SECONDS: u32 = 30;
pub const MAX_ROUND_SECONDS: u32 = 600;
pub const MAX_PROMPT_CHARS: usize = 200;
pub const MAX_NAME_CHARS: usize = 24;
pub const MAX_COUNTRY_CHARS: usize = 8;
pub const MAX_TEXT_CHARS: usize = 500;

/// Minimum number of active players needed for guessing to make sense
pub const MIN_PLAYERS: usize = 2;

/// Neutral rating used whenever the judge cannot produce one
pub const FALLBACK_RATING: u8 = 5;
pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Lobby,
    /// Reserved; nothing currently moves a room into this state
    Configuring,
    Playing,
    Finished,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Online,
    Away,
    Offline,
}

/// Round phases. Answers and guesses are collected concurrently while
/// `Answering`; `Guessing` is kept for wire compatibility but never entered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    Answering,
    Guessing,
    Rating,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomConfig {
    pub total_rounds: u32,
    /// Advisory only, shown to clients as a countdown
    pub round_time_limit: u32,
    pub initial_prompt: String,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            total_rounds: 3,
            round_time_limit: 120,
            initial_prompt: "Anything goes".to_string(),
        }
    }
}

impl RoomConfig {
    /// Check every bound, returning the first violation
    pub fn validate(&self) -> Result<(), String> {
        if !(MIN_ROUNDS..=MAX_ROUNDS).contains(&self.total_rounds) {
            return Err(format!(
                "total rounds must be between {} and {}",
                MIN_ROUNDS, MAX_ROUNDS
            ));
        }
        if !(MIN_ROUND_SECONDS..=MAX_ROUND_SECONDS).contains(&self.round_time_limit) {
            return Err(format!(
                "round time limit must be between {} and {} seconds",
                MIN_ROUND_SECONDS, MAX_ROUND_SECONDS
            ));
        }
        let prompt_len = self.initial_prompt.trim().chars().count();
        if prompt_len == 0 || prompt_len > MAX_PROMPT_CHARS {
            return Err(format!(
                "theme prompt must be between 1 and {} characters",
                MAX_PROMPT_CHARS
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub code: String,
    pub status: RoomStatus,
    pub creator_id: PlayerId,
    /// 0 until the game starts
    pub current_round: u32,
    pub config: RoomConfig,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub room_id: RoomId,
    pub name: String,
    pub country: Option<String>,
    pub is_creator: bool,
    pub status: ConnectionStatus,
    pub last_seen: DateTime<Utc>,
    pub score: f64,
    pub ready: bool,
    /// Caller-supplied browser session; only ever compared for equality
    #[serde(skip_serializing, default)]
    pub session: String,
    pub joined_at: DateTime<Utc>,
    /// Set when a player who already took part in a round leaves
    pub left_at: Option<DateTime<Utc>>,
}

impl Player {
    pub fn is_active(&self) -> bool {
        self.left_at.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub id: RoundId,
    pub room_id: RoomId,
    pub number: u32,
    pub question: String,
    pub phase: RoundPhase,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub id: AnswerId,
    pub round_id: RoundId,
    pub player_id: PlayerId,
    pub content: String,
    pub submitted: bool,
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guess {
    pub id: GuessId,
    pub round_id: RoundId,
    pub guesser_id: PlayerId,
    pub target_id: PlayerId,
    pub content: String,
    pub submitted: bool,
    pub submitted_at: Option<DateTime<Utc>>,
    pub rating: Option<u8>,
    pub rated_at: Option<DateTime<Utc>>,
}

/// Minimal player identity used in derived views
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerSummary {
    pub id: PlayerId,
    pub name: String,
    pub country: Option<String>,
}

impl From<&Player> for PlayerSummary {
    fn from(p: &Player) -> Self {
        Self {
            id: p.id.clone(),
            name: p.name.clone(),
            country: p.country.clone(),
        }
    }
}

/// One row of the reveal view: an answer joined with the guess aimed at it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundResult {
    pub answer_id: AnswerId,
    /// None if the answerer was removed from the room
    pub answerer: Option<PlayerSummary>,
    pub answer: String,
    pub guesser: Option<PlayerSummary>,
    pub guess: Option<String>,
    pub rating: Option<u8>,
    pub rated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReadyStatus {
    pub ready: usize,
    pub total: usize,
    pub waiting_for: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Standing {
    pub player: PlayerSummary,
    pub score: f64,
}
