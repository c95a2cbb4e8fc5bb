use crate::llm::LlmError;

pub type GameResult<T> = Result<T, GameError>;

/// Errors surfaced to the caller of a room or round operation.
/// None of these leave state partially mutated.
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("Room not found")]
    RoomNotFound,

    #[error("Round not found")]
    RoundNotFound,

    #[error("Player not found")]
    PlayerNotFound,

    #[error("Player is not a member of this room")]
    PlayerNotInRoom,

    #[error("Room is not accepting new players")]
    RoomNotJoinable,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid phase: {0}")]
    InvalidPhase(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    /// No unused room code was found; the caller may retry the whole operation
    #[error("Could not allocate a unique room code")]
    RoomCreationFailed,

    #[error("Question generation failed: {0}")]
    QuestionUnavailable(#[source] LlmError),
}

impl GameError {
    /// Stable machine-readable code for the wire protocol
    pub fn code(&self) -> &'static str {
        match self {
            GameError::RoomNotFound => "ROOM_NOT_FOUND",
            GameError::RoundNotFound => "ROUND_NOT_FOUND",
            GameError::PlayerNotFound => "PLAYER_NOT_FOUND",
            GameError::PlayerNotInRoom => "PLAYER_NOT_IN_ROOM",
            GameError::RoomNotJoinable => "ROOM_NOT_JOINABLE",
            GameError::Forbidden(_) => "FORBIDDEN",
            GameError::InvalidPhase(_) => "INVALID_PHASE",
            GameError::Validation(_) => "VALIDATION_ERROR",
            GameError::RoomCreationFailed => "ROOM_CREATION_FAILED",
            GameError::QuestionUnavailable(_) => "QUESTION_UNAVAILABLE",
        }
    }
}
