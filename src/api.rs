//! HTTP read endpoints for clients that poll instead of listening on the socket.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::error::GameError;
use crate::state::AppState;
use crate::types::{ReadyStatus, RoundResult, Standing};

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    msg: String,
}

impl GameError {
    pub fn status(&self) -> StatusCode {
        match self {
            GameError::RoomNotFound
            | GameError::RoundNotFound
            | GameError::PlayerNotFound => StatusCode::NOT_FOUND,
            GameError::PlayerNotInRoom | GameError::Forbidden(_) => StatusCode::FORBIDDEN,
            GameError::RoomNotJoinable | GameError::InvalidPhase(_) => StatusCode::CONFLICT,
            GameError::Validation(_) => StatusCode::BAD_REQUEST,
            GameError::RoomCreationFailed => StatusCode::SERVICE_UNAVAILABLE,
            GameError::QuestionUnavailable(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for GameError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code(),
            msg: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// Readiness for the room's next round.
///
/// GET /api/rooms/{room_id}/ready
pub async fn ready_status(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<Json<ReadyStatus>, GameError> {
    Ok(Json(state.get_round_ready_status(&room_id).await?))
}

/// Current standings, best score first.
///
/// GET /api/rooms/{room_id}/standings
pub async fn standings(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<Json<Vec<Standing>>, GameError> {
    Ok(Json(state.get_standings(&room_id).await?))
}

/// Reveal view of a round.
///
/// GET /api/rounds/{round_id}/results
pub async fn results(
    State(state): State<Arc<AppState>>,
    Path(round_id): Path<String>,
) -> Result<Json<Vec<RoundResult>>, GameError> {
    Ok(Json(state.get_results(&round_id).await?))
}
