//! Round play handlers

use crate::error::GameError;
use crate::protocol::ServerMessage;
use crate::state::AppState;
use crate::types::*;
use std::sync::Arc;

use super::room::room_of;
use super::Connection;

/// Fetch (or create) the room's current round and observe it
pub async fn handle_get_current_round(
    state: &Arc<AppState>,
    conn: &mut Connection,
    player_id: &str,
) -> Vec<ServerMessage> {
    let result = async {
        let room_id = room_of(state, player_id).await?;
        let snapshot = state.get_or_create_current_round(&room_id).await?;
        state.subscribe_game(&snapshot.round.id).await
    }
    .await;

    match result {
        Ok(sub) => {
            let round_id = sub.initial.round.id.clone();
            conn.game_updates = Some((round_id, sub.updates));
            vec![ServerMessage::Game(sub.initial)]
        }
        Err(e) => vec![e.into()],
    }
}

/// A final submission may be the one the round was waiting for
async fn after_submit(state: &AppState, round_id: &str) {
    match state.check_progress(round_id).await {
        Ok(true) => tracing::debug!("Round {} moved on after a submission", round_id),
        Ok(false) => {}
        Err(e) => tracing::warn!("Progress check for round {} failed: {}", round_id, e),
    }
}

pub async fn handle_save_answer(
    state: &Arc<AppState>,
    player_id: &str,
    round_id: RoundId,
    text: String,
    submit: bool,
) -> Vec<ServerMessage> {
    match state.save_answer(&round_id, player_id, &text, submit).await {
        Ok(answer) => {
            if answer.submitted {
                after_submit(state, &round_id).await;
            }
            Vec::new()
        }
        Err(e) => vec![e.into()],
    }
}

pub async fn handle_save_guess(
    state: &Arc<AppState>,
    player_id: &str,
    round_id: RoundId,
    target_id: PlayerId,
    text: String,
    submit: bool,
) -> Vec<ServerMessage> {
    match state
        .save_guess(&round_id, player_id, &target_id, &text, submit)
        .await
    {
        Ok(guess) => {
            if guess.submitted {
                after_submit(state, &round_id).await;
            }
            Vec::new()
        }
        Err(e) => vec![e.into()],
    }
}

pub async fn handle_get_guess_target(
    state: &Arc<AppState>,
    player_id: &str,
    round_id: RoundId,
) -> Vec<ServerMessage> {
    match state.get_guess_target(&round_id, player_id).await {
        Ok(target) => vec![ServerMessage::GuessTarget { round_id, target }],
        Err(e) => vec![e.into()],
    }
}

pub async fn handle_mark_ready(
    state: &Arc<AppState>,
    player_id: &str,
    round_id: RoundId,
) -> Vec<ServerMessage> {
    let result = async {
        let round = state
            .get_round(&round_id)
            .await
            .ok_or(GameError::RoundNotFound)?;
        state.mark_ready_for_next_round(&round_id, player_id).await?;
        state.get_round_ready_status(&round.room_id).await
    }
    .await;

    match result {
        Ok(status) => vec![ServerMessage::ReadyStatus(status)],
        Err(e) => vec![e.into()],
    }
}

pub async fn handle_get_ready_status(
    state: &Arc<AppState>,
    player_id: &str,
) -> Vec<ServerMessage> {
    let result = async {
        let room_id = room_of(state, player_id).await?;
        state.get_round_ready_status(&room_id).await
    }
    .await;

    match result {
        Ok(status) => vec![ServerMessage::ReadyStatus(status)],
        Err(e) => vec![e.into()],
    }
}

pub async fn handle_get_results(state: &Arc<AppState>, round_id: RoundId) -> Vec<ServerMessage> {
    match state.get_results(&round_id).await {
        Ok(results) => vec![ServerMessage::Results { round_id, results }],
        Err(e) => vec![e.into()],
    }
}
