//! WebSocket message dispatch
//!
//! Resolves the connection's bound player, then hands off to the room or
//! round handlers. Every handler returns the replies for this connection
//! only; everyone else hears about changes through the fan-out topics.

use crate::broadcast::RoomEvent;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::{AppState, RoomView};
use std::sync::Arc;

use super::{room, round, Connection};

/// Resolve the connection's player or reply that nobody has joined yet
macro_rules! bound_player {
    ($conn:expr) => {
        match $conn.player_id.clone() {
            Some(player_id) => player_id,
            None => {
                return vec![ServerMessage::error(
                    "NOT_JOINED",
                    "Create or join a room first",
                )]
            }
        }
    };
}

/// Handle a client message and return the replies for this connection
pub async fn handle_message(
    msg: ClientMessage,
    conn: &mut Connection,
    state: &Arc<AppState>,
) -> Vec<ServerMessage> {
    match msg {
        // Entry points, no bound player required
        ClientMessage::CreateRoom {
            name,
            session,
            country,
        } => room::handle_create_room(state, conn, name, session, country).await,

        ClientMessage::JoinRoom {
            code,
            name,
            session,
            country,
        } => room::handle_join_room(state, conn, code, name, session, country).await,

        ClientMessage::GetRoom { room_id, session } => {
            room::handle_get_room(state, conn, room_id, session).await
        }

        // Room management
        ClientMessage::UpdateConfig {
            total_rounds,
            round_time_limit,
            initial_prompt,
        } => {
            let player_id = bound_player!(conn);
            room::handle_update_config(
                state,
                &player_id,
                total_rounds,
                round_time_limit,
                initial_prompt,
            )
            .await
        }

        ClientMessage::StartGame => {
            let player_id = bound_player!(conn);
            room::handle_start_game(state, &player_id).await
        }

        ClientMessage::LeaveRoom => {
            let player_id = bound_player!(conn);
            room::handle_leave_room(state, conn, &player_id).await
        }

        ClientMessage::KickPlayer { player_id: target } => {
            let player_id = bound_player!(conn);
            room::handle_kick_player(state, &player_id, &target).await
        }

        ClientMessage::Heartbeat => {
            let player_id = bound_player!(conn);
            room::handle_heartbeat(state, &player_id).await
        }

        ClientMessage::MarkAway => {
            let player_id = bound_player!(conn);
            room::handle_mark_away(state, &player_id).await
        }

        ClientMessage::GetStandings => {
            let player_id = bound_player!(conn);
            room::handle_get_standings(state, &player_id).await
        }

        // Round play
        ClientMessage::GetCurrentRound => {
            let player_id = bound_player!(conn);
            round::handle_get_current_round(state, conn, &player_id).await
        }

        ClientMessage::SaveAnswer {
            round_id,
            text,
            submit,
        } => {
            let player_id = bound_player!(conn);
            round::handle_save_answer(state, &player_id, round_id, text, submit).await
        }

        ClientMessage::SaveGuess {
            round_id,
            target_id,
            text,
            submit,
        } => {
            let player_id = bound_player!(conn);
            round::handle_save_guess(state, &player_id, round_id, target_id, text, submit).await
        }

        ClientMessage::GetGuessTarget { round_id } => {
            let player_id = bound_player!(conn);
            round::handle_get_guess_target(state, &player_id, round_id).await
        }

        ClientMessage::MarkReady { round_id } => {
            let player_id = bound_player!(conn);
            round::handle_mark_ready(state, &player_id, round_id).await
        }

        ClientMessage::GetReadyStatus => {
            let player_id = bound_player!(conn);
            round::handle_get_ready_status(state, &player_id).await
        }

        ClientMessage::GetResults { round_id } => round::handle_get_results(state, round_id).await,
    }
}

/// Turn a room update into what this connection should see
pub fn handle_room_event(event: RoomEvent, conn: &mut Connection) -> Vec<ServerMessage> {
    match event {
        RoomEvent::Updated(snapshot) => {
            if let Some(player_id) = &conn.player_id {
                // Kicked (or left from another tab)
                if !snapshot.players.iter().any(|v| &v.player.id == player_id) {
                    let room_id = snapshot.room.id.clone();
                    conn.unbind();
                    return vec![ServerMessage::Left { room_id }];
                }
            }
            vec![ServerMessage::Room(RoomView {
                snapshot,
                me: conn.player_id.clone(),
            })]
        }
        RoomEvent::Closed { room_id } => {
            conn.unbind();
            vec![ServerMessage::RoomClosed { room_id }]
        }
    }
}
