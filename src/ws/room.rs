//! Room membership and lobby handlers

use crate::error::{GameError, GameResult};
use crate::protocol::ServerMessage;
use crate::state::{AppState, RoomView};
use crate::types::*;
use std::sync::Arc;

use super::Connection;

/// Room of an active player
pub(super) async fn room_of(state: &AppState, player_id: &str) -> GameResult<RoomId> {
    state
        .get_player(player_id)
        .await
        .filter(|p| p.is_active())
        .map(|p| p.room_id)
        .ok_or(GameError::PlayerNotFound)
}

/// Bind the connection to a player and start observing their room
async fn bind(
    state: &AppState,
    conn: &mut Connection,
    room: Room,
    player: Player,
) -> Vec<ServerMessage> {
    conn.unbind();
    conn.player_id = Some(player.id.clone());

    let mut replies = vec![ServerMessage::Joined {
        room_id: room.id.clone(),
        code: room.code,
        player_id: player.id.clone(),
    }];
    match state.subscribe_room(&room.id).await {
        Ok(sub) => {
            conn.room_updates = Some(sub.updates);
            replies.push(ServerMessage::Room(RoomView {
                snapshot: sub.initial,
                me: Some(player.id),
            }));
        }
        Err(e) => replies.push(e.into()),
    }
    replies
}

pub async fn handle_create_room(
    state: &Arc<AppState>,
    conn: &mut Connection,
    name: String,
    session: String,
    country: Option<String>,
) -> Vec<ServerMessage> {
    match state
        .create_room(&name, &session, country.as_deref())
        .await
    {
        Ok((room, player)) => bind(state, conn, room, player).await,
        Err(e) => vec![e.into()],
    }
}

pub async fn handle_join_room(
    state: &Arc<AppState>,
    conn: &mut Connection,
    code: String,
    name: String,
    session: String,
    country: Option<String>,
) -> Vec<ServerMessage> {
    match state
        .join_room(&code, &name, &session, country.as_deref())
        .await
    {
        Ok((room, player)) => bind(state, conn, room, player).await,
        Err(e) => vec![e.into()],
    }
}

/// Look at a room, e.g. after a page refresh. A session that belongs to the
/// room rebinds the connection to that player.
pub async fn handle_get_room(
    state: &Arc<AppState>,
    conn: &mut Connection,
    room_id: RoomId,
    session: Option<String>,
) -> Vec<ServerMessage> {
    let view = match state.get_room(&room_id, session.as_deref()).await {
        Ok(view) => view,
        Err(e) => return vec![e.into()],
    };
    let sub = match state.subscribe_room(&room_id).await {
        Ok(sub) => sub,
        Err(e) => return vec![e.into()],
    };

    conn.unbind();
    conn.player_id = view.me.clone();
    conn.room_updates = Some(sub.updates);
    vec![ServerMessage::Room(RoomView {
        snapshot: sub.initial,
        me: view.me,
    })]
}

pub async fn handle_update_config(
    state: &Arc<AppState>,
    player_id: &str,
    total_rounds: u32,
    round_time_limit: u32,
    initial_prompt: String,
) -> Vec<ServerMessage> {
    let result = async {
        let room_id = room_of(state, player_id).await?;
        state
            .update_config(
                &room_id,
                player_id,
                total_rounds,
                round_time_limit,
                &initial_prompt,
            )
            .await
    }
    .await;

    match result {
        // The room broadcast carries the new settings
        Ok(_) => Vec::new(),
        Err(e) => vec![e.into()],
    }
}

pub async fn handle_start_game(state: &Arc<AppState>, player_id: &str) -> Vec<ServerMessage> {
    let result = async {
        let room_id = room_of(state, player_id).await?;
        state.start_game(&room_id, player_id).await
    }
    .await;

    match result {
        Ok(_) => Vec::new(),
        Err(e) => vec![e.into()],
    }
}

pub async fn handle_leave_room(
    state: &Arc<AppState>,
    conn: &mut Connection,
    player_id: &str,
) -> Vec<ServerMessage> {
    let room_id = match room_of(state, player_id).await {
        Ok(room_id) => room_id,
        Err(e) => return vec![e.into()],
    };
    match state.leave_room(player_id).await {
        Ok(()) => {
            conn.unbind();
            vec![ServerMessage::Left { room_id }]
        }
        Err(e) => vec![e.into()],
    }
}

pub async fn handle_kick_player(
    state: &Arc<AppState>,
    player_id: &str,
    target_id: &str,
) -> Vec<ServerMessage> {
    match state.kick_player(target_id, player_id).await {
        Ok(()) => Vec::new(),
        Err(e) => vec![e.into()],
    }
}

pub async fn handle_heartbeat(state: &Arc<AppState>, player_id: &str) -> Vec<ServerMessage> {
    match state.heartbeat(player_id).await {
        Ok(()) => Vec::new(),
        Err(e) => vec![e.into()],
    }
}

pub async fn handle_mark_away(state: &Arc<AppState>, player_id: &str) -> Vec<ServerMessage> {
    match state.mark_away(player_id).await {
        Ok(()) => Vec::new(),
        Err(e) => vec![e.into()],
    }
}

pub async fn handle_get_standings(state: &Arc<AppState>, player_id: &str) -> Vec<ServerMessage> {
    let result = async {
        let room_id = room_of(state, player_id).await?;
        let standings = state.get_standings(&room_id).await?;
        Ok::<_, GameError>(ServerMessage::Standings { room_id, standings })
    }
    .await;

    vec![result.unwrap_or_else(Into::into)]
}
