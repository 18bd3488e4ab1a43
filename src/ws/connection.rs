//! WebSocket connection lifecycle: upgrade, snapshot push, command loop.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth;
use crate::error::EngineResult;
use crate::http::routes::AppState;
use crate::hub::ServerEvent;
use crate::model::Actor;
use crate::ws::protocol::ClientCommand;

#[derive(Deserialize)]
pub struct WsQuery {
    token: String,
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(WsQuery { token }): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let Ok(actor) = auth::verify_token(&token) else {
        return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
    };
    ws.on_upgrade(move |socket| handle_socket(state, actor, socket))
}

async fn handle_socket(state: AppState, actor: Actor, socket: WebSocket) {
    let client_id = Uuid::new_v4();
    let mut events = state.hub.register(client_id, &actor.username);
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Forward hub events to this socket until either side goes away.
    let writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let Ok(text) = serde_json::to_string(&event) else { continue };
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    info!(
        client = %client_id,
        user = %actor.username,
        connected = state.hub.connected(),
        "client connected"
    );
    send_welcome(&state, client_id, &actor);
    state
        .hub
        .publish(&ServerEvent::Status { msg: format!("{} connected", actor.username) });

    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                Ok(cmd) => {
                    if let Err(err) = dispatch(&state, client_id, &actor, cmd) {
                        debug!(user = %actor.username, %err, "command rejected");
                        state
                            .hub
                            .publish_to(client_id, &ServerEvent::Error { message: err.to_string() });
                    }
                }
                Err(err) => {
                    state.hub.publish_to(
                        client_id,
                        &ServerEvent::Error { message: format!("bad message: {err}") },
                    );
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.hub.unregister(client_id);
    writer.abort();
    info!(client = %client_id, user = %actor.username, "client disconnected");
    state
        .hub
        .publish(&ServerEvent::Status { msg: format!("{} disconnected", actor.username) });
}

fn dispatch(state: &AppState, client_id: Uuid, actor: &Actor, cmd: ClientCommand) -> EngineResult<()> {
    match cmd {
        ClientCommand::Ping => {
            state.hub.publish_to(client_id, &ServerEvent::Pong);
            Ok(())
        }
        ClientCommand::Chat { message, kind } => state.chat.send_message(actor, &message, kind),
        ClientCommand::RollDice { dice, modifier, reason } => {
            state.chat.roll_dice(actor, &dice, modifier, &reason).map(|_| ())
        }
        ClientCommand::StartCombat { combatants } => {
            state.combat.start_combat(actor, combatants).map(|_| ())
        }
        ClientCommand::EndCombat => state.combat.end_combat(actor),
        ClientCommand::NextTurn => state.combat.next_turn(actor).map(|_| ()),
        ClientCommand::UpdateHp { character_id, hp } => {
            state.combat.update_hp(actor, character_id, hp).map(|_| ())
        }
        ClientCommand::MoveToken { token_id, x, y } => {
            state.map.move_token(actor, &token_id, x, y).map(|_| ())
        }
        ClientCommand::ToggleGrid => state.map.toggle_grid(actor).map(|_| ()),
        ClientCommand::SetGridSize { size } => state.map.set_grid_size(actor, size).map(|_| ()),
        ClientCommand::RequestState => {
            send_welcome(state, client_id, actor);
            Ok(())
        }
    }
}

/// Push the full authoritative snapshot to one client. Clients treat their
/// local state as a disposable cache and rebuild it from this.
fn send_welcome(state: &AppState, client_id: Uuid, actor: &Actor) {
    let combat = state.store.combat().unwrap_or_default();
    let battle_map = state.store.battle_map().unwrap_or_else(|_| {
        crate::model::BattleMapState::new(None)
    });
    let characters = state.store.characters().unwrap_or_default();
    let messages = state.store.recent_messages(100).unwrap_or_default();
    state.hub.publish_to(
        client_id,
        &ServerEvent::Welcome {
            user_id: actor.user_id,
            username: actor.username.clone(),
            role: actor.role,
            combat,
            battle_map,
            characters,
            messages,
        },
    );
}
