use std::collections::HashMap;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use chrono::Utc;
use flowdeck_core::{MessageTarget, User};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::events::{ClientEvent, OnlineUser, ServerEvent};
use super::hub::{ConnectionId, Registration, Room};
use crate::auth::{authenticate, bearer_token};
use crate::error::{ApiError, ApiResult};
use crate::services::chat::{self, OutgoingMessage};
use crate::state::AppState;

const NOTIFICATION_PAGE: u32 = 50;

#[derive(Debug, Default, Deserialize)]
pub struct SocketParams {
    pub token: Option<String>,
}

/// `GET /ws?token=<jwt>`; a bearer header works too.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<SocketParams>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let token = params
        .token
        .as_deref()
        .or_else(|| bearer_token(&headers))
        .ok_or(ApiError::Unauthorized)?;
    let user = authenticate(&state, token)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user)))
}

async fn handle_socket(socket: WebSocket, state: AppState, user: User) {
    let channel_ids = state.store.channel_ids_for_user(user.id).unwrap_or_else(|e| {
        warn!(user_id = user.id, error = %e, "Could not load channel memberships");
        Vec::new()
    });
    let Registration {
        id: conn_id,
        mut events,
        first_for_user,
    } = state
        .hub
        .register(user.id, user.organisation_id, &channel_ids);
    state.ws_metrics.on_connect();
    info!(user_id = user.id, connection = %conn_id, "WebSocket connection established");

    if first_for_user {
        set_presence(&state, &user, true);
    }
    if let Err(e) = chat::deliver_pending(&state, user.id) {
        warn!(user_id = user.id, error = %e, "Pending delivery failed");
    }

    let (mut sender, mut receiver) = socket.split();
    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                if sender.send(Message::Text(event.to_json().into())).await.is_err() {
                    break;
                }
            }

            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(err) = handle_frame(&state, &user, conn_id, text.as_str()) {
                            state.hub.send_to(conn_id, client_error(err));
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(connection = %conn_id, error = %e, "WebSocket receive failed");
                        break;
                    }
                }
            }
        }
    }

    if let Some(departure) = state.hub.unregister(conn_id) {
        if departure.last_for_user {
            set_presence(&state, &user, false);
        }
    }
    state.ws_metrics.on_disconnect();
    info!(user_id = user.id, connection = %conn_id, "WebSocket connection closed");
}

/// Persists and broadcasts a presence change unless another socket of the user has
/// opened or closed in the meantime.
fn set_presence(state: &AppState, user: &User, online: bool) {
    state.hub.settle_presence(user.id, online, || {
        let now = Utc::now();
        if let Err(e) = state.store.set_online(user.id, online, now) {
            warn!(user_id = user.id, error = %e, "Could not persist presence");
        }
        let event = if online {
            ServerEvent::UserOnline {
                user_id: user.id,
                name: user.name.clone(),
            }
        } else {
            ServerEvent::UserOffline {
                user_id: user.id,
                last_seen: now,
            }
        };
        state.hub.emit(Room::Org(user.organisation_id), &event);
    });
}

fn client_error(err: ApiError) -> ServerEvent {
    if err.status().is_server_error() {
        warn!(error = %err, "Socket event failed");
        return ServerEvent::error("Internal server error");
    }
    ServerEvent::error(err.to_string())
}

fn handle_frame(state: &AppState, user: &User, conn: ConnectionId, text: &str) -> ApiResult<()> {
    let event: ClientEvent = serde_json::from_str(text)
        .map_err(|e| ApiError::Validation(format!("Invalid event: {e}")))?;
    dispatch(state, user, conn, event)
}

fn dispatch(state: &AppState, user: &User, conn: ConnectionId, event: ClientEvent) -> ApiResult<()> {
    match event {
        ClientEvent::JoinChannel { channel_id } => {
            chat::resolve_target(state, user, Some(channel_id), None)?;
            state.hub.join(conn, Room::Channel(channel_id));
            state.hub.emit(
                Room::Channel(channel_id),
                &ServerEvent::JoinedChannel {
                    channel_id,
                    user_id: user.id,
                    name: user.name.clone(),
                },
            );
        }
        ClientEvent::LeaveChannel { channel_id } => {
            state.hub.leave(conn, Room::Channel(channel_id));
            let event = ServerEvent::LeftChannel {
                channel_id,
                user_id: user.id,
                name: user.name.clone(),
            };
            state.hub.emit(Room::Channel(channel_id), &event);
            state.hub.send_to(conn, event);
        }
        ClientEvent::SendMessage {
            content,
            channel_id,
            recipient_id,
            message_type,
            task_card_id,
        } => {
            chat::send_message(
                state,
                user,
                OutgoingMessage {
                    content,
                    channel_id,
                    recipient_id,
                    message_type,
                    task_card_id,
                },
            )?;
        }
        ClientEvent::Typing {
            channel_id,
            recipient_id,
            is_typing,
        } => {
            let target = chat::resolve_target(state, user, channel_id, recipient_id)?;
            let event = ServerEvent::UserTyping {
                user_id: user.id,
                name: user.name.clone(),
                channel_id,
                is_typing,
            };
            match target {
                MessageTarget::Channel(id) => {
                    state.hub.emit_except(Room::Channel(id), &event, conn);
                }
                MessageTarget::Direct(id) => {
                    state.hub.emit(Room::User(id), &event);
                }
            }
        }
        ClientEvent::RequestOnlineUsers => {
            let names: HashMap<i64, String> = state
                .store
                .list_users(user.organisation_id)?
                .into_iter()
                .map(|u| (u.id, u.name))
                .collect();
            let users = state
                .hub
                .online_user_ids(user.organisation_id)
                .into_iter()
                .map(|id| OnlineUser {
                    user_id: id,
                    name: names.get(&id).cloned().unwrap_or_default(),
                })
                .collect();
            state.hub.send_to(conn, ServerEvent::OnlineUsersList { users });
        }
        ClientEvent::MarkMessageRead { message_id } => {
            chat::mark_read(state, user, message_id)?;
        }
        ClientEvent::RequestNotifications { unread_only } => {
            let notifications =
                state
                    .store
                    .list_notifications(user.id, unread_only, NOTIFICATION_PAGE)?;
            let unread_count = state.store.unread_notification_count(user.id)?;
            state.hub.send_to(
                conn,
                ServerEvent::NotificationsList {
                    notifications,
                    unread_count,
                },
            );
        }
    }
    Ok(())
}
