use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use flowdeck_core::{ChannelType, ChatChannel, ConversationPreview, Message, User, UserSummary};
use serde::{Deserialize, Serialize};

use super::{required_text, summaries, tenant_user, user_directory};
use crate::auth::CurrentUser;
use crate::error::{ApiError, ApiResult};
use crate::realtime::{MessagePayload, Room};
use crate::services::chat::{self, OutgoingMessage};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct LimitParams {
    pub limit: Option<u32>,
}

fn payloads(directory: &HashMap<i64, User>, messages: Vec<Message>) -> Vec<MessagePayload> {
    messages
        .into_iter()
        .map(|m| {
            let name = directory
                .get(&m.sender_id)
                .map(|u| u.name.clone())
                .unwrap_or_default();
            MessagePayload::new(m, name)
        })
        .collect()
}

fn member_channel(state: &AppState, user: &User, channel_id: i64) -> ApiResult<ChatChannel> {
    let channel = state
        .store
        .get_channel(channel_id)?
        .filter(|c| c.organisation_id == user.organisation_id)
        .ok_or_else(|| ApiError::not_found("channel", channel_id))?;
    if !state.store.is_channel_member(channel_id, user.id)? {
        return Err(ApiError::forbidden("Not a member of this channel"));
    }
    Ok(channel)
}

pub async fn list_channels(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<ChatChannel>>> {
    Ok(Json(state.store.channels_for_user(user.id)?))
}

#[derive(Debug, Deserialize)]
pub struct CreateChannelRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub channel_type: Option<ChannelType>,
    #[serde(default)]
    pub member_ids: Vec<i64>,
}

/// The creator always joins; members from other organisations are ignored.
pub async fn create_channel(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreateChannelRequest>,
) -> ApiResult<(StatusCode, Json<ChatChannel>)> {
    let name = required_text("Channel name", &req.name)?;
    let channel_type = match req.channel_type.unwrap_or_default() {
        ChannelType::Department => {
            return Err(ApiError::Validation(
                "Department channels are created with their department".into(),
            ))
        }
        other => other,
    };
    let channel = state.store.create_channel(
        user.organisation_id,
        &name,
        req.description.as_deref(),
        channel_type,
        None,
        user.id,
        &req.member_ids,
    )?;
    for member in state.store.channel_member_ids(channel.id)? {
        state.hub.join_user(member, Room::Channel(channel.id));
    }
    Ok((StatusCode::CREATED, Json(channel)))
}

#[derive(Debug, Serialize)]
pub struct ChannelHistory {
    pub channel: ChatChannel,
    pub members: Vec<UserSummary>,
    pub messages: Vec<MessagePayload>,
}

pub async fn channel_messages(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(channel_id): Path<i64>,
    Query(params): Query<LimitParams>,
) -> ApiResult<Json<ChannelHistory>> {
    let channel = member_channel(&state, &user, channel_id)?;
    let limit = params
        .limit
        .unwrap_or(state.settings.chat.history_limit)
        .clamp(1, state.settings.chat.history_limit);
    let directory = user_directory(&state, user.organisation_id)?;
    let members = state.store.channel_member_ids(channel_id)?;
    let messages = state.store.channel_messages(channel_id, limit)?;
    Ok(Json(ChannelHistory {
        channel,
        members: summaries(&directory, &members),
        messages: payloads(&directory, messages),
    }))
}

#[derive(Debug, Serialize)]
pub struct DirectHistory {
    pub peer: UserSummary,
    pub peer_online: bool,
    pub marked_read: usize,
    pub messages: Vec<MessagePayload>,
}

/// Opening a conversation reads everything the peer sent.
pub async fn direct_messages(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(peer_id): Path<i64>,
    Query(params): Query<LimitParams>,
) -> ApiResult<Json<DirectHistory>> {
    let peer = tenant_user(&state, &user, peer_id)?;
    let limit = params
        .limit
        .unwrap_or(state.settings.chat.history_limit)
        .clamp(1, state.settings.chat.history_limit);

    let marked_read = chat::mark_conversation_read(&state, user.id, peer_id)?;
    let messages = state.store.direct_conversation(user.id, peer_id, limit)?;
    let mut directory = HashMap::with_capacity(2);
    directory.insert(user.id, user.0.clone());
    directory.insert(peer.id, peer.clone());

    Ok(Json(DirectHistory {
        peer_online: state.hub.is_online(peer_id),
        peer: peer.summary(),
        marked_read,
        messages: payloads(&directory, messages),
    }))
}

pub async fn send_message(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<OutgoingMessage>,
) -> ApiResult<(StatusCode, Json<MessagePayload>)> {
    let payload = chat::send_message(&state, &user, req)?;
    Ok((StatusCode::CREATED, Json(payload)))
}

pub async fn mark_read(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(message_id): Path<i64>,
) -> ApiResult<Json<Message>> {
    Ok(Json(chat::mark_read(&state, &user, message_id)?))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    pub limit: Option<u32>,
}

pub async fn search(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<Vec<MessagePayload>>> {
    let query = required_text("Search query", &params.q)?;
    let limit = params
        .limit
        .unwrap_or(state.settings.chat.search_limit)
        .clamp(1, state.settings.chat.search_limit);
    let messages = state.store.search_messages(user.id, &query, limit)?;
    let directory = user_directory(&state, user.organisation_id)?;
    Ok(Json(payloads(&directory, messages)))
}

#[derive(Debug, Serialize)]
pub struct UnreadCount {
    pub count: i64,
}

pub async fn unread_count(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<UnreadCount>> {
    Ok(Json(UnreadCount {
        count: state.store.unread_direct_count(user.id)?,
    }))
}

pub async fn recent_conversations(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(params): Query<LimitParams>,
) -> ApiResult<Json<Vec<ConversationPreview>>> {
    let limit = params.limit.unwrap_or(20).clamp(1, 100);
    Ok(Json(state.store.recent_conversations(user.id, limit)?))
}
