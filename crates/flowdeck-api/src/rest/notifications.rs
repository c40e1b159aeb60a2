use axum::{
    extract::{Path, Query, State},
    Json,
};
use flowdeck_core::Notification;
use serde::{Deserialize, Serialize};

use super::required_text;
use crate::auth::{deny, require_admin, CurrentUser};
use crate::error::{ApiError, ApiResult};
use crate::services::notify;
use crate::state::AppState;

const DEFAULT_LIMIT: u32 = 50;

#[derive(Debug, Default, Deserialize)]
pub struct NotificationParams {
    #[serde(default)]
    pub unread: bool,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct NotificationList {
    pub notifications: Vec<Notification>,
    pub unread_count: i64,
}

pub async fn list(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(params): Query<NotificationParams>,
) -> ApiResult<Json<NotificationList>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, 200);
    Ok(Json(NotificationList {
        notifications: state.store.list_notifications(user.id, params.unread, limit)?,
        unread_count: state.store.unread_notification_count(user.id)?,
    }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Notification>> {
    let notification = state
        .store
        .get_notification(id)?
        .ok_or_else(|| ApiError::not_found("notification", id))?;
    if notification.user_id != user.id {
        return deny(&user, "notification", "This notification belongs to someone else");
    }
    Ok(Json(state.store.mark_notification_read(user.id, id)?))
}

#[derive(Debug, Serialize)]
pub struct ReadAll {
    pub updated: usize,
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<ReadAll>> {
    Ok(Json(ReadAll {
        updated: state.store.mark_all_notifications_read(user.id)?,
    }))
}

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub title: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct BroadcastResult {
    pub reached: usize,
}

pub async fn broadcast(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<BroadcastRequest>,
) -> ApiResult<Json<BroadcastResult>> {
    require_admin(&user, "broadcast")?;
    let title = required_text("Title", &req.title)?;
    let message = required_text("Message", &req.message)?;
    Ok(Json(BroadcastResult {
        reached: notify::broadcast(&state, &user, &title, &message),
    }))
}
