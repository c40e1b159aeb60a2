use axum::{
    extract::{Path, Query, State},
    Json,
};
use flowdeck_core::{User, UserSummary};
use serde::{Deserialize, Serialize};

use super::{required_text, tenant_user};
use crate::auth::CurrentUser;
use crate::error::ApiResult;
use crate::state::AppState;

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
) -> ApiResult<Json<Vec<UserSummary>>> {
    let query = required_text("Search query", &params.q)?;
    let limit = params.limit.unwrap_or(10).clamp(1, 50);
    let found = state
        .store
        .search_users(user.organisation_id, &query, limit)?
        .iter()
        .map(User::summary)
        .collect();
    Ok(Json(found))
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    #[serde(flatten)]
    pub user: User,
    pub is_online: bool,
}

pub async fn get_user(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<UserProfile>> {
    let found = tenant_user(&state, &user, user_id)?;
    Ok(Json(UserProfile {
        is_online: state.hub.is_online(found.id),
        user: found,
    }))
}
