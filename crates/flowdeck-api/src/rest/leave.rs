use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{Datelike, NaiveDate, Utc};
use flowdeck_core::{
    policy, AuditAction, LeaveBalance, LeaveRequest, LeaveStatus, LeaveType, NewAuditEntry,
    NewNotification, NotificationKind, QuotaBucket, User,
};
use flowdeck_store::NewLeaveRequest;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{audit, tenant_user};
use crate::auth::{deny, require_manager, CurrentUser};
use crate::error::{ApiError, ApiResult};
use crate::services::notify;
use crate::state::AppState;

const MAX_QUOTA_DAYS: i64 = 365;

pub async fn my_requests(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<LeaveRequest>>> {
    Ok(Json(state.store.leave_requests_for(user.id)?))
}

#[derive(Debug, Deserialize)]
pub struct LeaveRequestBody {
    pub leave_type: LeaveType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Quota-bearing types are checked against approved plus pending days of the start year.
pub async fn create_request(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<LeaveRequestBody>,
) -> ApiResult<(StatusCode, Json<LeaveRequest>)> {
    let total_days = LeaveRequest::calculate_days(req.start_date, req.end_date)?;
    let request = state.store.create_leave_request(&NewLeaveRequest {
        user_id: user.id,
        leave_type: req.leave_type,
        start_date: req.start_date,
        end_date: req.end_date,
        total_days,
        reason: req.reason.filter(|r| !r.trim().is_empty()),
    })?;

    let reviewers: Vec<NewNotification> = state
        .store
        .list_users(user.organisation_id)?
        .iter()
        .filter(|candidate| candidate.is_active && policy::can_review_leave(candidate, &user))
        .map(|reviewer| {
            NewNotification::new(
                reviewer.id,
                NotificationKind::LeaveRequested,
                "Leave request",
                format!(
                    "{} requested {} day(s) of {} leave from {}",
                    user.name, total_days, request.leave_type, request.start_date
                ),
            )
            .with_action_url("/leave/pending")
        })
        .collect();
    notify::notify_many(&state, reviewers)?;
    info!(leave_id = request.id, user_id = user.id, total_days, "Leave requested");

    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn pending(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<LeaveRequest>>> {
    require_manager(&user, "review leave")?;
    Ok(Json(state.store.pending_leave_for_reviewer(&user)?))
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub decision: LeaveStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

pub async fn review(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(leave_id): Path<i64>,
    Json(req): Json<ReviewRequest>,
) -> ApiResult<Json<LeaveRequest>> {
    let request = state
        .store
        .get_leave_request(leave_id)?
        .ok_or_else(|| ApiError::not_found("leave request", leave_id))?;
    let requester = tenant_user(&state, &user, request.user_id)
        .map_err(|_| ApiError::not_found("leave request", leave_id))?;
    if !policy::can_review_leave(&user, &requester) {
        return deny(&user, "leave", "You cannot review this request");
    }

    let reviewed =
        state
            .store
            .review_leave(leave_id, user.id, req.decision, req.notes.as_deref())?;
    audit(
        &state,
        NewAuditEntry::new(AuditAction::LeaveReviewed, user.organisation_id, user.id)
            .entity("leave_request", leave_id)
            .details(reviewed.status.as_str()),
    );
    notify::notify(
        &state,
        NewNotification::new(
            requester.id,
            NotificationKind::LeaveReviewed,
            format!("Leave request {}", reviewed.status),
            format!(
                "{} {} your {} leave from {} to {}",
                user.name, reviewed.status, reviewed.leave_type, reviewed.start_date, reviewed.end_date
            ),
        )
        .with_action_url("/leave"),
    )?;
    Ok(Json(reviewed))
}

#[derive(Debug, Default, Deserialize)]
pub struct BalanceParams {
    pub year: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct BalanceView {
    #[serde(flatten)]
    pub balance: LeaveBalance,
    pub remaining: i64,
}

pub async fn balance(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(params): Query<BalanceParams>,
) -> ApiResult<Json<Vec<BalanceView>>> {
    let year = params.year.unwrap_or_else(|| Utc::now().year());
    let balances = [QuotaBucket::Annual, QuotaBucket::Sick, QuotaBucket::Personal]
        .into_iter()
        .map(|bucket| {
            let balance = state.store.leave_balance(&user, bucket, year)?;
            Ok(BalanceView {
                remaining: balance.remaining(),
                balance,
            })
        })
        .collect::<ApiResult<Vec<_>>>()?;
    Ok(Json(balances))
}

#[derive(Debug, Deserialize)]
pub struct QuotaRequest {
    pub annual: i64,
    pub sick: i64,
    pub personal: i64,
}

pub async fn set_quota(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(user_id): Path<i64>,
    Json(req): Json<QuotaRequest>,
) -> ApiResult<Json<User>> {
    require_manager(&user, "set leave quota")?;
    let target = tenant_user(&state, &user, user_id)?;
    if !policy::can_manage_user(&user, &target) {
        return deny(&user, "leave quota", "You cannot manage this user");
    }
    for (label, days) in [("annual", req.annual), ("sick", req.sick), ("personal", req.personal)] {
        if !(0..=MAX_QUOTA_DAYS).contains(&days) {
            return Err(ApiError::Validation(format!(
                "{label} quota must be between 0 and {MAX_QUOTA_DAYS}"
            )));
        }
    }

    let updated = state
        .store
        .set_leave_quota(user_id, req.annual, req.sick, req.personal, user.id)?;
    audit(
        &state,
        NewAuditEntry::new(AuditAction::QuotaUpdated, user.organisation_id, user.id)
            .entity("user", user_id)
            .details(format!(
                "annual={} sick={} personal={}",
                req.annual, req.sick, req.personal
            )),
    );
    Ok(Json(updated))
}
