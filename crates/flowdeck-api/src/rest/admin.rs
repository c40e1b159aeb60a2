//! Organisation administration. Every handler requires the Admin role.

use std::collections::HashSet;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use flowdeck_core::{
    validation, AuditAction, AuditLog, Department, Holiday, NewAuditEntry, PasswordHasher,
    RoleName, User,
};
use flowdeck_store::{AdminUserUpdate, NewHoliday, NewUser, OrgOverview};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{audit, double_option, required_text, tenant_department, tenant_user};
use crate::auth::{require_admin, CurrentUser};
use crate::error::{ApiError, ApiResult};
use crate::realtime::Room;
use crate::state::AppState;

const GENERATED_PASSWORD_LEN: usize = 16;

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub department_id: Option<i64>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub roles: Vec<RoleName>,
}

#[derive(Debug, Serialize)]
pub struct CreatedUser {
    pub user: User,
    /// Shown once; only the hash is stored.
    pub password: String,
}

pub async fn create_user(
    State(state): State<AppState>,
    admin: CurrentUser,
    Json(req): Json<CreateUserRequest>,
) -> ApiResult<(StatusCode, Json<CreatedUser>)> {
    require_admin(&admin, "create user")?;
    let name = required_text("Name", &req.name)?;
    let email = req.email.trim().to_lowercase();
    validation::validate_email(&email)?;
    if let Some(dept) = req.department_id {
        tenant_department(&state, &admin, dept)?;
    }

    let password = validation::generate_random_password(GENERATED_PASSWORD_LEN);
    let password_hash = PasswordHasher::new().hash(&password)?;
    let roles = if req.roles.is_empty() {
        vec![RoleName::Member]
    } else {
        req.roles
    };
    let user = state.store.create_user(&NewUser {
        email,
        password_hash,
        name,
        organisation_id: admin.organisation_id,
        department_id: req.department_id,
        roles,
        job_title: req.job_title.filter(|t| !t.trim().is_empty()),
        is_email_verified: false,
    })?;

    audit(
        &state,
        NewAuditEntry::new(AuditAction::UserCreated, admin.organisation_id, admin.id)
            .entity("user", user.id)
            .details(user.email.clone()),
    );
    info!(user_id = user.id, by = admin.id, "User created");
    Ok((StatusCode::CREATED, Json(CreatedUser { user, password })))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub job_title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub department_id: Option<Option<i64>>,
    pub roles: Option<Vec<RoleName>>,
    pub is_active: Option<bool>,
}

/// Moving a user between departments also moves their live sockets between team channels.
pub async fn update_user(
    State(state): State<AppState>,
    admin: CurrentUser,
    Path(user_id): Path<i64>,
    Json(req): Json<UpdateUserRequest>,
) -> ApiResult<Json<User>> {
    require_admin(&admin, "update user")?;
    tenant_user(&state, &admin, user_id)?;
    if let Some(Some(dept)) = req.department_id {
        tenant_department(&state, &admin, dept)?;
    }
    if user_id == admin.id && req.is_active == Some(false) {
        return Err(ApiError::Validation(
            "You cannot deactivate your own account".into(),
        ));
    }
    let name = match req.name.as_deref() {
        Some(name) => Some(required_text("Name", name)?),
        None => None,
    };

    let before: HashSet<i64> = state.store.channel_ids_for_user(user_id)?.into_iter().collect();
    let updated = state.store.admin_update_user(
        user_id,
        &AdminUserUpdate {
            name,
            job_title: req.job_title,
            department_id: req.department_id,
            roles: req.roles,
            is_active: req.is_active,
        },
    )?;
    let after: HashSet<i64> = state.store.channel_ids_for_user(user_id)?.into_iter().collect();
    for left in before.difference(&after) {
        state.hub.leave_user(user_id, Room::Channel(*left));
    }
    for joined in after.difference(&before) {
        state.hub.join_user(user_id, Room::Channel(*joined));
    }

    audit(
        &state,
        NewAuditEntry::new(AuditAction::UserUpdated, admin.organisation_id, admin.id)
            .entity("user", user_id),
    );
    Ok(Json(updated))
}

/// Soft delete: the account is deactivated and keeps its history.
pub async fn deactivate_user(
    State(state): State<AppState>,
    admin: CurrentUser,
    Path(user_id): Path<i64>,
) -> ApiResult<StatusCode> {
    require_admin(&admin, "delete user")?;
    if user_id == admin.id {
        return Err(ApiError::Validation(
            "You cannot delete your own account".into(),
        ));
    }
    tenant_user(&state, &admin, user_id)?;
    state.store.admin_update_user(
        user_id,
        &AdminUserUpdate {
            is_active: Some(false),
            ..AdminUserUpdate::default()
        },
    )?;
    audit(
        &state,
        NewAuditEntry::new(AuditAction::UserDeactivated, admin.organisation_id, admin.id)
            .entity("user", user_id),
    );
    info!(user_id, by = admin.id, "User deactivated");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct DepartmentRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

pub async fn create_department(
    State(state): State<AppState>,
    admin: CurrentUser,
    Json(req): Json<DepartmentRequest>,
) -> ApiResult<(StatusCode, Json<Department>)> {
    require_admin(&admin, "create department")?;
    let name = required_text("Department name", &req.name)?;
    let department = state.store.create_department(
        admin.organisation_id,
        &name,
        req.description.as_deref().filter(|d| !d.trim().is_empty()),
    )?;
    audit(
        &state,
        NewAuditEntry::new(AuditAction::DepartmentCreated, admin.organisation_id, admin.id)
            .entity("department", department.id)
            .details(department.name.clone()),
    );
    Ok((StatusCode::CREATED, Json(department)))
}

pub async fn list_departments(
    State(state): State<AppState>,
    admin: CurrentUser,
) -> ApiResult<Json<Vec<Department>>> {
    require_admin(&admin, "list departments")?;
    Ok(Json(state.store.list_departments(admin.organisation_id)?))
}

#[derive(Debug, Serialize)]
pub struct SocketStats {
    pub active: usize,
    pub peak: usize,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct AdminOverview {
    #[serde(flatten)]
    pub overview: OrgOverview,
    pub online_users: usize,
    pub websockets: SocketStats,
}

pub async fn overview(
    State(state): State<AppState>,
    admin: CurrentUser,
) -> ApiResult<Json<AdminOverview>> {
    require_admin(&admin, "view overview")?;
    let (active, peak, total) = state.ws_metrics.snapshot();
    Ok(Json(AdminOverview {
        overview: state.store.org_overview(admin.organisation_id)?,
        online_users: state.hub.online_user_ids(admin.organisation_id).len(),
        websockets: SocketStats {
            active,
            peak,
            total,
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct HolidayRequest {
    pub name: String,
    pub date: NaiveDate,
    #[serde(default = "HolidayRequest::default_type")]
    pub holiday_type: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Global holidays are visible to every organisation.
    #[serde(default)]
    pub global: bool,
}

impl HolidayRequest {
    fn default_type() -> String {
        "public".to_string()
    }
}

pub async fn create_holiday(
    State(state): State<AppState>,
    admin: CurrentUser,
    Json(req): Json<HolidayRequest>,
) -> ApiResult<(StatusCode, Json<Holiday>)> {
    require_admin(&admin, "create holiday")?;
    let holiday = state.store.create_holiday(&NewHoliday {
        name: required_text("Holiday name", &req.name)?,
        date: req.date,
        holiday_type: required_text("Holiday type", &req.holiday_type)?,
        description: req.description,
        organisation_id: (!req.global).then_some(admin.organisation_id),
    })?;
    audit(
        &state,
        NewAuditEntry::new(AuditAction::HolidayCreated, admin.organisation_id, admin.id)
            .entity("holiday", holiday.id)
            .details(format!("{} {}", holiday.date, holiday.name)),
    );
    Ok((StatusCode::CREATED, Json(holiday)))
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditParams {
    pub limit: Option<u32>,
}

pub async fn audit_log(
    State(state): State<AppState>,
    admin: CurrentUser,
    Query(params): Query<AuditParams>,
) -> ApiResult<Json<Vec<AuditLog>>> {
    require_admin(&admin, "view audit log")?;
    let limit = params.limit.unwrap_or(100).clamp(1, 500);
    Ok(Json(state.store.list_audit(admin.organisation_id, limit)?))
}
