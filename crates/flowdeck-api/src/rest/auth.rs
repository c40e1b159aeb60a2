use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, NaiveDate, Utc};
use flowdeck_core::{
    validation, AuditAction, Department, NewAuditEntry, Organisation, PasswordHasher, RoleName,
    SecurityError, SecurityEvent, SecurityLogger, User, UserPreferences,
};
use flowdeck_store::{NewOrganisation, NewUser, ProfileUpdate};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{audit, required_text};
use crate::auth::CurrentUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub organisation_name: String,
    pub organisation_email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub organisation: Organisation,
    #[serde(flatten)]
    pub session: TokenResponse,
}

fn issue_token(state: &AppState, user: User) -> ApiResult<TokenResponse> {
    let ctx = state.jwt.context_for(
        user.id,
        user.organisation_id,
        user.department_id,
        user.roles.clone(),
    );
    let token = state.jwt.create_token(&ctx)?;
    Ok(TokenResponse {
        token,
        token_type: "Bearer",
        expires_at: ctx.expires_at,
        user,
    })
}

/// Creates an organisation together with its first administrator.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<RegisterResponse>)> {
    let org_name = required_text("Organisation name", &req.organisation_name)?;
    let name = required_text("Name", &req.name)?;
    let org_email = req.organisation_email.trim().to_lowercase();
    let email = req.email.trim().to_lowercase();
    validation::validate_email(&org_email)?;
    validation::validate_email(&email)?;
    validation::validate_password_strength(&req.password)?;

    let password_hash = PasswordHasher::new().hash(&req.password)?;
    let (organisation, user) = state.store.register_organisation(
        &NewOrganisation {
            name: org_name,
            email: org_email,
            phone: req.phone,
            address: req.address,
            website: req.website,
        },
        |organisation_id| NewUser {
            email,
            password_hash,
            name,
            organisation_id,
            department_id: None,
            roles: vec![RoleName::Admin],
            job_title: None,
            is_email_verified: true,
        },
    )?;

    audit(
        &state,
        NewAuditEntry::new(AuditAction::Register, organisation.id, user.id)
            .entity("organisation", organisation.id),
    );
    info!(organisation_id = organisation.id, user_id = user.id, "Organisation registered");

    let session = issue_token(&state, user)?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            organisation,
            session,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<TokenResponse>> {
    let email = req.email.trim().to_lowercase();
    if !state.login_limiter.check(&email) {
        SecurityLogger::log_event(SecurityEvent::RateLimited { key: email });
        return Err(ApiError::TooManyRequests);
    }

    let fail = |reason: &str| {
        SecurityLogger::log_event(SecurityEvent::AuthenticationFailure {
            email: email.clone(),
            reason: reason.to_string(),
        });
        ApiError::from(SecurityError::InvalidCredentials)
    };

    let Some((user, hash)) = state.store.find_user_credentials(&email)? else {
        return Err(fail("unknown email"));
    };
    if !PasswordHasher::new().verify(&req.password, &hash) {
        return Err(fail("wrong password"));
    }
    if !user.is_active {
        SecurityLogger::log_event(SecurityEvent::AuthenticationFailure {
            email: email.clone(),
            reason: "account deactivated".into(),
        });
        return Err(ApiError::forbidden("Account is deactivated"));
    }

    let now = Utc::now();
    state.store.record_login(user.id, now)?;
    audit(
        &state,
        NewAuditEntry::new(AuditAction::Login, user.organisation_id, user.id),
    );
    SecurityLogger::log_event(SecurityEvent::AuthenticationSuccess {
        user_id: user.id,
        organisation_id: user.organisation_id,
    });

    let mut user = user;
    user.last_login = Some(now);
    Ok(Json(issue_token(&state, user)?))
}

/// Tokens are stateless; logging out only leaves an audit trail.
pub async fn logout(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<serde_json::Value>> {
    audit(
        &state,
        NewAuditEntry::new(AuditAction::Logout, user.organisation_id, user.id),
    );
    Ok(Json(serde_json::json!({ "message": "Logged out" })))
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

pub async fn change_password(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<ChangePasswordRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let hasher = PasswordHasher::new();
    let current_hash = state.store.password_hash(user.id)?;
    if !hasher.verify(&req.current_password, &current_hash) {
        return Err(ApiError::Validation("Current password is incorrect".into()));
    }
    if req.current_password == req.new_password {
        return Err(ApiError::Validation(
            "New password must differ from the current one".into(),
        ));
    }
    validation::validate_password_strength(&req.new_password)?;

    state
        .store
        .update_password(user.id, &hasher.hash(&req.new_password)?)?;
    audit(
        &state,
        NewAuditEntry::new(AuditAction::PasswordChanged, user.organisation_id, user.id),
    );
    Ok(Json(serde_json::json!({ "message": "Password updated" })))
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: User,
    pub organisation: Option<Organisation>,
    pub department: Option<Department>,
    pub is_online: bool,
}

pub async fn me(State(state): State<AppState>, user: CurrentUser) -> ApiResult<Json<MeResponse>> {
    let organisation = state.store.get_organisation(user.organisation_id)?;
    let department = match user.department_id {
        Some(id) => state.store.get_department(id)?,
        None => None,
    };
    Ok(Json(MeResponse {
        is_online: state.hub.is_online(user.id),
        user: user.0,
        organisation,
        department,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub job_title: Option<String>,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub preferences: Option<UserPreferences>,
}

pub async fn update_me(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult<Json<User>> {
    let name = req
        .name
        .as_deref()
        .map(|n| required_text("Name", n))
        .transpose()?;
    if let Some(dob) = req.date_of_birth {
        if dob > Utc::now().date_naive() {
            return Err(ApiError::Validation(
                "Date of birth cannot be in the future".into(),
            ));
        }
    }

    let updated = state.store.update_profile(
        user.id,
        &ProfileUpdate {
            name,
            job_title: req.job_title,
            phone: req.phone,
            bio: req.bio,
            date_of_birth: req.date_of_birth,
            preferences: req.preferences,
        },
    )?;
    Ok(Json(updated))
}
