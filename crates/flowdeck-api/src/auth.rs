use std::ops::Deref;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use flowdeck_core::{SecurityError, SecurityEvent, SecurityLogger, User};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// The authenticated caller, loaded fresh from the store on every request.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl Deref for CurrentUser {
    type Target = User;

    fn deref(&self) -> &User {
        &self.0
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(ApiError::Unauthorized)
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Resolves a token to an active user of the organisation it was issued for.
pub fn authenticate(state: &AppState, token: &str) -> ApiResult<User> {
    let ctx = state.jwt.validate_token(token)?;
    let user = state
        .store
        .get_user(ctx.user_id)?
        .filter(|u| u.organisation_id == ctx.organisation_id)
        .ok_or(ApiError::from(SecurityError::InvalidToken))?;
    if !user.is_active {
        return Err(ApiError::forbidden("Account is deactivated"));
    }
    Ok(user)
}

pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(req.headers()).ok_or(ApiError::Unauthorized)?;
    let user = authenticate(&state, token)?;
    req.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(req).await)
}

pub fn require_admin(user: &User, action: &str) -> ApiResult<()> {
    if user.is_admin() {
        return Ok(());
    }
    deny(user, action, "Administrator access required")
}

pub fn require_manager(user: &User, action: &str) -> ApiResult<()> {
    if user.is_manager() {
        return Ok(());
    }
    deny(user, action, "Manager access required")
}

/// Logs the refusal and returns a 403.
pub fn deny<T>(user: &User, action: &str, message: &str) -> ApiResult<T> {
    SecurityLogger::log_event(SecurityEvent::PermissionDenied {
        user_id: user.id,
        resource: action.to_string(),
        action: message.to_string(),
    });
    Err(ApiError::forbidden(message))
}

pub async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let sensitive = {
        let path = req.uri().path();
        path.contains("/auth/") || path.contains("/admin/")
    };
    let mut response = next.run(req).await;

    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    if sensitive {
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
        );
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_requires_scheme() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }
}
