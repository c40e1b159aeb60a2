use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHash, PasswordHasher as _, PasswordVerifier,
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::model::RoleName;

#[derive(Error, Debug)]
pub enum SecurityError {
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Token expired or invalid")]
    InvalidToken,
    #[error("Token generation failed: {0}")]
    TokenGeneration(String),
    #[error("Cryptographic operation failed: {0}")]
    CryptographicFailure(String),
}

/// Argon2id hashing with a fresh random salt per password.
#[derive(Default)]
pub struct PasswordHasher {
    argon2: Argon2<'static>,
}

impl PasswordHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hash(&self, password: &str) -> Result<String, SecurityError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| SecurityError::CryptographicFailure(e.to_string()))?;
        Ok(hash.to_string())
    }

    /// A malformed stored hash verifies as `false` rather than erroring.
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => self
                .argon2
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }
}

/// The identity carried by a bearer token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthContext {
    pub user_id: i64,
    pub organisation_id: i64,
    pub department_id: Option<i64>,
    pub roles: Vec<RoleName>,
    pub session_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AuthContext {
    pub fn is_admin(&self) -> bool {
        self.roles.contains(&RoleName::Admin)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    org: i64,
    dept: Option<i64>,
    roles: Vec<RoleName>,
    sid: String,
    iat: i64,
    exp: i64,
}

pub struct JwtManager {
    secret: SecretString,
    expiry: Duration,
}

impl JwtManager {
    pub fn new(secret: SecretString, expiry_hours: u64) -> Self {
        Self {
            secret,
            expiry: Duration::hours(expiry_hours as i64),
        }
    }

    /// Builds a fresh context for a user that just authenticated.
    pub fn context_for(
        &self,
        user_id: i64,
        organisation_id: i64,
        department_id: Option<i64>,
        roles: Vec<RoleName>,
    ) -> AuthContext {
        let now = Utc::now();
        AuthContext {
            user_id,
            organisation_id,
            department_id,
            roles,
            session_id: Uuid::new_v4().to_string(),
            issued_at: now,
            expires_at: now + self.expiry,
        }
    }

    pub fn create_token(&self, ctx: &AuthContext) -> Result<String, SecurityError> {
        let claims = Claims {
            sub: ctx.user_id.to_string(),
            org: ctx.organisation_id,
            dept: ctx.department_id,
            roles: ctx.roles.clone(),
            sid: ctx.session_id.clone(),
            iat: ctx.issued_at.timestamp(),
            exp: ctx.expires_at.timestamp(),
        };
        let key = EncodingKey::from_secret(self.secret.expose_secret().as_bytes());
        encode(&Header::new(Algorithm::HS256), &claims, &key)
            .map_err(|e| SecurityError::TokenGeneration(e.to_string()))
    }

    pub fn validate_token(&self, token: &str) -> Result<AuthContext, SecurityError> {
        let key = DecodingKey::from_secret(self.secret.expose_secret().as_bytes());
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        let data =
            decode::<Claims>(token, &key, &validation).map_err(|_| SecurityError::InvalidToken)?;
        let claims = data.claims;

        Ok(AuthContext {
            user_id: claims.sub.parse().map_err(|_| SecurityError::InvalidToken)?,
            organisation_id: claims.org,
            department_id: claims.dept,
            roles: claims.roles,
            session_id: claims.sid,
            issued_at: DateTime::from_timestamp(claims.iat, 0).unwrap_or_default(),
            expires_at: DateTime::from_timestamp(claims.exp, 0).unwrap_or_default(),
        })
    }
}

/// Security event logging
#[derive(Debug, Clone)]
pub enum SecurityEvent {
    AuthenticationFailure {
        email: String,
        reason: String,
    },
    AuthenticationSuccess {
        user_id: i64,
        organisation_id: i64,
    },
    PermissionDenied {
        user_id: i64,
        resource: String,
        action: String,
    },
    RateLimited {
        key: String,
    },
    AdminAccess {
        user_id: i64,
        action: String,
        resource: String,
    },
}

pub struct SecurityLogger;

impl SecurityLogger {
    pub fn log_event(event: SecurityEvent) {
        use tracing::{info, warn};

        match event {
            SecurityEvent::AuthenticationFailure { email, reason } => {
                warn!(email = %email, reason = %reason, "Authentication failure");
            }
            SecurityEvent::AuthenticationSuccess {
                user_id,
                organisation_id,
            } => {
                info!(user_id, organisation_id, "Authentication success");
            }
            SecurityEvent::PermissionDenied {
                user_id,
                resource,
                action,
            } => {
                warn!(user_id, resource = %resource, action = %action, "Permission denied");
            }
            SecurityEvent::RateLimited { key } => {
                warn!(key = %key, "Rate limit exceeded");
            }
            SecurityEvent::AdminAccess {
                user_id,
                action,
                resource,
            } => {
                info!(user_id, action = %action, resource = %resource, "Admin access");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> JwtManager {
        JwtManager::new(
            SecretString::from("test-secret-that-is-long-enough-for-hs256"),
            24,
        )
    }

    #[test]
    fn hash_and_verify() {
        let hasher = PasswordHasher::new();
        let hash = hasher.hash("S3cure!Pass").unwrap();
        assert!(hasher.verify("S3cure!Pass", &hash));
        assert!(!hasher.verify("wrong", &hash));
        assert!(!hasher.verify("S3cure!Pass", "not-a-hash"));
    }

    #[test]
    fn token_round_trip_keeps_identity() {
        let jwt = manager();
        let ctx = jwt.context_for(7, 3, Some(2), vec![RoleName::Manager]);
        let token = jwt.create_token(&ctx).unwrap();
        let decoded = jwt.validate_token(&token).unwrap();
        assert_eq!(decoded.user_id, 7);
        assert_eq!(decoded.organisation_id, 3);
        assert_eq!(decoded.department_id, Some(2));
        assert_eq!(decoded.roles, vec![RoleName::Manager]);
        assert_eq!(decoded.session_id, ctx.session_id);
    }

    #[test]
    fn token_from_other_secret_is_rejected() {
        let other = JwtManager::new(SecretString::from("another-secret-that-is-also-long-enough"), 1);
        let token = other
            .create_token(&other.context_for(1, 1, None, vec![]))
            .unwrap();
        assert!(matches!(
            manager().validate_token(&token),
            Err(SecurityError::InvalidToken)
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let jwt = manager();
        let mut ctx = jwt.context_for(1, 1, None, vec![]);
        ctx.issued_at = Utc::now() - Duration::hours(3);
        ctx.expires_at = Utc::now() - Duration::hours(2);
        let token = jwt.create_token(&ctx).unwrap();
        assert!(jwt.validate_token(&token).is_err());
    }
}
