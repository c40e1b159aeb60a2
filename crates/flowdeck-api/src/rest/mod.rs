//! JSON handlers mounted under `/api/v1`.

pub mod admin;
pub mod auth;
pub mod chat;
pub mod dashboard;
pub mod health;
pub mod leave;
pub mod meetings;
pub mod notifications;
pub mod tasks;
pub mod users;

use std::collections::HashMap;

use flowdeck_core::{Department, NewAuditEntry, User, UserSummary};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub const MAX_PER_PAGE: u32 = 100;

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
    pub pages: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, page: u32, per_page: u32, total: i64) -> Self {
        let per_page = per_page.max(1);
        let pages = (total + i64::from(per_page) - 1) / i64::from(per_page);
        Self {
            items,
            page,
            per_page,
            total,
            pages,
        }
    }
}

pub fn page_params(page: Option<u32>, per_page: Option<u32>, default: u32) -> (u32, u32) {
    (
        page.unwrap_or(1).max(1),
        per_page.unwrap_or(default).clamp(1, MAX_PER_PAGE),
    )
}

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`).
pub fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

pub fn required_text(field: &str, value: &str) -> ApiResult<String> {
    Ok(flowdeck_core::validation::required(field, value)?.to_string())
}

/// Loads a user of the caller's organisation; other tenants look like missing rows.
pub fn tenant_user(state: &AppState, actor: &User, user_id: i64) -> ApiResult<User> {
    state
        .store
        .get_user(user_id)?
        .filter(|u| u.organisation_id == actor.organisation_id)
        .ok_or_else(|| ApiError::not_found("user", user_id))
}

/// Loads a department of the caller's organisation; other tenants look like missing rows.
pub fn tenant_department(state: &AppState, actor: &User, department_id: i64) -> ApiResult<Department> {
    state
        .store
        .get_department(department_id)?
        .filter(|d| d.organisation_id == actor.organisation_id)
        .ok_or_else(|| ApiError::not_found("department", department_id))
}

pub fn user_directory(state: &AppState, organisation_id: i64) -> ApiResult<HashMap<i64, User>> {
    Ok(state
        .store
        .list_users(organisation_id)?
        .into_iter()
        .map(|u| (u.id, u))
        .collect())
}

pub fn summaries(directory: &HashMap<i64, User>, ids: &[i64]) -> Vec<UserSummary> {
    ids.iter()
        .filter_map(|id| directory.get(id).map(User::summary))
        .collect()
}

/// Audit failures are logged, never surfaced to the caller.
pub fn audit(state: &AppState, entry: NewAuditEntry) {
    if let Err(e) = state.store.record_audit(&entry) {
        warn!(action = %entry.action, error = %e, "Could not write audit entry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_counts_round_up() {
        let page: Page<u8> = Page::new(vec![], 1, 20, 41);
        assert_eq!(page.pages, 3);
        assert_eq!(Page::<u8>::new(vec![], 1, 20, 0).pages, 0);
    }

    #[test]
    fn page_params_are_clamped() {
        assert_eq!(page_params(None, None, 20), (1, 20));
        assert_eq!(page_params(Some(0), Some(1000), 20), (1, MAX_PER_PAGE));
    }

    #[derive(Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "double_option")]
        department_id: Option<Option<i64>>,
    }

    #[test]
    fn double_option_keeps_explicit_null() {
        let absent: Patch = serde_json::from_str("{}").unwrap();
        let cleared: Patch = serde_json::from_str(r#"{"department_id": null}"#).unwrap();
        let set: Patch = serde_json::from_str(r#"{"department_id": 4}"#).unwrap();
        assert_eq!(absent.department_id, None);
        assert_eq!(cleared.department_id, Some(None));
        assert_eq!(set.department_id, Some(Some(4)));
    }
}
