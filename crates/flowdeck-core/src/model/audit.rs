use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

string_enum! {
    AuditAction {
        Register => "register",
        Login => "login",
        Logout => "logout",
        PasswordChanged => "password_changed",
        UserCreated => "user_created",
        UserUpdated => "user_updated",
        UserDeactivated => "user_deactivated",
        DepartmentCreated => "department_created",
        TaskDeleted => "task_deleted",
        LeaveReviewed => "leave_reviewed",
        QuotaUpdated => "quota_updated",
        HolidayCreated => "holiday_created",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditLog {
    pub id: i64,
    pub organisation_id: Option<i64>,
    pub user_id: Option<i64>,
    pub action: AuditAction,
    pub entity_type: Option<String>,
    pub entity_id: Option<i64>,
    pub details: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub organisation_id: Option<i64>,
    pub user_id: Option<i64>,
    pub action: AuditAction,
    pub entity_type: Option<String>,
    pub entity_id: Option<i64>,
    pub details: Option<String>,
    pub ip_address: Option<String>,
}

impl NewAuditEntry {
    pub fn new(action: AuditAction, organisation_id: i64, user_id: i64) -> Self {
        Self {
            organisation_id: Some(organisation_id),
            user_id: Some(user_id),
            action,
            entity_type: None,
            entity_id: None,
            details: None,
            ip_address: None,
        }
    }

    pub fn entity(mut self, entity_type: &str, entity_id: i64) -> Self {
        self.entity_type = Some(entity_type.to_string());
        self.entity_id = Some(entity_id);
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}
