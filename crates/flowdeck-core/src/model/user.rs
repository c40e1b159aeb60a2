use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

string_enum! {
    /// Roles are global names; a user may hold several.
    RoleName {
        Admin => "Admin",
        Manager => "Manager",
        Member => "Member",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Organisation {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub website: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Department {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub organisation_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub color: String,
    pub organisation_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserPreferences {
    #[serde(default = "UserPreferences::default_theme")]
    pub theme: String,
    #[serde(default = "UserPreferences::default_enabled")]
    pub notifications_enabled: bool,
    #[serde(default = "UserPreferences::default_enabled")]
    pub email_notifications_enabled: bool,
}

impl UserPreferences {
    fn default_theme() -> String {
        "light".to_string()
    }

    fn default_enabled() -> bool {
        true
    }
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            theme: Self::default_theme(),
            notifications_enabled: true,
            email_notifications_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub organisation_id: i64,
    pub department_id: Option<i64>,
    pub roles: Vec<RoleName>,
    pub job_title: Option<String>,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub is_active: bool,
    pub is_email_verified: bool,
    pub preferences: UserPreferences,
    pub annual_leave_quota: i64,
    pub sick_leave_quota: i64,
    pub personal_leave_quota: i64,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn has_role(&self, role: RoleName) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(RoleName::Admin)
    }

    /// Admins count as managers everywhere a manager is required.
    pub fn is_manager(&self) -> bool {
        self.is_admin() || self.has_role(RoleName::Manager)
    }

    pub fn is_birthday_on(&self, date: NaiveDate) -> bool {
        self.date_of_birth
            .map(|dob| dob.month() == date.month() && dob.day() == date.day())
            .unwrap_or(false)
    }

    pub fn age_on(&self, date: NaiveDate) -> Option<i32> {
        let dob = self.date_of_birth?;
        let mut age = date.year() - dob.year();
        if (date.month(), date.day()) < (dob.month(), dob.day()) {
            age -= 1;
        }
        Some(age)
    }

    /// Compact form used in chat payloads and member lists.
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            department_id: self.department_id,
            job_title: self.job_title.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserSummary {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub department_id: Option<i64>,
    pub job_title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OnlineStatus {
    pub user_id: i64,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with(roles: Vec<RoleName>, dob: Option<NaiveDate>) -> User {
        User {
            id: 1,
            email: "a@b.co".into(),
            name: "A".into(),
            organisation_id: 1,
            department_id: None,
            roles,
            job_title: None,
            phone: None,
            bio: None,
            date_of_birth: dob,
            is_active: true,
            is_email_verified: false,
            preferences: UserPreferences::default(),
            annual_leave_quota: 0,
            sick_leave_quota: 0,
            personal_leave_quota: 0,
            last_login: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn admin_is_also_manager() {
        assert!(user_with(vec![RoleName::Admin], None).is_manager());
        assert!(user_with(vec![RoleName::Manager], None).is_manager());
        assert!(!user_with(vec![RoleName::Member], None).is_manager());
    }

    #[test]
    fn age_counts_completed_years() {
        let u = user_with(vec![], NaiveDate::from_ymd_opt(1990, 6, 15));
        assert_eq!(u.age_on(NaiveDate::from_ymd_opt(2020, 6, 14).unwrap()), Some(29));
        assert_eq!(u.age_on(NaiveDate::from_ymd_opt(2020, 6, 15).unwrap()), Some(30));
        assert!(u.is_birthday_on(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()));
    }
}
