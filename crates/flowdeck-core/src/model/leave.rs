use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FlowDeckError, Result};
use crate::model::user::User;

string_enum! {
    LeaveType {
        Annual => "annual",
        Vacation => "vacation",
        Sick => "sick",
        Personal => "personal",
        Casual => "casual",
        Emergency => "emergency",
    }
}

/// The per-user quota a leave type draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaBucket {
    Annual,
    Sick,
    Personal,
}

impl QuotaBucket {
    pub fn quota_for(&self, user: &User) -> i64 {
        match self {
            QuotaBucket::Annual => user.annual_leave_quota,
            QuotaBucket::Sick => user.sick_leave_quota,
            QuotaBucket::Personal => user.personal_leave_quota,
        }
    }

    pub fn leave_types(&self) -> &'static [LeaveType] {
        match self {
            QuotaBucket::Annual => &[LeaveType::Annual, LeaveType::Vacation],
            QuotaBucket::Sick => &[LeaveType::Sick],
            QuotaBucket::Personal => &[LeaveType::Personal, LeaveType::Casual],
        }
    }
}

impl LeaveType {
    /// Emergency leave is not capped by any quota.
    pub fn bucket(&self) -> Option<QuotaBucket> {
        match self {
            LeaveType::Annual | LeaveType::Vacation => Some(QuotaBucket::Annual),
            LeaveType::Sick => Some(QuotaBucket::Sick),
            LeaveType::Personal | LeaveType::Casual => Some(QuotaBucket::Personal),
            LeaveType::Emergency => None,
        }
    }
}

string_enum! {
    LeaveStatus {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaveRequest {
    pub id: i64,
    pub user_id: i64,
    pub leave_type: LeaveType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_days: i64,
    pub reason: Option<String>,
    pub status: LeaveStatus,
    pub approved_by_id: Option<i64>,
    pub approval_notes: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl LeaveRequest {
    /// Inclusive day count between two dates.
    pub fn calculate_days(start: NaiveDate, end: NaiveDate) -> Result<i64> {
        if end < start {
            return Err(FlowDeckError::validation(
                "Leave end date cannot be before the start date",
            ));
        }
        Ok((end - start).num_days() + 1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaveBalance {
    pub bucket: QuotaBucket,
    pub quota: i64,
    pub approved: i64,
    pub pending: i64,
}

impl LeaveBalance {
    pub fn remaining(&self) -> i64 {
        self.quota - self.approved - self.pending
    }

    /// Why `days` more cannot be taken, if they cannot. Pending requests count against the
    /// balance so a user cannot stack requests past the quota.
    pub fn refusal(&self, days: i64) -> Option<String> {
        (days > self.remaining()).then(|| {
            format!(
                "Requested {days} day(s) but only {} remain in the {:?} quota",
                self.remaining().max(0),
                self.bucket
            )
        })
    }

    pub fn ensure_can_take(&self, days: i64) -> Result<()> {
        match self.refusal(days) {
            Some(reason) => Err(FlowDeckError::validation(reason)),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Holiday {
    pub id: i64,
    pub name: String,
    pub date: NaiveDate,
    pub holiday_type: String,
    pub description: Option<String>,
    pub organisation_id: Option<i64>,
    pub is_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn day_count_is_inclusive() {
        assert_eq!(LeaveRequest::calculate_days(date(2025, 3, 3), date(2025, 3, 3)).unwrap(), 1);
        assert_eq!(LeaveRequest::calculate_days(date(2025, 3, 3), date(2025, 3, 7)).unwrap(), 5);
        assert!(LeaveRequest::calculate_days(date(2025, 3, 7), date(2025, 3, 3)).is_err());
    }

    #[test]
    fn balance_counts_pending_days() {
        let balance = LeaveBalance {
            bucket: QuotaBucket::Annual,
            quota: 10,
            approved: 4,
            pending: 3,
        };
        assert_eq!(balance.remaining(), 3);
        assert!(balance.ensure_can_take(3).is_ok());
        assert!(balance.ensure_can_take(4).is_err());
    }

    #[test]
    fn emergency_leave_has_no_bucket() {
        assert_eq!(LeaveType::Emergency.bucket(), None);
        assert_eq!(LeaveType::Casual.bucket(), Some(QuotaBucket::Personal));
    }
}
