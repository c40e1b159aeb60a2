use chrono::{Datelike, NaiveDate, Utc};
use flowdeck_core::{
    Holiday, LeaveBalance, LeaveRequest, LeaveStatus, LeaveType, QuotaBucket, User,
};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{parse_column, Result, StoreError};
use crate::organisations::get_user_conn;
use crate::Store;

#[derive(Debug, Clone)]
pub struct NewLeaveRequest {
    pub user_id: i64,
    pub leave_type: LeaveType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_days: i64,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewHoliday {
    pub name: String,
    pub date: NaiveDate,
    pub holiday_type: String,
    pub description: Option<String>,
    /// `None` makes the holiday visible to every organisation.
    pub organisation_id: Option<i64>,
}

const LEAVE_COLUMNS: &str = "l.id, l.user_id, l.leave_type, l.start_date, l.end_date,
    l.total_days, l.reason, l.status, l.approved_by_id, l.approval_notes, l.reviewed_at,
    l.created_at";

fn map_leave(row: &Row<'_>) -> rusqlite::Result<LeaveRequest> {
    Ok(LeaveRequest {
        id: row.get(0)?,
        user_id: row.get(1)?,
        leave_type: parse_column(2, row.get(2)?)?,
        start_date: row.get(3)?,
        end_date: row.get(4)?,
        total_days: row.get(5)?,
        reason: row.get(6)?,
        status: parse_column(7, row.get(7)?)?,
        approved_by_id: row.get(8)?,
        approval_notes: row.get(9)?,
        reviewed_at: row.get(10)?,
        created_at: row.get(11)?,
    })
}

fn map_holiday(row: &Row<'_>) -> rusqlite::Result<Holiday> {
    Ok(Holiday {
        id: row.get(0)?,
        name: row.get(1)?,
        date: row.get(2)?,
        holiday_type: row.get(3)?,
        description: row.get(4)?,
        organisation_id: row.get(5)?,
        is_active: row.get(6)?,
    })
}

fn get_leave_conn(conn: &Connection, id: i64) -> Result<Option<LeaveRequest>> {
    let sql = format!("SELECT {LEAVE_COLUMNS} FROM leave_requests l WHERE l.id = ?1");
    Ok(conn.query_row(&sql, params![id], map_leave).optional()?)
}

fn year_bounds(year: i32) -> Result<(NaiveDate, NaiveDate)> {
    let start = NaiveDate::from_ymd_opt(year, 1, 1);
    let end = NaiveDate::from_ymd_opt(year, 12, 31);
    start
        .zip(end)
        .ok_or_else(|| StoreError::InvalidOperation(format!("year {year} is out of range")))
}

fn days_used_conn(conn: &Connection, user_id: i64, bucket: QuotaBucket, year: i32) -> Result<(i64, i64)> {
    let (first, last) = year_bounds(year)?;
    let types: Vec<&str> = bucket.leave_types().iter().map(|t| t.as_str()).collect();
    let placeholders = (0..types.len())
        .map(|i| format!("?{}", i + 4))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT
            COALESCE(SUM(CASE WHEN status = 'approved' THEN total_days END), 0),
            COALESCE(SUM(CASE WHEN status = 'pending' THEN total_days END), 0)
         FROM leave_requests
         WHERE user_id = ?1 AND start_date >= ?2 AND start_date <= ?3
           AND leave_type IN ({placeholders})"
    );
    let mut args: Vec<&dyn rusqlite::ToSql> = vec![&user_id, &first, &last];
    args.extend(types.iter().map(|t| t as &dyn rusqlite::ToSql));
    Ok(conn.query_row(&sql, args.as_slice(), |row| Ok((row.get(0)?, row.get(1)?)))?)
}

impl Store {
    /// Inserts a pending request. Quota-bearing types are checked against the approved and
    /// pending days of the start year in the same transaction, so concurrent requests cannot
    /// overdraw the balance.
    pub fn create_leave_request(&self, new: &NewLeaveRequest) -> Result<LeaveRequest> {
        self.with_tx(|tx| {
            if let Some(bucket) = new.leave_type.bucket() {
                let user = get_user_conn(tx, new.user_id)?
                    .ok_or_else(|| StoreError::not_found("user", new.user_id))?;
                let (approved, pending) =
                    days_used_conn(tx, new.user_id, bucket, new.start_date.year())?;
                let balance = LeaveBalance {
                    bucket,
                    quota: bucket.quota_for(&user),
                    approved,
                    pending,
                };
                if let Some(reason) = balance.refusal(new.total_days) {
                    return Err(StoreError::InvalidOperation(reason));
                }
            }
            tx.execute(
                "INSERT INTO leave_requests (user_id, leave_type, start_date, end_date, total_days,
                    reason, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7)",
                params![
                    new.user_id,
                    new.leave_type.as_str(),
                    new.start_date,
                    new.end_date,
                    new.total_days,
                    new.reason,
                    Utc::now()
                ],
            )?;
            let id = tx.last_insert_rowid();
            get_leave_conn(tx, id)?.ok_or_else(|| StoreError::not_found("leave request", id))
        })
    }

    pub fn get_leave_request(&self, id: i64) -> Result<Option<LeaveRequest>> {
        self.with_conn(|conn| get_leave_conn(conn, id))
    }

    /// Newest first.
    pub fn leave_requests_for(&self, user_id: i64) -> Result<Vec<LeaveRequest>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {LEAVE_COLUMNS} FROM leave_requests l
                 WHERE l.user_id = ?1 ORDER BY l.created_at DESC, l.id DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![user_id], map_leave)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Pending requests `reviewer` may decide: the whole organisation for admins,
    /// their department for managers. Never the reviewer's own.
    pub fn pending_leave_for_reviewer(&self, reviewer: &User) -> Result<Vec<LeaveRequest>> {
        if !reviewer.is_manager() {
            return Ok(Vec::new());
        }
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {LEAVE_COLUMNS} FROM leave_requests l
                 JOIN users u ON u.id = l.user_id
                 WHERE l.status = 'pending' AND u.organisation_id = ?1 AND l.user_id != ?2
                   AND (?3 OR (u.department_id IS NOT NULL AND u.department_id = ?4))
                 ORDER BY l.created_at ASC, l.id ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params![
                    reviewer.organisation_id,
                    reviewer.id,
                    reviewer.is_admin(),
                    reviewer.department_id
                ],
                map_leave,
            )?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Approves or rejects a pending request.
    pub fn review_leave(
        &self,
        id: i64,
        reviewer_id: i64,
        decision: LeaveStatus,
        notes: Option<&str>,
    ) -> Result<LeaveRequest> {
        if decision == LeaveStatus::Pending {
            return Err(StoreError::InvalidOperation(
                "a review must approve or reject".into(),
            ));
        }
        self.with_tx(|tx| {
            let request =
                get_leave_conn(tx, id)?.ok_or_else(|| StoreError::not_found("leave request", id))?;
            if request.status != LeaveStatus::Pending {
                return Err(StoreError::Conflict(format!(
                    "leave request {id} was already {}",
                    request.status
                )));
            }
            tx.execute(
                "UPDATE leave_requests SET status = ?2, approved_by_id = ?3, approval_notes = ?4,
                    reviewed_at = ?5
                 WHERE id = ?1",
                params![id, decision.as_str(), reviewer_id, notes, Utc::now()],
            )?;
            get_leave_conn(tx, id)?.ok_or_else(|| StoreError::not_found("leave request", id))
        })
    }

    /// `(approved, pending)` days in `bucket` for requests starting in `year`.
    pub fn leave_days_used(&self, user_id: i64, bucket: QuotaBucket, year: i32) -> Result<(i64, i64)> {
        self.with_conn(|conn| days_used_conn(conn, user_id, bucket, year))
    }

    pub fn leave_balance(&self, user: &User, bucket: QuotaBucket, year: i32) -> Result<LeaveBalance> {
        let (approved, pending) = self.leave_days_used(user.id, bucket, year)?;
        Ok(LeaveBalance {
            bucket,
            quota: bucket.quota_for(user),
            approved,
            pending,
        })
    }

    pub fn create_holiday(&self, new: &NewHoliday) -> Result<Holiday> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO holidays (name, date, holiday_type, description, organisation_id, is_active)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1)",
                params![
                    new.name,
                    new.date,
                    new.holiday_type,
                    new.description,
                    new.organisation_id
                ],
            )?;
            Ok(Holiday {
                id: conn.last_insert_rowid(),
                name: new.name.clone(),
                date: new.date,
                holiday_type: new.holiday_type.clone(),
                description: new.description.clone(),
                organisation_id: new.organisation_id,
                is_active: true,
            })
        })
    }

    /// Active holidays of the organisation (and global ones) within `[start, end]`.
    pub fn holidays_between(
        &self,
        organisation_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Holiday>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, date, holiday_type, description, organisation_id, is_active
                 FROM holidays
                 WHERE is_active = 1 AND (organisation_id IS NULL OR organisation_id = ?1)
                   AND date >= ?2 AND date <= ?3
                 ORDER BY date",
            )?;
            let rows = stmt.query_map(params![organisation_id, start, end], map_holiday)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }
}
