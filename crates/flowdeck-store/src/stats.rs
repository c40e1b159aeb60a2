use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::Store;

/// Counters for a user's own dashboard.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserStats {
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub in_progress_tasks: i64,
    pub todo_tasks: i64,
    pub overdue_tasks: i64,
    pub unread_notifications: i64,
    pub unread_messages: i64,
    /// Percent of assigned tasks that are done, two decimals.
    pub completion_rate: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProductivityStats {
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub in_progress_tasks: i64,
    pub overdue_tasks: i64,
    pub total_hours: f64,
    pub avg_hours_per_task: f64,
    pub completion_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LabelCount {
    pub label: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub completed: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DepartmentStats {
    pub department_id: i64,
    pub name: String,
    pub total_users: i64,
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub completion_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Performer {
    pub user_id: i64,
    pub name: String,
    pub completed_tasks: i64,
    pub total_tasks: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OrgOverview {
    pub total_users: i64,
    pub total_departments: i64,
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub in_progress_tasks: i64,
    pub departments: Vec<DepartmentStats>,
    pub top_performers: Vec<Performer>,
}

fn percent(part: i64, whole: i64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    ((part as f64 / whole as f64) * 10_000.0).round() / 100.0
}

impl Store {
    pub fn user_stats(&self, user_id: i64, now: DateTime<Utc>) -> Result<UserStats> {
        self.with_conn(|conn| {
            let mut stats = conn.query_row(
                "SELECT COUNT(*),
                    COALESCE(SUM(t.status = 'done'), 0),
                    COALESCE(SUM(t.status = 'in_progress'), 0),
                    COALESCE(SUM(t.status = 'todo'), 0),
                    COALESCE(SUM(t.due_date IS NOT NULL AND t.due_date < ?2 AND t.status != 'done'), 0),
                    (SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0),
                    (SELECT COUNT(*) FROM messages WHERE recipient_id = ?1 AND is_read = 0)
                 FROM tasks t JOIN task_assignees ta ON ta.task_id = t.id
                 WHERE ta.user_id = ?1",
                params![user_id, now],
                |row| {
                    Ok(UserStats {
                        total_tasks: row.get(0)?,
                        completed_tasks: row.get(1)?,
                        in_progress_tasks: row.get(2)?,
                        todo_tasks: row.get(3)?,
                        overdue_tasks: row.get(4)?,
                        unread_notifications: row.get(5)?,
                        unread_messages: row.get(6)?,
                        completion_rate: 0.0,
                    })
                },
            )?;
            stats.completion_rate = percent(stats.completed_tasks, stats.total_tasks);
            Ok(stats)
        })
    }

    /// Totals over tasks assigned to the user, optionally only those created since `since`.
    pub fn productivity_stats(
        &self,
        user_id: i64,
        since: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<ProductivityStats> {
        self.with_conn(|conn| {
            let mut stats = conn.query_row(
                "SELECT COUNT(*),
                    COALESCE(SUM(t.status = 'done'), 0),
                    COALESCE(SUM(t.status = 'in_progress'), 0),
                    COALESCE(SUM(t.due_date IS NOT NULL AND t.due_date < ?3 AND t.status != 'done'), 0),
                    COALESCE(SUM(t.actual_hours), 0.0),
                    COALESCE(AVG(t.actual_hours), 0.0)
                 FROM tasks t JOIN task_assignees ta ON ta.task_id = t.id
                 WHERE ta.user_id = ?1 AND (?2 IS NULL OR t.created_at >= ?2)",
                params![user_id, since, now],
                |row| {
                    Ok(ProductivityStats {
                        total_tasks: row.get(0)?,
                        completed_tasks: row.get(1)?,
                        in_progress_tasks: row.get(2)?,
                        overdue_tasks: row.get(3)?,
                        total_hours: row.get(4)?,
                        avg_hours_per_task: row.get(5)?,
                        completion_rate: 0.0,
                    })
                },
            )?;
            stats.completion_rate = percent(stats.completed_tasks, stats.total_tasks);
            Ok(stats)
        })
    }

    /// Assigned tasks grouped by `status` or `priority`.
    pub fn task_breakdown(&self, user_id: i64, by_priority: bool) -> Result<Vec<LabelCount>> {
        let column = if by_priority { "t.priority" } else { "t.status" };
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {column}, COUNT(*) FROM tasks t
                 JOIN task_assignees ta ON ta.task_id = t.id
                 WHERE ta.user_id = ?1 GROUP BY {column} ORDER BY {column}"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![user_id], |row| {
                Ok(LabelCount {
                    label: row.get(0)?,
                    count: row.get(1)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Per-day totals for assigned tasks created in the last 30 days, newest first.
    pub fn daily_task_counts(&self, user_id: i64, now: DateTime<Utc>) -> Result<Vec<DailyCount>> {
        let since = now - Duration::days(30);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT substr(t.created_at, 1, 10) AS day,
                    COALESCE(SUM(t.status = 'done'), 0), COUNT(*)
                 FROM tasks t JOIN task_assignees ta ON ta.task_id = t.id
                 WHERE ta.user_id = ?1 AND t.created_at >= ?2
                 GROUP BY day ORDER BY day DESC",
            )?;
            let rows = stmt.query_map(params![user_id, since], |row| {
                Ok(DailyCount {
                    date: row.get(0)?,
                    completed: row.get(1)?,
                    total: row.get(2)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Percent of the department's tasks that are done, two decimals.
    pub fn department_completion(&self, department_id: i64) -> Result<f64> {
        self.with_conn(|conn| {
            let (done, total): (i64, i64) = conn.query_row(
                "SELECT COALESCE(SUM(status = 'done'), 0), COUNT(*) FROM tasks WHERE department_id = ?1",
                params![department_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(percent(done, total))
        })
    }

    pub fn org_overview(&self, organisation_id: i64) -> Result<OrgOverview> {
        self.with_conn(|conn| {
            let mut overview = conn.query_row(
                "SELECT
                    (SELECT COUNT(*) FROM users WHERE organisation_id = ?1 AND is_active = 1),
                    (SELECT COUNT(*) FROM departments WHERE organisation_id = ?1),
                    COUNT(*),
                    COALESCE(SUM(status = 'done'), 0),
                    COALESCE(SUM(status = 'in_progress'), 0)
                 FROM tasks WHERE organisation_id = ?1",
                params![organisation_id],
                |row| {
                    Ok(OrgOverview {
                        total_users: row.get(0)?,
                        total_departments: row.get(1)?,
                        total_tasks: row.get(2)?,
                        completed_tasks: row.get(3)?,
                        in_progress_tasks: row.get(4)?,
                        ..OrgOverview::default()
                    })
                },
            )?;

            let mut stmt = conn.prepare(
                "SELECT d.id, d.name,
                    (SELECT COUNT(*) FROM users u WHERE u.department_id = d.id AND u.is_active = 1),
                    (SELECT COUNT(*) FROM tasks t WHERE t.department_id = d.id),
                    (SELECT COUNT(*) FROM tasks t WHERE t.department_id = d.id AND t.status = 'done')
                 FROM departments d WHERE d.organisation_id = ?1 ORDER BY d.name",
            )?;
            let rows = stmt.query_map(params![organisation_id], |row| {
                let total_tasks: i64 = row.get(3)?;
                let completed_tasks: i64 = row.get(4)?;
                Ok(DepartmentStats {
                    department_id: row.get(0)?,
                    name: row.get(1)?,
                    total_users: row.get(2)?,
                    total_tasks,
                    completed_tasks,
                    completion_rate: percent(completed_tasks, total_tasks),
                })
            })?;
            overview.departments = rows.collect::<rusqlite::Result<Vec<_>>>()?;

            let mut stmt = conn.prepare(
                "SELECT u.id, u.name, COALESCE(SUM(t.status = 'done'), 0), COUNT(t.id)
                 FROM users u
                 JOIN task_assignees ta ON ta.user_id = u.id
                 JOIN tasks t ON t.id = ta.task_id
                 WHERE u.organisation_id = ?1 AND u.is_active = 1
                 GROUP BY u.id
                 ORDER BY 3 DESC, 4 ASC, u.id ASC
                 LIMIT 10",
            )?;
            let rows = stmt.query_map(params![organisation_id], |row| {
                Ok(Performer {
                    user_id: row.get(0)?,
                    name: row.get(1)?,
                    completed_tasks: row.get(2)?,
                    total_tasks: row.get(3)?,
                })
            })?;
            overview.top_performers = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(overview)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::percent;

    #[test]
    fn percent_rounds_to_two_decimals() {
        assert_eq!(percent(1, 3), 33.33);
        assert_eq!(percent(2, 3), 66.67);
        assert_eq!(percent(0, 0), 0.0);
    }
}
