use chrono::{DateTime, Utc};
use flowdeck_core::{
    Deliverable, SortOrder, Tag, Task, TaskComment, TaskCounts, TaskHistory, TaskPriority,
    TaskQuery, TaskScope, TaskSort, TaskStatus, TimeLog, User, HISTORY_STATUS_CHANGED,
};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};

use crate::error::{conflict_on_unique, json_column, parse_column, Result, StoreError};
use crate::organisations::{map_user, USER_COLUMNS};
use crate::{like_pattern, Store};

#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub organisation_id: i64,
    pub department_id: Option<i64>,
    pub created_by_id: i64,
    pub start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub estimated_hours: Option<f64>,
    pub deliverables: Vec<Deliverable>,
    pub assignee_ids: Vec<i64>,
    pub tag_ids: Vec<i64>,
}

/// Partial edit of a task. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub department_id: Option<Option<i64>>,
    pub start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub estimated_hours: Option<f64>,
    pub deliverables: Option<Vec<Deliverable>>,
    pub assignee_ids: Option<Vec<i64>>,
    pub tag_ids: Option<Vec<i64>>,
}

#[derive(Debug, Clone)]
pub struct TaskUpdateOutcome {
    pub task: Task,
    /// `(old, new)` when the status actually changed.
    pub status_change: Option<(TaskStatus, TaskStatus)>,
    pub added_assignees: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct NewTimeLog {
    pub task_id: i64,
    pub user_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_hours: f64,
    pub description: Option<String>,
}

const TASK_COLUMNS: &str = "t.id, t.title, t.description, t.status, t.priority, t.organisation_id,
    t.department_id, t.created_by_id, t.start_date, t.due_date, t.completed_date,
    t.estimated_hours, t.actual_hours, t.deliverables, t.created_at, t.updated_at";

fn map_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        status: parse_column(3, row.get(3)?)?,
        priority: parse_column(4, row.get(4)?)?,
        organisation_id: row.get(5)?,
        department_id: row.get(6)?,
        created_by_id: row.get(7)?,
        start_date: row.get(8)?,
        due_date: row.get(9)?,
        completed_date: row.get(10)?,
        estimated_hours: row.get(11)?,
        actual_hours: row.get(12)?,
        deliverables: json_column(13, row.get(13)?)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

fn map_comment(row: &Row<'_>) -> rusqlite::Result<TaskComment> {
    Ok(TaskComment {
        id: row.get(0)?,
        task_id: row.get(1)?,
        user_id: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn map_time_log(row: &Row<'_>) -> rusqlite::Result<TimeLog> {
    Ok(TimeLog {
        id: row.get(0)?,
        task_id: row.get(1)?,
        user_id: row.get(2)?,
        start_time: row.get(3)?,
        end_time: row.get(4)?,
        duration_hours: row.get(5)?,
        description: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// `(clause, id)` restricting `tasks t` to a scope; the id binds to `?1`.
pub(crate) fn scope_clause(scope: TaskScope) -> (&'static str, i64) {
    match scope {
        TaskScope::Organisation(id) => ("t.organisation_id = ?1", id),
        TaskScope::Department(id) => ("t.department_id = ?1", id),
        TaskScope::AssignedTo(id) => (
            "EXISTS (SELECT 1 FROM task_assignees ta WHERE ta.task_id = t.id AND ta.user_id = ?1)",
            id,
        ),
    }
}

fn rank_case(column: &str, ranks: impl Iterator<Item = (&'static str, u8)>) -> String {
    let arms: String = ranks
        .map(|(text, rank)| format!(" WHEN '{text}' THEN {rank}"))
        .collect();
    format!("CASE {column}{arms} ELSE 0 END")
}

fn order_clause(sort: TaskSort, order: SortOrder) -> String {
    let dir = match order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    };
    let key = match sort {
        TaskSort::DueDate => format!("t.due_date IS NULL, t.due_date {dir}"),
        TaskSort::Priority => format!(
            "{} {dir}",
            rank_case("t.priority", TaskPriority::ALL.iter().map(|p| (p.as_str(), p.rank())))
        ),
        TaskSort::Status => format!(
            "{} {dir}",
            rank_case("t.status", TaskStatus::ALL.iter().map(|s| (s.as_str(), s.rank())))
        ),
        TaskSort::Title => format!("t.title COLLATE NOCASE {dir}"),
        TaskSort::Created => format!("t.created_at {dir}"),
    };
    format!("{key}, t.id {dir}")
}

pub(crate) fn get_task_conn(conn: &Connection, id: i64) -> Result<Option<Task>> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks t WHERE t.id = ?1");
    Ok(conn.query_row(&sql, params![id], map_task).optional()?)
}

fn assignee_ids_conn(conn: &Connection, task_id: i64) -> Result<Vec<i64>> {
    let mut stmt =
        conn.prepare("SELECT user_id FROM task_assignees WHERE task_id = ?1 ORDER BY user_id")?;
    let rows = stmt.query_map(params![task_id], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<i64>>>()?)
}

/// Assigns users of the task's own tenant; ids from other tenants are ignored.
fn add_assignees(conn: &Connection, task: &Task, user_ids: &[i64], now: DateTime<Utc>) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO task_assignees (task_id, user_id, assigned_at)
         SELECT ?1, id, ?3 FROM users WHERE id = ?2 AND organisation_id = ?4",
    )?;
    let mut added = Vec::new();
    for &user_id in user_ids {
        if stmt.execute(params![task.id, user_id, now, task.organisation_id])? > 0 {
            added.push(user_id);
        }
    }
    Ok(added)
}

fn replace_tags(conn: &Connection, task: &Task, tag_ids: &[i64]) -> Result<()> {
    conn.execute("DELETE FROM task_tags WHERE task_id = ?1", params![task.id])?;
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO task_tags (task_id, tag_id)
         SELECT ?1, id FROM tags WHERE id = ?2 AND organisation_id = ?3",
    )?;
    for &tag_id in tag_ids {
        stmt.execute(params![task.id, tag_id, task.organisation_id])?;
    }
    Ok(())
}

/// Moves a task to `new`, stamping `completed_date` and writing history. `None` if unchanged.
fn change_status_conn(
    conn: &Connection,
    task: &Task,
    actor_id: i64,
    new: TaskStatus,
    now: DateTime<Utc>,
) -> Result<Option<(TaskStatus, TaskStatus)>> {
    if task.status == new {
        return Ok(None);
    }
    conn.execute(
        "UPDATE tasks SET status = ?2,
            completed_date = CASE WHEN ?2 = 'done' THEN COALESCE(completed_date, ?3) ELSE NULL END,
            updated_at = ?3
         WHERE id = ?1",
        params![task.id, new.as_str(), now],
    )?;
    conn.execute(
        "INSERT INTO task_history (task_id, user_id, action, old_value, new_value, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            task.id,
            actor_id,
            HISTORY_STATUS_CHANGED,
            task.status.as_str(),
            new.as_str(),
            now
        ],
    )?;
    Ok(Some((task.status, new)))
}

impl Store {
    pub fn create_task(&self, new: &NewTask) -> Result<Task> {
        let deliverables = serde_json::to_string(&new.deliverables)?;
        self.with_tx(|tx| {
            let now = Utc::now();
            let completed = (new.status == TaskStatus::Done).then_some(now);
            tx.execute(
                "INSERT INTO tasks (title, description, status, priority, organisation_id,
                    department_id, created_by_id, start_date, due_date, completed_date,
                    estimated_hours, actual_hours, deliverables, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, ?12, ?13, ?13)",
                params![
                    new.title,
                    new.description,
                    new.status.as_str(),
                    new.priority.as_str(),
                    new.organisation_id,
                    new.department_id,
                    new.created_by_id,
                    new.start_date,
                    new.due_date,
                    completed,
                    new.estimated_hours,
                    deliverables,
                    now
                ],
            )?;
            let id = tx.last_insert_rowid();
            let task = get_task_conn(tx, id)?.ok_or_else(|| StoreError::not_found("task", id))?;
            add_assignees(tx, &task, &new.assignee_ids, now)?;
            replace_tags(tx, &task, &new.tag_ids)?;
            Ok(task)
        })
    }

    pub fn get_task(&self, id: i64) -> Result<Option<Task>> {
        self.with_conn(|conn| get_task_conn(conn, id))
    }

    /// One page of tasks plus the total number of matches.
    pub fn list_tasks(&self, query: &TaskQuery) -> Result<(Vec<Task>, i64)> {
        let (scope, scope_id) = scope_clause(query.scope);
        let filter = format!(
            "{scope}
             AND (?2 IS NULL OR t.status = ?2)
             AND (?3 IS NULL OR t.priority = ?3)
             AND (?4 IS NULL OR t.title LIKE ?4 ESCAPE '\\' OR t.description LIKE ?4 ESCAPE '\\')"
        );
        let status = query.status.map(|s| s.as_str());
        let priority = query.priority.map(|p| p.as_str());
        let search = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(like_pattern);

        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM tasks t WHERE {filter}"),
                params![scope_id, status, priority, search],
                |row| row.get(0),
            )?;

            let sql = format!(
                "SELECT {TASK_COLUMNS} FROM tasks t WHERE {filter}
                 ORDER BY {} LIMIT ?5 OFFSET ?6",
                order_clause(query.sort, query.order)
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params![scope_id, status, priority, search, query.per_page, query.offset()],
                map_task,
            )?;
            Ok((rows.collect::<rusqlite::Result<Vec<_>>>()?, total))
        })
    }

    pub fn task_counts(&self, scope: TaskScope, now: DateTime<Utc>) -> Result<TaskCounts> {
        let (clause, scope_id) = scope_clause(scope);
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT COUNT(*),
                    COALESCE(SUM(t.status = 'todo'), 0),
                    COALESCE(SUM(t.status = 'in_progress'), 0),
                    COALESCE(SUM(t.status = 'done'), 0),
                    COALESCE(SUM(t.due_date IS NOT NULL AND t.due_date < ?2 AND t.status != 'done'), 0)
                 FROM tasks t WHERE {clause}"
            );
            Ok(conn.query_row(&sql, params![scope_id, now], |row| {
                Ok(TaskCounts {
                    total: row.get(0)?,
                    todo: row.get(1)?,
                    in_progress: row.get(2)?,
                    done: row.get(3)?,
                    overdue: row.get(4)?,
                })
            })?)
        })
    }

    /// Tasks in scope whose due date falls in `[start, end]`.
    pub fn tasks_due_between(
        &self,
        scope: TaskScope,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Task>> {
        let (clause, scope_id) = scope_clause(scope);
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {TASK_COLUMNS} FROM tasks t
                 WHERE {clause} AND t.due_date IS NOT NULL AND t.due_date >= ?2 AND t.due_date <= ?3
                 ORDER BY t.due_date"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![scope_id, start, end], map_task)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Open tasks assigned to a user, soonest due first.
    pub fn open_tasks_for(&self, user_id: i64, limit: u32) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {TASK_COLUMNS} FROM tasks t
                 JOIN task_assignees ta ON ta.task_id = t.id
                 WHERE ta.user_id = ?1 AND t.status IN ('todo', 'in_progress')
                 ORDER BY t.due_date IS NULL, t.due_date ASC LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![user_id, limit], map_task)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    pub fn update_task(
        &self,
        task_id: i64,
        actor_id: i64,
        update: &TaskUpdate,
    ) -> Result<TaskUpdateOutcome> {
        let deliverables = update
            .deliverables
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.with_tx(|tx| {
            let now = Utc::now();
            let task =
                get_task_conn(tx, task_id)?.ok_or_else(|| StoreError::not_found("task", task_id))?;

            tx.execute(
                "UPDATE tasks SET
                    title = COALESCE(?2, title),
                    description = COALESCE(?3, description),
                    priority = COALESCE(?4, priority),
                    start_date = COALESCE(?5, start_date),
                    due_date = COALESCE(?6, due_date),
                    estimated_hours = COALESCE(?7, estimated_hours),
                    deliverables = COALESCE(?8, deliverables),
                    updated_at = ?9
                 WHERE id = ?1",
                params![
                    task_id,
                    update.title,
                    update.description,
                    update.priority.map(|p| p.as_str()),
                    update.start_date,
                    update.due_date,
                    update.estimated_hours,
                    deliverables,
                    now
                ],
            )?;

            if let Some(department_id) = update.department_id {
                tx.execute(
                    "UPDATE tasks SET department_id = ?2 WHERE id = ?1",
                    params![task_id, department_id],
                )?;
            }

            let status_change = match update.status {
                Some(status) => change_status_conn(tx, &task, actor_id, status, now)?,
                None => None,
            };

            let mut added_assignees = Vec::new();
            if let Some(wanted) = &update.assignee_ids {
                let current = assignee_ids_conn(tx, task_id)?;
                for removed in current.iter().filter(|id| !wanted.contains(id)) {
                    tx.execute(
                        "DELETE FROM task_assignees WHERE task_id = ?1 AND user_id = ?2",
                        params![task_id, removed],
                    )?;
                }
                let fresh: Vec<i64> = wanted
                    .iter()
                    .copied()
                    .filter(|id| !current.contains(id))
                    .collect();
                added_assignees = add_assignees(tx, &task, &fresh, now)?;
            }

            if let Some(tag_ids) = &update.tag_ids {
                replace_tags(tx, &task, tag_ids)?;
            }

            let task =
                get_task_conn(tx, task_id)?.ok_or_else(|| StoreError::not_found("task", task_id))?;
            Ok(TaskUpdateOutcome {
                task,
                status_change,
                added_assignees,
            })
        })
    }

    /// Sets the status alone. Returns `(old, new)` when it changed.
    pub fn change_task_status(
        &self,
        task_id: i64,
        actor_id: i64,
        status: TaskStatus,
    ) -> Result<Option<(TaskStatus, TaskStatus)>> {
        self.with_tx(|tx| {
            let task =
                get_task_conn(tx, task_id)?.ok_or_else(|| StoreError::not_found("task", task_id))?;
            change_status_conn(tx, &task, actor_id, status, Utc::now())
        })
    }

    pub fn delete_task(&self, task_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            if conn.execute("DELETE FROM tasks WHERE id = ?1", params![task_id])? == 0 {
                return Err(StoreError::not_found("task", task_id));
            }
            Ok(())
        })
    }

    pub fn task_assignee_ids(&self, task_id: i64) -> Result<Vec<i64>> {
        self.with_conn(|conn| assignee_ids_conn(conn, task_id))
    }

    pub fn task_assignees(&self, task_id: i64) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {USER_COLUMNS} FROM users u
                 JOIN task_assignees ta ON ta.user_id = u.id
                 WHERE ta.task_id = ?1 ORDER BY u.name"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![task_id], map_user)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Assigns the active department member with the fewest open tasks.
    pub fn assign_least_loaded(&self, department_id: i64, task_id: i64) -> Result<Option<i64>> {
        self.with_tx(|tx| {
            let task =
                get_task_conn(tx, task_id)?.ok_or_else(|| StoreError::not_found("task", task_id))?;
            let candidate: Option<i64> = tx
                .query_row(
                    "SELECT u.id FROM users u
                     LEFT JOIN task_assignees ta ON ta.user_id = u.id
                     LEFT JOIN tasks t ON t.id = ta.task_id AND t.status NOT IN ('done', 'archived')
                     WHERE u.department_id = ?1 AND u.is_active = 1
                       AND u.id NOT IN (SELECT user_id FROM task_assignees WHERE task_id = ?2)
                     GROUP BY u.id
                     ORDER BY COUNT(t.id) ASC, u.id ASC
                     LIMIT 1",
                    params![department_id, task_id],
                    |row| row.get(0),
                )
                .optional()?;
            match candidate {
                Some(user_id) => {
                    add_assignees(tx, &task, &[user_id], Utc::now())?;
                    Ok(Some(user_id))
                }
                None => Ok(None),
            }
        })
    }

    pub fn add_comment(&self, task_id: i64, user_id: i64, content: &str) -> Result<TaskComment> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO task_comments (task_id, user_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![task_id, user_id, content, Utc::now()],
            )?;
            let id = conn.last_insert_rowid();
            Ok(conn.query_row(
                "SELECT id, task_id, user_id, content, created_at FROM task_comments WHERE id = ?1",
                params![id],
                map_comment,
            )?)
        })
    }

    pub fn list_comments(&self, task_id: i64) -> Result<Vec<TaskComment>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, task_id, user_id, content, created_at FROM task_comments
                 WHERE task_id = ?1 ORDER BY created_at, id",
            )?;
            let rows = stmt.query_map(params![task_id], map_comment)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Records time and refreshes the task's `actual_hours` total.
    pub fn add_time_log(&self, new: &NewTimeLog) -> Result<TimeLog> {
        if new.duration_hours <= 0.0 {
            return Err(StoreError::InvalidOperation(
                "time log duration must be positive".into(),
            ));
        }
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO time_logs (task_id, user_id, start_time, end_time, duration_hours,
                    description, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    new.task_id,
                    new.user_id,
                    new.start_time,
                    new.end_time,
                    new.duration_hours,
                    new.description,
                    Utc::now()
                ],
            )?;
            let id = tx.last_insert_rowid();
            tx.execute(
                "UPDATE tasks SET actual_hours =
                    (SELECT COALESCE(SUM(duration_hours), 0) FROM time_logs WHERE task_id = ?1)
                 WHERE id = ?1",
                params![new.task_id],
            )?;
            Ok(tx.query_row(
                "SELECT id, task_id, user_id, start_time, end_time, duration_hours, description,
                    created_at FROM time_logs WHERE id = ?1",
                params![id],
                map_time_log,
            )?)
        })
    }

    pub fn list_time_logs(&self, task_id: i64) -> Result<Vec<TimeLog>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, task_id, user_id, start_time, end_time, duration_hours, description,
                    created_at FROM time_logs WHERE task_id = ?1 ORDER BY start_time DESC",
            )?;
            let rows = stmt.query_map(params![task_id], map_time_log)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    pub fn task_history(&self, task_id: i64, limit: u32) -> Result<Vec<TaskHistory>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, task_id, user_id, action, old_value, new_value, created_at
                 FROM task_history WHERE task_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![task_id, limit], |row| {
                Ok(TaskHistory {
                    id: row.get(0)?,
                    task_id: row.get(1)?,
                    user_id: row.get(2)?,
                    action: row.get(3)?,
                    old_value: row.get(4)?,
                    new_value: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    pub fn create_tag(&self, organisation_id: i64, name: &str, color: &str) -> Result<Tag> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tags (name, color, organisation_id) VALUES (?1, ?2, ?3)",
                params![name, color, organisation_id],
            )
            .map_err(|e| conflict_on_unique(e, "A tag with this name already exists"))?;
            Ok(Tag {
                id: conn.last_insert_rowid(),
                name: name.to_string(),
                color: color.to_string(),
                organisation_id,
            })
        })
    }

    pub fn list_tags(&self, organisation_id: i64) -> Result<Vec<Tag>> {
        self.tags_where("organisation_id = ?1", &[&organisation_id])
    }

    pub fn task_tags(&self, task_id: i64) -> Result<Vec<Tag>> {
        self.tags_where(
            "id IN (SELECT tag_id FROM task_tags WHERE task_id = ?1)",
            &[&task_id],
        )
    }

    fn tags_where(&self, clause: &str, args: &[&dyn ToSql]) -> Result<Vec<Tag>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT id, name, color, organisation_id FROM tags WHERE {clause} ORDER BY name"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(args, |row| {
                Ok(Tag {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    color: row.get(2)?,
                    organisation_id: row.get(3)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }
}
