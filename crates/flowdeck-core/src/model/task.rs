use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

string_enum! {
    TaskStatus {
        Todo => "todo",
        InProgress => "in_progress",
        Done => "done",
        Archived => "archived",
    }
}

impl TaskStatus {
    pub fn rank(&self) -> u8 {
        match self {
            TaskStatus::Todo => 1,
            TaskStatus::InProgress => 2,
            TaskStatus::Done => 3,
            TaskStatus::Archived => 4,
        }
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Todo
    }
}

string_enum! {
    TaskPriority {
        Low => "low",
        Medium => "medium",
        High => "high",
        Urgent => "urgent",
    }
}

impl TaskPriority {
    /// Higher is more urgent.
    pub fn rank(&self) -> u8 {
        match self {
            TaskPriority::Urgent => 4,
            TaskPriority::High => 3,
            TaskPriority::Medium => 2,
            TaskPriority::Low => 1,
        }
    }

    /// Calendar colour for events derived from tasks.
    pub fn calendar_color(&self) -> &'static str {
        match self {
            TaskPriority::Urgent => "#e74c3c",
            TaskPriority::High => "#e67e22",
            TaskPriority::Medium => "#f39c12",
            TaskPriority::Low => "#3498db",
        }
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Medium
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Deliverable {
    pub title: String,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub organisation_id: i64,
    pub department_id: Option<i64>,
    pub created_by_id: i64,
    pub start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub completed_date: Option<DateTime<Utc>>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: f64,
    pub deliverables: Vec<Deliverable>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Share of completed deliverables, truncated to a whole percent.
    ///
    /// A task without deliverables is either finished (100) or not (0).
    pub fn completion_percentage(&self) -> u8 {
        if self.deliverables.is_empty() {
            return if self.status == TaskStatus::Done { 100 } else { 0 };
        }
        let completed = self.deliverables.iter().filter(|d| d.completed).count();
        ((completed * 100) / self.deliverables.len()) as u8
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        match self.due_date {
            Some(due) => due < now && self.status != TaskStatus::Done,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskComment {
    pub id: i64,
    pub task_id: i64,
    pub user_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeLog {
    pub id: i64,
    pub task_id: i64,
    pub user_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_hours: f64,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TimeLog {
    pub fn duration_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
        (end - start).num_seconds() as f64 / 3600.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskHistory {
    pub id: i64,
    pub task_id: i64,
    pub user_id: i64,
    pub action: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub const HISTORY_STATUS_CHANGED: &str = "status_changed";

string_enum! {
    TaskSort {
        DueDate => "due_date",
        Priority => "priority",
        Status => "status",
        Title => "title",
        Created => "created",
    }
}

impl Default for TaskSort {
    fn default() -> Self {
        TaskSort::DueDate
    }
}

string_enum! {
    SortOrder {
        Asc => "asc",
        Desc => "desc",
    }
}

impl Default for SortOrder {
    fn default() -> Self {
        SortOrder::Asc
    }
}

/// Which slice of the organisation's tasks a listing covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskScope {
    Organisation(i64),
    Department(i64),
    AssignedTo(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskQuery {
    pub scope: TaskScope,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub search: Option<String>,
    pub sort: TaskSort,
    pub order: SortOrder,
    pub page: u32,
    pub per_page: u32,
}

impl TaskQuery {
    pub fn new(scope: TaskScope) -> Self {
        Self {
            scope,
            status: None,
            priority: None,
            search: None,
            sort: TaskSort::default(),
            order: SortOrder::default(),
            page: 1,
            per_page: 20,
        }
    }

    pub fn offset(&self) -> i64 {
        super::page_offset(self.page, self.per_page)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskCounts {
    pub total: i64,
    pub todo: i64,
    pub in_progress: i64,
    pub done: i64,
    pub overdue: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn task(status: TaskStatus, deliverables: Vec<Deliverable>) -> Task {
        let now = Utc::now();
        Task {
            id: 1,
            title: "t".into(),
            description: None,
            status,
            priority: TaskPriority::Medium,
            organisation_id: 1,
            department_id: None,
            created_by_id: 1,
            start_date: None,
            due_date: None,
            completed_date: None,
            estimated_hours: None,
            actual_hours: 0.0,
            deliverables,
            created_at: now,
            updated_at: now,
        }
    }

    fn d(done: bool) -> Deliverable {
        Deliverable { title: "x".into(), completed: done }
    }

    #[test]
    fn completion_without_deliverables_follows_status() {
        assert_eq!(task(TaskStatus::Done, vec![]).completion_percentage(), 100);
        assert_eq!(task(TaskStatus::InProgress, vec![]).completion_percentage(), 0);
    }

    #[test]
    fn completion_truncates() {
        let t = task(TaskStatus::Todo, vec![d(true), d(false), d(false)]);
        assert_eq!(t.completion_percentage(), 33);
    }

    #[test]
    fn overdue_ignores_done_tasks() {
        let now = Utc::now();
        let mut t = task(TaskStatus::Todo, vec![]);
        t.due_date = Some(now - Duration::hours(1));
        assert!(t.is_overdue(now));
        t.status = TaskStatus::Done;
        assert!(!t.is_overdue(now));
    }

    #[test]
    fn query_offset_starts_at_page_one() {
        let mut q = TaskQuery::new(TaskScope::AssignedTo(3));
        assert_eq!(q.offset(), 0);
        q.page = 3;
        assert_eq!(q.offset(), 40);
    }
}
