use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use flowdeck_core::{
    policy, validation, AuditAction, Deliverable, NewAuditEntry, NewNotification, NotificationKind, SortOrder,
    Tag, Task, TaskComment, TaskCounts, TaskHistory, TaskPriority, TaskQuery, TaskScope, TaskSort,
    TaskStatus, TimeLog, User, UserSummary,
};
use flowdeck_store::{NewTask, NewTimeLog, TaskUpdate};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{audit, double_option, page_params, required_text, tenant_department, Page};
use crate::auth::{deny, require_manager, CurrentUser};
use crate::error::{ApiError, ApiResult};
use crate::services::notify;
use crate::state::AppState;

const HISTORY_LIMIT: u32 = 20;
const BOARD_COLUMN_LIMIT: u32 = 100;

/// Admins see the organisation (optionally one of its departments), managers their department,
/// everyone else the tasks assigned to them.
pub(crate) fn scope_for(
    state: &AppState,
    user: &User,
    department_id: Option<i64>,
) -> ApiResult<TaskScope> {
    if user.is_admin() {
        return match department_id {
            Some(dept) => Ok(TaskScope::Department(tenant_department(state, user, dept)?.id)),
            None => Ok(TaskScope::Organisation(user.organisation_id)),
        };
    }
    Ok(match (user.is_manager(), user.department_id) {
        (true, Some(dept)) => TaskScope::Department(dept),
        _ => TaskScope::AssignedTo(user.id),
    })
}

fn load_task(state: &AppState, user: &User, task_id: i64) -> ApiResult<Task> {
    state
        .store
        .get_task(task_id)?
        .filter(|t| policy::same_tenant(user, t.organisation_id))
        .ok_or_else(|| ApiError::not_found("task", task_id))
}

/// Loads a task the caller may see, with its assignee ids.
fn accessible_task(state: &AppState, user: &User, task_id: i64) -> ApiResult<(Task, Vec<i64>)> {
    let task = load_task(state, user, task_id)?;
    let assignees = state.store.task_assignee_ids(task_id)?;
    if !policy::can_access_task(user, &task, &assignees) {
        return deny(user, "task", "You do not have access to this task");
    }
    Ok((task, assignees))
}

fn check_dates(start: Option<DateTime<Utc>>, due: Option<DateTime<Utc>>) -> ApiResult<()> {
    if let (Some(start), Some(due)) = (start, due) {
        if start > due {
            return Err(ApiError::Validation(
                "Start date cannot be after the due date".into(),
            ));
        }
    }
    Ok(())
}

fn notify_assigned(state: &AppState, actor: &User, task: &Task, user_ids: &[i64]) -> ApiResult<()> {
    let batch = user_ids
        .iter()
        .filter(|&&id| id != actor.id)
        .map(|&id| {
            NewNotification::new(
                id,
                NotificationKind::TaskAssigned,
                "New task assigned",
                format!("{} assigned you to \"{}\"", actor.name, task.title),
            )
            .for_task(task.id)
        })
        .collect();
    notify::notify_many(state, batch)?;
    Ok(())
}

fn notify_status(
    state: &AppState,
    actor: &User,
    task: &Task,
    assignees: &[i64],
    (old, new): (TaskStatus, TaskStatus),
) -> ApiResult<()> {
    let mut recipients: Vec<i64> = assignees.to_vec();
    recipients.push(task.created_by_id);
    recipients.sort_unstable();
    recipients.dedup();
    let batch = recipients
        .into_iter()
        .filter(|&id| id != actor.id)
        .map(|id| {
            NewNotification::new(
                id,
                NotificationKind::TaskUpdated,
                "Task status changed",
                format!("\"{}\" moved from {old} to {new}", task.title),
            )
            .for_task(task.id)
        })
        .collect();
    notify::notify_many(state, batch)?;
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
pub struct ListTasksParams {
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub search: Option<String>,
    pub department_id: Option<i64>,
    pub sort: Option<TaskSort>,
    pub order: Option<SortOrder>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    #[serde(flatten)]
    pub page: Page<Task>,
    pub counts: TaskCounts,
}

pub async fn list_tasks(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(params): Query<ListTasksParams>,
) -> ApiResult<Json<TaskListResponse>> {
    let scope = scope_for(&state, &user, params.department_id)?;
    let (page, per_page) =
        page_params(params.page, params.per_page, state.settings.app.items_per_page);

    let mut query = TaskQuery::new(scope);
    query.status = params.status;
    query.priority = params.priority;
    query.search = params.search.filter(|s| !s.trim().is_empty());
    query.sort = params.sort.unwrap_or_default();
    query.order = params.order.unwrap_or_default();
    query.page = page;
    query.per_page = per_page;

    let (tasks, total) = state.store.list_tasks(&query)?;
    let counts = state.store.task_counts(scope, Utc::now())?;
    Ok(Json(TaskListResponse {
        page: Page::new(tasks, page, per_page, total),
        counts,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub department_id: Option<i64>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub estimated_hours: Option<f64>,
    #[serde(default)]
    pub deliverables: Vec<Deliverable>,
    #[serde(default)]
    pub assignee_ids: Vec<i64>,
    #[serde(default)]
    pub tag_ids: Vec<i64>,
}

pub async fn create_task(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreateTaskRequest>,
) -> ApiResult<(StatusCode, Json<TaskDetail>)> {
    require_manager(&user, "create task")?;
    let title = required_text("Title", &req.title)?;
    check_dates(req.start_date, req.due_date)?;
    if req.estimated_hours.is_some_and(|h| h < 0.0) {
        return Err(ApiError::Validation("Estimated hours cannot be negative".into()));
    }

    let department_id = req.department_id.or(user.department_id);
    if let Some(dept) = department_id {
        tenant_department(&state, &user, dept)?;
    }

    let task = state.store.create_task(&NewTask {
        title,
        description: req.description,
        status: req.status.unwrap_or_default(),
        priority: req.priority.unwrap_or_default(),
        organisation_id: user.organisation_id,
        department_id,
        created_by_id: user.id,
        start_date: req.start_date,
        due_date: req.due_date,
        estimated_hours: req.estimated_hours,
        deliverables: req.deliverables,
        assignee_ids: req.assignee_ids,
        tag_ids: req.tag_ids,
    })?;
    let assignees = state.store.task_assignee_ids(task.id)?;
    notify_assigned(&state, &user, &task, &assignees)?;
    info!(task_id = task.id, created_by = user.id, "Task created");

    Ok((StatusCode::CREATED, Json(task_detail(&state, task)?)))
}

#[derive(Debug, Serialize)]
pub struct TaskDetail {
    pub task: Task,
    pub assignees: Vec<UserSummary>,
    pub tags: Vec<Tag>,
    pub completion_percentage: u8,
    pub is_overdue: bool,
    pub comments: Vec<TaskComment>,
    pub time_logs: Vec<TimeLog>,
    pub history: Vec<TaskHistory>,
}

fn task_detail(state: &AppState, task: Task) -> ApiResult<TaskDetail> {
    Ok(TaskDetail {
        assignees: state
            .store
            .task_assignees(task.id)?
            .iter()
            .map(User::summary)
            .collect(),
        tags: state.store.task_tags(task.id)?,
        completion_percentage: task.completion_percentage(),
        is_overdue: task.is_overdue(Utc::now()),
        comments: state.store.list_comments(task.id)?,
        time_logs: state.store.list_time_logs(task.id)?,
        history: state.store.task_history(task.id, HISTORY_LIMIT)?,
        task,
    })
}

pub async fn get_task(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(task_id): Path<i64>,
) -> ApiResult<Json<TaskDetail>> {
    let (task, _) = accessible_task(&state, &user, task_id)?;
    Ok(Json(task_detail(&state, task)?))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    #[serde(default, deserialize_with = "double_option")]
    pub department_id: Option<Option<i64>>,
    pub start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub estimated_hours: Option<f64>,
    pub deliverables: Option<Vec<Deliverable>>,
    pub assignee_ids: Option<Vec<i64>>,
    pub tag_ids: Option<Vec<i64>>,
}

pub async fn update_task(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(task_id): Path<i64>,
    Json(req): Json<UpdateTaskRequest>,
) -> ApiResult<Json<TaskDetail>> {
    let task = load_task(&state, &user, task_id)?;
    if !policy::can_edit_task(&user, &task) {
        return deny(&user, "task", "You cannot edit this task");
    }
    let title = req
        .title
        .as_deref()
        .map(|t| required_text("Title", t))
        .transpose()?;
    check_dates(
        req.start_date.or(task.start_date),
        req.due_date.or(task.due_date),
    )?;
    if let Some(Some(dept)) = req.department_id {
        state
            .store
            .get_department(dept)?
            .filter(|d| d.organisation_id == user.organisation_id)
            .ok_or_else(|| ApiError::not_found("department", dept))?;
    }

    let outcome = state.store.update_task(
        task_id,
        user.id,
        &TaskUpdate {
            title,
            description: req.description,
            status: req.status,
            priority: req.priority,
            department_id: req.department_id,
            start_date: req.start_date,
            due_date: req.due_date,
            estimated_hours: req.estimated_hours,
            deliverables: req.deliverables,
            assignee_ids: req.assignee_ids,
            tag_ids: req.tag_ids,
        },
    )?;

    if !outcome.added_assignees.is_empty() {
        notify_assigned(&state, &user, &outcome.task, &outcome.added_assignees)?;
    }
    if let Some(change) = outcome.status_change {
        let assignees = state.store.task_assignee_ids(task_id)?;
        notify_status(&state, &user, &outcome.task, &assignees, change)?;
    }
    Ok(Json(task_detail(&state, outcome.task)?))
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: TaskStatus,
}

/// Assignees may move their own tasks; everyone else needs edit rights.
pub async fn change_status(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(task_id): Path<i64>,
    Json(req): Json<StatusRequest>,
) -> ApiResult<Json<Task>> {
    let (task, assignees) = accessible_task(&state, &user, task_id)?;
    if !assignees.contains(&user.id) && !policy::can_edit_task(&user, &task) {
        return deny(&user, "task", "You cannot change the status of this task");
    }
    if let Some(change) = state.store.change_task_status(task_id, user.id, req.status)? {
        notify_status(&state, &user, &task, &assignees, change)?;
    }
    let task = load_task(&state, &user, task_id)?;
    Ok(Json(task))
}

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    pub content: String,
}

pub async fn add_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(task_id): Path<i64>,
    Json(req): Json<CommentRequest>,
) -> ApiResult<(StatusCode, Json<TaskComment>)> {
    let (task, assignees) = accessible_task(&state, &user, task_id)?;
    let content = required_text("Comment", &req.content)?;
    let comment = state.store.add_comment(task_id, user.id, &content)?;

    let mut recipients = assignees;
    recipients.push(task.created_by_id);
    recipients.sort_unstable();
    recipients.dedup();
    let batch = recipients
        .into_iter()
        .filter(|&id| id != user.id)
        .map(|id| {
            NewNotification::new(
                id,
                NotificationKind::CommentAdded,
                "New comment",
                format!("{} commented on \"{}\"", user.name, task.title),
            )
            .for_task(task_id)
        })
        .collect();
    notify::notify_many(&state, batch)?;

    Ok((StatusCode::CREATED, Json(comment)))
}

#[derive(Debug, Deserialize)]
pub struct TimeLogRequest {
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_hours: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
}

pub async fn add_time_log(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(task_id): Path<i64>,
    Json(req): Json<TimeLogRequest>,
) -> ApiResult<(StatusCode, Json<TimeLog>)> {
    accessible_task(&state, &user, task_id)?;
    let start_time = req.start_time.unwrap_or_else(Utc::now);
    let duration_hours = match (req.duration_hours, req.end_time) {
        (Some(hours), _) => hours,
        (None, Some(end)) => TimeLog::duration_between(start_time, end),
        (None, None) => {
            return Err(ApiError::Validation(
                "Either duration_hours or end_time is required".into(),
            ))
        }
    };
    if duration_hours <= 0.0 {
        return Err(ApiError::Validation("Duration must be positive".into()));
    }

    let log = state.store.add_time_log(&NewTimeLog {
        task_id,
        user_id: user.id,
        start_time,
        end_time: req.end_time,
        duration_hours,
        description: req.description,
    })?;
    Ok((StatusCode::CREATED, Json(log)))
}

pub async fn delete_task(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(task_id): Path<i64>,
) -> ApiResult<StatusCode> {
    require_manager(&user, "delete task")?;
    let task = load_task(&state, &user, task_id)?;
    if !policy::can_edit_task(&user, &task) {
        return deny(&user, "task", "You cannot delete this task");
    }
    state.store.delete_task(task_id)?;
    audit(
        &state,
        NewAuditEntry::new(AuditAction::TaskDeleted, user.organisation_id, user.id)
            .entity("task", task_id)
            .details(task.title),
    );
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct Board {
    pub todo: Vec<Task>,
    pub in_progress: Vec<Task>,
    pub done: Vec<Task>,
}

/// Kanban columns for the caller's scope, most urgent first.
pub async fn board(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(params): Query<ListTasksParams>,
) -> ApiResult<Json<Board>> {
    let scope = scope_for(&state, &user, params.department_id)?;
    let column = |status: TaskStatus| -> ApiResult<Vec<Task>> {
        let mut query = TaskQuery::new(scope);
        query.status = Some(status);
        query.priority = params.priority;
        query.sort = TaskSort::Priority;
        query.order = SortOrder::Desc;
        query.per_page = BOARD_COLUMN_LIMIT;
        Ok(state.store.list_tasks(&query)?.0)
    };
    Ok(Json(Board {
        todo: column(TaskStatus::Todo)?,
        in_progress: column(TaskStatus::InProgress)?,
        done: column(TaskStatus::Done)?,
    }))
}

#[derive(Debug, Serialize)]
pub struct AutoAssignResponse {
    pub task_id: i64,
    pub assignee: UserSummary,
}

pub async fn auto_assign(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(task_id): Path<i64>,
) -> ApiResult<Json<AutoAssignResponse>> {
    require_manager(&user, "auto-assign task")?;
    let task = load_task(&state, &user, task_id)?;
    if !policy::can_edit_task(&user, &task) {
        return deny(&user, "task", "You cannot assign this task");
    }
    let department_id = task.department_id.ok_or_else(|| {
        ApiError::Validation("Task has no department to pick an assignee from".into())
    })?;

    let assignee_id = state
        .store
        .assign_least_loaded(department_id, task_id)?
        .ok_or_else(|| ApiError::Conflict("No available user in the department".into()))?;
    notify_assigned(&state, &user, &task, &[assignee_id])?;

    let assignee = state
        .store
        .get_user(assignee_id)?
        .ok_or_else(|| ApiError::not_found("user", assignee_id))?;
    info!(task_id, assignee_id, "Task auto-assigned");
    Ok(Json(AutoAssignResponse {
        task_id,
        assignee: assignee.summary(),
    }))
}

pub async fn list_tags(State(state): State<AppState>, user: CurrentUser) -> ApiResult<Json<Vec<Tag>>> {
    Ok(Json(state.store.list_tags(user.organisation_id)?))
}

#[derive(Debug, Deserialize)]
pub struct TagRequest {
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

pub async fn create_tag(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<TagRequest>,
) -> ApiResult<(StatusCode, Json<Tag>)> {
    require_manager(&user, "create tag")?;
    let name = required_text("Tag name", &req.name)?;
    let color = req
        .color
        .map(|c| c.trim().to_string())
        .unwrap_or_else(|| "#6c757d".to_string());
    validation::validate_hex_color(&color)?;
    let tag = state.store.create_tag(user.organisation_id, &name, &color)?;
    Ok((StatusCode::CREATED, Json(tag)))
}
