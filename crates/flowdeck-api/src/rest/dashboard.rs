use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use flowdeck_core::{Meeting, MeetingView, Notification, Task, UserSummary};
use flowdeck_store::{DailyCount, LabelCount, MeetingFilter, ProductivityStats, UserStats};
use serde::{Deserialize, Serialize};

use super::tasks::scope_for;
use crate::auth::CurrentUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const DASHBOARD_ITEMS: u32 = 5;
const DEFAULT_CALENDAR_SPAN_DAYS: i64 = 30;
const MAX_CALENDAR_SPAN_DAYS: i64 = 366;
const HOLIDAY_COLOR: &str = "#2ecc71";

pub async fn stats(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<UserStats>> {
    Ok(Json(state.store.user_stats(user.id, Utc::now())?))
}

#[derive(Debug, Serialize)]
pub struct Dashboard {
    pub user: UserSummary,
    pub stats: UserStats,
    pub upcoming_meetings: Vec<Meeting>,
    pub open_tasks: Vec<Task>,
    pub recent_notifications: Vec<Notification>,
    pub online_users: usize,
    pub birthdays_today: Vec<UserSummary>,
}

pub async fn dashboard(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Dashboard>> {
    let now = Utc::now();
    let today = now.date_naive();
    let filter = MeetingFilter {
        view: MeetingView::Upcoming,
        per_page: DASHBOARD_ITEMS,
        ..MeetingFilter::default()
    };
    let (upcoming_meetings, _) = state.store.list_meetings_for(&user, &filter, now)?;
    let birthdays_today = state
        .store
        .list_users(user.organisation_id)?
        .iter()
        .filter(|u| u.is_active && u.is_birthday_on(today))
        .map(|u| u.summary())
        .collect();

    Ok(Json(Dashboard {
        user: user.summary(),
        stats: state.store.user_stats(user.id, now)?,
        upcoming_meetings,
        open_tasks: state.store.open_tasks_for(user.id, DASHBOARD_ITEMS)?,
        recent_notifications: state
            .store
            .list_notifications(user.id, false, DASHBOARD_ITEMS)?,
        online_users: state.hub.online_user_ids(user.organisation_id).len(),
        birthdays_today,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalyticsParams {
    pub days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct Analytics {
    pub period_days: Option<i64>,
    pub productivity: ProductivityStats,
    pub by_status: Vec<LabelCount>,
    pub by_priority: Vec<LabelCount>,
    pub daily: Vec<DailyCount>,
    pub department_completion: Option<f64>,
}

/// `days` limits productivity totals to tasks created in that window; absent means all time.
pub async fn analytics(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(params): Query<AnalyticsParams>,
) -> ApiResult<Json<Analytics>> {
    let now = Utc::now();
    let period_days = match params.days {
        Some(days) if days <= 0 => {
            return Err(ApiError::Validation("days must be positive".into()))
        }
        other => other,
    };
    let since = period_days.map(|days| now - Duration::days(days));
    let department_completion = match user.department_id {
        Some(dept) => Some(state.store.department_completion(dept)?),
        None => None,
    };

    Ok(Json(Analytics {
        period_days,
        productivity: state.store.productivity_stats(user.id, since, now)?,
        by_status: state.store.task_breakdown(user.id, false)?,
        by_priority: state.store.task_breakdown(user.id, true)?,
        daily: state.store.daily_task_counts(user.id, now)?,
        department_completion,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct CalendarParams {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub start: String,
    pub color: &'static str,
    pub all_day: bool,
    pub kind: &'static str,
}

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

fn calendar_window(
    params: &CalendarParams,
    today: NaiveDate,
) -> ApiResult<(NaiveDate, NaiveDate)> {
    let span = Duration::days(DEFAULT_CALENDAR_SPAN_DAYS);
    let start = params.start.unwrap_or(today - span);
    let end = params.end.unwrap_or(today + span);
    if end < start {
        return Err(ApiError::Validation("end must not be before start".into()));
    }
    if (end - start).num_days() > MAX_CALENDAR_SPAN_DAYS {
        return Err(ApiError::Validation(format!(
            "Calendar range cannot exceed {MAX_CALENDAR_SPAN_DAYS} days"
        )));
    }
    Ok((start, end))
}

/// Task due dates in the caller's scope plus active holidays.
pub async fn calendar_events(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(params): Query<CalendarParams>,
) -> ApiResult<Json<Vec<CalendarEvent>>> {
    let (start, end) = calendar_window(&params, Utc::now().date_naive())?;
    let tasks = state.store.tasks_due_between(
        scope_for(&state, &user, None)?,
        day_start(start),
        day_start(end + Duration::days(1)) - Duration::seconds(1),
    )?;

    let mut events: Vec<CalendarEvent> = tasks
        .into_iter()
        .filter_map(|task| {
            let due = task.due_date?;
            Some(CalendarEvent {
                id: format!("task-{}", task.id),
                title: task.title,
                start: due.to_rfc3339(),
                color: task.priority.calendar_color(),
                all_day: false,
                kind: "task",
            })
        })
        .collect();
    events.extend(
        state
            .store
            .holidays_between(user.organisation_id, start, end)?
            .into_iter()
            .map(|holiday| CalendarEvent {
                id: format!("holiday-{}", holiday.id),
                title: holiday.name,
                start: holiday.date.to_string(),
                color: HOLIDAY_COLOR,
                all_day: true,
                kind: "holiday",
            }),
    );
    Ok(Json(events))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn calendar_defaults_to_a_month_either_side() {
        let (start, end) = calendar_window(&CalendarParams::default(), date("2026-03-15")).unwrap();
        assert_eq!(start, date("2026-02-13"));
        assert_eq!(end, date("2026-04-14"));
    }

    #[test]
    fn calendar_rejects_inverted_and_oversized_ranges() {
        let inverted = CalendarParams {
            start: Some(date("2026-03-10")),
            end: Some(date("2026-03-01")),
        };
        assert!(calendar_window(&inverted, date("2026-03-15")).is_err());

        let huge = CalendarParams {
            start: Some(date("2024-01-01")),
            end: Some(date("2026-01-01")),
        };
        assert!(calendar_window(&huge, date("2026-03-15")).is_err());
    }
}
