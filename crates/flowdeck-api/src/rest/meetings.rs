use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use flowdeck_core::{
    policy, AgendaItem, AttendanceResponse, Meeting, MeetingAttendee, MeetingNote,
    MeetingPriority, MeetingStatus, MeetingType, MeetingView, NewNotification, NoteType,
    NotificationKind, ResponseStats, User, UserSummary,
};
use flowdeck_store::{MeetingFilter, MeetingUpdate, NewAgendaItem, NewMeeting};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{page_params, required_text, summaries, user_directory, Page};
use crate::auth::{deny, CurrentUser};
use crate::error::{ApiError, ApiResult};
use crate::services::notify;
use crate::state::AppState;

fn load_meeting(state: &AppState, user: &User, meeting_id: i64) -> ApiResult<Meeting> {
    state
        .store
        .get_meeting(meeting_id)?
        .filter(|m| policy::same_tenant(user, m.organisation_id))
        .ok_or_else(|| ApiError::not_found("meeting", meeting_id))
}

fn visible_meeting(
    state: &AppState,
    user: &User,
    meeting_id: i64,
) -> ApiResult<(Meeting, Vec<MeetingAttendee>)> {
    let meeting = load_meeting(state, user, meeting_id)?;
    let attendees = state.store.meeting_attendees(meeting_id)?;
    if !policy::can_access_meeting(user, &meeting, &attendees) {
        return deny(user, "meeting", "You do not have access to this meeting");
    }
    Ok((meeting, attendees))
}

fn editable_meeting(state: &AppState, user: &User, meeting_id: i64) -> ApiResult<Meeting> {
    let meeting = load_meeting(state, user, meeting_id)?;
    if !policy::can_edit_meeting(user, &meeting) {
        return deny(user, "meeting", "Only the organizer can change this meeting");
    }
    Ok(meeting)
}

fn notify_attendees(
    state: &AppState,
    meeting: &Meeting,
    user_ids: impl IntoIterator<Item = i64>,
    kind: NotificationKind,
    title: &str,
    message: String,
) -> ApiResult<()> {
    let batch = user_ids
        .into_iter()
        .filter(|&id| id != meeting.organizer_id)
        .map(|id| {
            NewNotification::new(id, kind, title, message.clone())
                .with_action_url(format!("/meetings/{}", meeting.id))
        })
        .collect();
    notify::notify_many(state, batch)?;
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
pub struct ListMeetingsParams {
    pub view: Option<MeetingView>,
    pub status: Option<MeetingStatus>,
    #[serde(rename = "type")]
    pub meeting_type: Option<MeetingType>,
    pub search: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

pub async fn list_meetings(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(params): Query<ListMeetingsParams>,
) -> ApiResult<Json<Page<Meeting>>> {
    let (page, per_page) =
        page_params(params.page, params.per_page, state.settings.app.items_per_page);
    let filter = MeetingFilter {
        view: params.view.unwrap_or_default(),
        status: params.status,
        meeting_type: params.meeting_type,
        search: params.search.filter(|s| !s.trim().is_empty()),
        page,
        per_page,
    };
    let (meetings, total) = state.store.list_meetings_for(&user, &filter, Utc::now())?;
    Ok(Json(Page::new(meetings, page, per_page, total)))
}

#[derive(Debug, Deserialize)]
pub struct AgendaItemRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub duration_minutes: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMeetingRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub meeting_type: Option<MeetingType>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub meeting_link: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub priority: Option<MeetingPriority>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub department_id: Option<i64>,
    #[serde(default)]
    pub task_id: Option<i64>,
    #[serde(default)]
    pub attendee_ids: Vec<i64>,
    #[serde(default)]
    pub agenda: Vec<AgendaItemRequest>,
}

pub async fn create_meeting(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreateMeetingRequest>,
) -> ApiResult<(StatusCode, Json<MeetingDetail>)> {
    let title = required_text("Title", &req.title)?;
    Meeting::validate_window(req.start_time, req.end_time)?;
    let agenda = req
        .agenda
        .into_iter()
        .filter(|item| !item.title.trim().is_empty())
        .map(|item| NewAgendaItem {
            title: item.title.trim().to_string(),
            description: item.description,
            duration_minutes: item.duration_minutes,
        })
        .collect();

    let meeting = state.store.create_meeting(&NewMeeting {
        title,
        description: req.description,
        meeting_type: req.meeting_type.unwrap_or_default(),
        location: req.location,
        meeting_link: req.meeting_link,
        start_time: req.start_time,
        end_time: req.end_time,
        priority: req.priority.unwrap_or_default(),
        is_private: req.is_private,
        organisation_id: user.organisation_id,
        department_id: req.department_id.or(user.department_id),
        task_id: req.task_id,
        organizer_id: user.id,
        attendee_ids: req.attendee_ids,
        agenda,
    })?;

    let invited: Vec<i64> = state
        .store
        .meeting_attendees(meeting.id)?
        .iter()
        .map(|a| a.user_id)
        .collect();
    notify_attendees(
        &state,
        &meeting,
        invited,
        NotificationKind::MeetingInvitation,
        "Meeting invitation",
        format!(
            "{} invited you to \"{}\" on {}",
            user.name,
            meeting.title,
            meeting.start_time.format("%Y-%m-%d %H:%M UTC")
        ),
    )?;
    info!(meeting_id = meeting.id, organizer = user.id, "Meeting created");

    Ok((StatusCode::CREATED, Json(meeting_detail(&state, &user, meeting)?)))
}

#[derive(Debug, Serialize)]
pub struct AttendeeView {
    #[serde(flatten)]
    pub attendance: MeetingAttendee,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct MeetingDetail {
    pub meeting: Meeting,
    pub organizer: Option<UserSummary>,
    pub attendees: Vec<AttendeeView>,
    pub agenda: Vec<AgendaItem>,
    pub notes: Vec<MeetingNote>,
    pub response_stats: ResponseStats,
    pub duration_minutes: i64,
    pub can_edit: bool,
}

fn meeting_detail(state: &AppState, user: &User, meeting: Meeting) -> ApiResult<MeetingDetail> {
    let directory = user_directory(state, meeting.organisation_id)?;
    let attendees = state.store.meeting_attendees(meeting.id)?;
    let response_stats = ResponseStats::from_attendees(&attendees);
    Ok(MeetingDetail {
        organizer: summaries(&directory, &[meeting.organizer_id]).pop(),
        attendees: attendees
            .into_iter()
            .map(|a| AttendeeView {
                name: directory
                    .get(&a.user_id)
                    .map(|u| u.name.clone())
                    .unwrap_or_default(),
                attendance: a,
            })
            .collect(),
        agenda: state.store.meeting_agenda(meeting.id)?,
        notes: state.store.meeting_notes(meeting.id)?,
        response_stats,
        duration_minutes: meeting.duration_minutes(),
        can_edit: policy::can_edit_meeting(user, &meeting),
        meeting,
    })
}

pub async fn get_meeting(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(meeting_id): Path<i64>,
) -> ApiResult<Json<MeetingDetail>> {
    let (meeting, _) = visible_meeting(&state, &user, meeting_id)?;
    Ok(Json(meeting_detail(&state, &user, meeting)?))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateMeetingRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub meeting_type: Option<MeetingType>,
    pub location: Option<String>,
    pub meeting_link: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: Option<MeetingStatus>,
    pub priority: Option<MeetingPriority>,
    pub is_private: Option<bool>,
    pub attendee_ids: Option<Vec<i64>>,
}

pub async fn update_meeting(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(meeting_id): Path<i64>,
    Json(req): Json<UpdateMeetingRequest>,
) -> ApiResult<Json<MeetingDetail>> {
    let current = editable_meeting(&state, &user, meeting_id)?;
    let title = req
        .title
        .as_deref()
        .map(|t| required_text("Title", t))
        .transpose()?;
    Meeting::validate_window(
        req.start_time.unwrap_or(current.start_time),
        req.end_time.unwrap_or(current.end_time),
    )?;
    let rescheduled = req.start_time.is_some_and(|t| t != current.start_time)
        || req.end_time.is_some_and(|t| t != current.end_time);

    let (meeting, added) = state.store.update_meeting(
        meeting_id,
        &MeetingUpdate {
            title,
            description: req.description,
            meeting_type: req.meeting_type,
            location: req.location,
            meeting_link: req.meeting_link,
            start_time: req.start_time,
            end_time: req.end_time,
            status: req.status,
            priority: req.priority,
            is_private: req.is_private,
            attendee_ids: req.attendee_ids,
        },
    )?;

    if !added.is_empty() {
        notify_attendees(
            &state,
            &meeting,
            added.iter().copied(),
            NotificationKind::MeetingInvitation,
            "Meeting invitation",
            format!("{} invited you to \"{}\"", user.name, meeting.title),
        )?;
    }
    let existing = state
        .store
        .meeting_attendees(meeting_id)?
        .into_iter()
        .map(|a| a.user_id)
        .filter(|id| !added.contains(id));
    let cancelled = meeting.status == MeetingStatus::Cancelled
        && current.status != MeetingStatus::Cancelled;
    if cancelled {
        notify_attendees(
            &state,
            &meeting,
            existing,
            NotificationKind::MeetingCancelled,
            "Meeting cancelled",
            format!("\"{}\" has been cancelled", meeting.title),
        )?;
    } else if rescheduled {
        notify_attendees(
            &state,
            &meeting,
            existing,
            NotificationKind::MeetingUpdated,
            "Meeting rescheduled",
            format!(
                "\"{}\" now starts {}",
                meeting.title,
                meeting.start_time.format("%Y-%m-%d %H:%M UTC")
            ),
        )?;
    }

    Ok(Json(meeting_detail(&state, &user, meeting)?))
}

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub response: AttendanceResponse,
}

#[derive(Debug, Serialize)]
pub struct RespondResult {
    pub attendance: MeetingAttendee,
    pub response_stats: ResponseStats,
}

pub async fn respond(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(meeting_id): Path<i64>,
    Json(req): Json<RespondRequest>,
) -> ApiResult<Json<RespondResult>> {
    load_meeting(&state, &user, meeting_id)?;
    let attendance = state
        .store
        .respond_to_meeting(meeting_id, user.id, req.response)?;
    let attendees = state.store.meeting_attendees(meeting_id)?;
    Ok(Json(RespondResult {
        attendance,
        response_stats: ResponseStats::from_attendees(&attendees),
    }))
}

pub async fn delete_meeting(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(meeting_id): Path<i64>,
) -> ApiResult<StatusCode> {
    let meeting = editable_meeting(&state, &user, meeting_id)?;
    let attendees: Vec<i64> = state
        .store
        .meeting_attendees(meeting_id)?
        .iter()
        .map(|a| a.user_id)
        .collect();
    state.store.delete_meeting(meeting_id)?;
    if meeting.end_time > Utc::now() {
        notify_attendees(
            &state,
            &meeting,
            attendees,
            NotificationKind::MeetingCancelled,
            "Meeting cancelled",
            format!("\"{}\" has been cancelled", meeting.title),
        )?;
    }
    info!(meeting_id, deleted_by = user.id, "Meeting deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct NoteRequest {
    pub content: String,
    #[serde(default)]
    pub note_type: Option<NoteType>,
}

pub async fn add_note(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(meeting_id): Path<i64>,
    Json(req): Json<NoteRequest>,
) -> ApiResult<(StatusCode, Json<MeetingNote>)> {
    let (meeting, attendees) = visible_meeting(&state, &user, meeting_id)?;
    let takes_part = meeting.organizer_id == user.id
        || attendees.iter().any(|a| a.user_id == user.id)
        || user.is_admin();
    if !takes_part {
        return deny(&user, "meeting", "Only participants can add notes");
    }
    let content = required_text("Note", &req.content)?;
    let note = state.store.add_meeting_note(
        meeting_id,
        user.id,
        &content,
        req.note_type.unwrap_or_default(),
    )?;
    Ok((StatusCode::CREATED, Json(note)))
}

pub async fn list_notes(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(meeting_id): Path<i64>,
) -> ApiResult<Json<Vec<MeetingNote>>> {
    visible_meeting(&state, &user, meeting_id)?;
    Ok(Json(state.store.meeting_notes(meeting_id)?))
}
