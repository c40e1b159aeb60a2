use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FlowDeckError, Result};

string_enum! {
    MeetingType {
        General => "general",
        Standup => "standup",
        Review => "review",
        Planning => "planning",
        Client => "client",
        OneOnOne => "one_on_one",
    }
}

impl Default for MeetingType {
    fn default() -> Self {
        MeetingType::General
    }
}

string_enum! {
    MeetingStatus {
        Scheduled => "scheduled",
        InProgress => "in_progress",
        Completed => "completed",
        Cancelled => "cancelled",
    }
}

impl Default for MeetingStatus {
    fn default() -> Self {
        MeetingStatus::Scheduled
    }
}

string_enum! {
    MeetingPriority {
        Low => "low",
        Normal => "normal",
        High => "high",
        Urgent => "urgent",
    }
}

impl Default for MeetingPriority {
    fn default() -> Self {
        MeetingPriority::Normal
    }
}

string_enum! {
    AttendanceResponse {
        Pending => "pending",
        Accepted => "accepted",
        Declined => "declined",
        Tentative => "tentative",
    }
}

impl AttendanceResponse {
    /// `pending` is the initial state and cannot be chosen by an attendee.
    pub fn is_reply(&self) -> bool {
        !matches!(self, AttendanceResponse::Pending)
    }
}

string_enum! {
    MeetingView {
        Upcoming => "upcoming",
        Past => "past",
        All => "all",
    }
}

impl Default for MeetingView {
    fn default() -> Self {
        MeetingView::Upcoming
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Meeting {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub meeting_type: MeetingType,
    pub location: Option<String>,
    pub meeting_link: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: MeetingStatus,
    pub priority: MeetingPriority,
    pub is_private: bool,
    pub organisation_id: i64,
    pub department_id: Option<i64>,
    pub task_id: Option<i64>,
    pub organizer_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Meeting {
    pub fn validate_window(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
        if start >= end {
            return Err(FlowDeckError::validation("End time must be after start time"));
        }
        Ok(())
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }

    pub fn is_upcoming(&self, now: DateTime<Utc>) -> bool {
        self.start_time > now && self.status == MeetingStatus::Scheduled
    }

    pub fn is_ongoing(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now
            && now <= self.end_time
            && matches!(
                self.status,
                MeetingStatus::Scheduled | MeetingStatus::InProgress
            )
    }

    pub fn is_past(&self, now: DateTime<Utc>) -> bool {
        self.end_time < now
            || matches!(
                self.status,
                MeetingStatus::Completed | MeetingStatus::Cancelled
            )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeetingAttendee {
    pub meeting_id: i64,
    pub user_id: i64,
    pub status: AttendanceResponse,
    pub responded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgendaItem {
    pub id: i64,
    pub meeting_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub duration_minutes: Option<i64>,
    pub position: i64,
    pub is_completed: bool,
}

string_enum! {
    NoteType {
        General => "general",
        ActionItem => "action_item",
        Decision => "decision",
        FollowUp => "follow_up",
    }
}

impl Default for NoteType {
    fn default() -> Self {
        NoteType::General
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeetingNote {
    pub id: i64,
    pub meeting_id: i64,
    pub content: String,
    pub note_type: NoteType,
    pub created_by_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseStats {
    pub accepted: i64,
    pub declined: i64,
    pub tentative: i64,
    pub pending: i64,
}

impl ResponseStats {
    pub fn from_attendees(attendees: &[MeetingAttendee]) -> Self {
        attendees.iter().fold(Self::default(), |mut stats, a| {
            match a.status {
                AttendanceResponse::Accepted => stats.accepted += 1,
                AttendanceResponse::Declined => stats.declined += 1,
                AttendanceResponse::Tentative => stats.tentative += 1,
                AttendanceResponse::Pending => stats.pending += 1,
            }
            stats
        })
    }

    pub fn total(&self) -> i64 {
        self.accepted + self.declined + self.tentative + self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn meeting(start: DateTime<Utc>, minutes: i64, status: MeetingStatus) -> Meeting {
        Meeting {
            id: 1,
            title: "Sync".into(),
            description: None,
            meeting_type: MeetingType::Standup,
            location: None,
            meeting_link: None,
            start_time: start,
            end_time: start + Duration::minutes(minutes),
            status,
            priority: MeetingPriority::Normal,
            is_private: false,
            organisation_id: 1,
            department_id: None,
            task_id: None,
            organizer_id: 1,
            created_at: start,
            updated_at: start,
        }
    }

    #[test]
    fn window_requires_start_before_end() {
        let now = Utc::now();
        assert!(Meeting::validate_window(now, now).is_err());
        assert!(Meeting::validate_window(now, now + Duration::minutes(1)).is_ok());
    }

    #[test]
    fn lifecycle_predicates() {
        let now = Utc::now();
        let future = meeting(now + Duration::hours(1), 30, MeetingStatus::Scheduled);
        assert!(future.is_upcoming(now));
        assert_eq!(future.duration_minutes(), 30);

        let running = meeting(now - Duration::minutes(5), 30, MeetingStatus::InProgress);
        assert!(running.is_ongoing(now));
        assert!(!running.is_past(now));

        let cancelled = meeting(now + Duration::hours(1), 30, MeetingStatus::Cancelled);
        assert!(!cancelled.is_upcoming(now));
        assert!(cancelled.is_past(now));
    }

    #[test]
    fn stats_count_every_response() {
        let a = |status| MeetingAttendee {
            meeting_id: 1,
            user_id: 2,
            status,
            responded_at: None,
        };
        let stats = ResponseStats::from_attendees(&[
            a(AttendanceResponse::Accepted),
            a(AttendanceResponse::Accepted),
            a(AttendanceResponse::Pending),
            a(AttendanceResponse::Declined),
        ]);
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.total(), 4);
    }
}
