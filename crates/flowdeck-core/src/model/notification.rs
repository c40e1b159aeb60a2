use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

string_enum! {
    NotificationKind {
        TaskAssigned => "task_assigned",
        TaskUpdated => "task_updated",
        CommentAdded => "comment_added",
        MeetingInvitation => "meeting_invitation",
        MeetingUpdated => "meeting_updated",
        MeetingCancelled => "meeting_cancelled",
        LeaveRequested => "leave_requested",
        LeaveReviewed => "leave_reviewed",
        Message => "message",
        Broadcast => "broadcast",
        System => "system",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub task_id: Option<i64>,
    pub action_url: Option<String>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a notification; the id and timestamps come from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub user_id: i64,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub task_id: Option<i64>,
    pub action_url: Option<String>,
}

impl NewNotification {
    pub fn new(
        user_id: i64,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            title: title.into(),
            message: message.into(),
            kind,
            task_id: None,
            action_url: None,
        }
    }

    pub fn for_task(mut self, task_id: i64) -> Self {
        self.task_id = Some(task_id);
        self.action_url = Some(format!("/tasks/{task_id}"));
        self
    }

    pub fn with_action_url(mut self, url: impl Into<String>) -> Self {
        self.action_url = Some(url.into());
        self
    }
}
