//! Wire format of the `/ws` endpoint. Every frame is a JSON object with a `type` tag.

use chrono::{DateTime, Utc};
use flowdeck_core::{DeliveryState, Message, MessageType, Notification};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinChannel {
        channel_id: i64,
    },
    LeaveChannel {
        channel_id: i64,
    },
    SendMessage {
        content: String,
        #[serde(default)]
        channel_id: Option<i64>,
        #[serde(default)]
        recipient_id: Option<i64>,
        #[serde(default)]
        message_type: Option<MessageType>,
        #[serde(default)]
        task_card_id: Option<i64>,
    },
    Typing {
        #[serde(default)]
        channel_id: Option<i64>,
        #[serde(default)]
        recipient_id: Option<i64>,
        #[serde(default = "default_true")]
        is_typing: bool,
    },
    RequestOnlineUsers,
    MarkMessageRead {
        message_id: i64,
    },
    RequestNotifications {
        #[serde(default)]
        unread_only: bool,
    },
}

fn default_true() -> bool {
    true
}

/// A message as pushed to clients, with the sender's display name and tick state.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MessagePayload {
    #[serde(flatten)]
    pub message: Message,
    pub sender_name: String,
    pub delivery_state: DeliveryState,
}

impl MessagePayload {
    pub fn new(message: Message, sender_name: impl Into<String>) -> Self {
        let delivery_state = message.delivery_state();
        Self {
            message,
            sender_name: sender_name.into(),
            delivery_state,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OnlineUser {
    pub user_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    UserOnline {
        user_id: i64,
        name: String,
    },
    UserOffline {
        user_id: i64,
        last_seen: DateTime<Utc>,
    },
    JoinedChannel {
        channel_id: i64,
        user_id: i64,
        name: String,
    },
    LeftChannel {
        channel_id: i64,
        user_id: i64,
        name: String,
    },
    NewMessage {
        message: MessagePayload,
    },
    NewDirectMessage {
        message: MessagePayload,
    },
    UserTyping {
        user_id: i64,
        name: String,
        channel_id: Option<i64>,
        is_typing: bool,
    },
    OnlineUsersList {
        users: Vec<OnlineUser>,
    },
    MessageDelivered {
        message_id: i64,
        recipient_id: i64,
        delivered_at: DateTime<Utc>,
    },
    MessageRead {
        message_id: i64,
        reader_id: i64,
        read_at: DateTime<Utc>,
    },
    NotificationsList {
        notifications: Vec<Notification>,
        unread_count: i64,
    },
    NewNotification {
        notification: Notification,
    },
    BroadcastNotification {
        title: String,
        message: String,
        sender_name: String,
        sent_at: DateTime<Utc>,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","message":"failed to encode event: {e}"}}"#)
        })
    }
}
