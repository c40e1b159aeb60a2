use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::delivery::DeliveryState;

string_enum! {
    MessageType {
        Text => "text",
        Image => "image",
        File => "file",
        TaskCard => "task_card",
    }
}

impl Default for MessageType {
    fn default() -> Self {
        MessageType::Text
    }
}

string_enum! {
    ChannelType {
        Department => "department",
        Project => "project",
        Custom => "custom",
    }
}

impl Default for ChannelType {
    fn default() -> Self {
        ChannelType::Custom
    }
}

/// Where a message goes. Exactly one of channel or recipient is set on a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum MessageTarget {
    Channel(i64),
    Direct(i64),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: i64,
    pub content: String,
    pub sender_id: i64,
    pub recipient_id: Option<i64>,
    pub channel_id: Option<i64>,
    pub message_type: MessageType,
    pub task_card_id: Option<i64>,
    pub is_delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn target(&self) -> Option<MessageTarget> {
        match (self.channel_id, self.recipient_id) {
            (Some(channel), None) => Some(MessageTarget::Channel(channel)),
            (None, Some(recipient)) => Some(MessageTarget::Direct(recipient)),
            _ => None,
        }
    }

    /// Channel messages never leave `Sent`; ticks only apply to direct messages.
    pub fn delivery_state(&self) -> DeliveryState {
        DeliveryState::from_flags(self.is_delivered, self.is_read)
    }

    pub fn is_direct(&self) -> bool {
        self.recipient_id.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatChannel {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub channel_type: ChannelType,
    pub organisation_id: i64,
    pub department_id: Option<i64>,
    pub created_by_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// One row of the "recent conversations" listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationPreview {
    pub peer_id: i64,
    pub peer_name: String,
    pub last_message: String,
    pub last_message_at: DateTime<Utc>,
    pub unread: i64,
}
