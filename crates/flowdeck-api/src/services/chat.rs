//! Message sending and tick bookkeeping shared by the REST routes and the socket loop.

use chrono::Utc;
use flowdeck_core::{
    DeliveryReceipt, DeliveryState, Message, MessageTarget, MessageType, NewNotification,
    NotificationKind, User,
};
use flowdeck_store::NewMessage;
use serde::Deserialize;
use tracing::debug;

use super::notify;
use crate::error::{ApiError, ApiResult};
use crate::realtime::{MessagePayload, Room, ServerEvent};
use crate::state::AppState;

const PREVIEW_CHARS: usize = 80;

/// A message as submitted by a client, before the target is resolved.
#[derive(Debug, Clone, Deserialize)]
pub struct OutgoingMessage {
    pub content: String,
    #[serde(default)]
    pub channel_id: Option<i64>,
    #[serde(default)]
    pub recipient_id: Option<i64>,
    #[serde(default)]
    pub message_type: Option<MessageType>,
    #[serde(default)]
    pub task_card_id: Option<i64>,
}

/// Checks that `sender` may post to the requested target and returns it.
pub fn resolve_target(
    state: &AppState,
    sender: &User,
    channel_id: Option<i64>,
    recipient_id: Option<i64>,
) -> ApiResult<MessageTarget> {
    match (channel_id, recipient_id) {
        (Some(channel_id), None) => {
            let channel = state
                .store
                .get_channel(channel_id)?
                .filter(|c| c.organisation_id == sender.organisation_id)
                .ok_or_else(|| ApiError::not_found("channel", channel_id))?;
            if !state.store.is_channel_member(channel.id, sender.id)? {
                return Err(ApiError::forbidden("Not a member of this channel"));
            }
            Ok(MessageTarget::Channel(channel.id))
        }
        (None, Some(recipient_id)) => {
            if recipient_id == sender.id {
                return Err(ApiError::Validation(
                    "Cannot send a direct message to yourself".into(),
                ));
            }
            state
                .store
                .get_user(recipient_id)?
                .filter(|u| u.organisation_id == sender.organisation_id)
                .ok_or_else(|| ApiError::not_found("user", recipient_id))?;
            Ok(MessageTarget::Direct(recipient_id))
        }
        _ => Err(ApiError::Validation(
            "Exactly one of channel_id or recipient_id is required".into(),
        )),
    }
}

pub fn send_message(
    state: &AppState,
    sender: &User,
    outgoing: OutgoingMessage,
) -> ApiResult<MessagePayload> {
    let content = outgoing.content.trim();
    if content.is_empty() {
        return Err(ApiError::Validation("Message content is required".into()));
    }
    let target = resolve_target(state, sender, outgoing.channel_id, outgoing.recipient_id)?;

    let mut message = state.store.insert_message(&NewMessage {
        content: content.to_string(),
        sender_id: sender.id,
        target,
        message_type: outgoing.message_type.unwrap_or_default(),
        task_card_id: outgoing.task_card_id,
    })?;

    match target {
        MessageTarget::Channel(channel_id) => {
            let payload = MessagePayload::new(message, sender.name.clone());
            state.hub.emit(
                Room::Channel(channel_id),
                &ServerEvent::NewMessage {
                    message: payload.clone(),
                },
            );
            Ok(payload)
        }
        MessageTarget::Direct(recipient_id) => {
            let receipt = if state.hub.is_online(recipient_id) {
                state
                    .store
                    .advance_delivery(message.id, DeliveryState::Delivered, Utc::now())?
            } else {
                None
            };
            if let Some(receipt) = &receipt {
                message.is_delivered = true;
                message.delivered_at = Some(receipt.at);
            }

            let payload = MessagePayload::new(message, sender.name.clone());
            let event = ServerEvent::NewDirectMessage {
                message: payload.clone(),
            };
            state.hub.emit(Room::User(recipient_id), &event);
            state.hub.emit(Room::User(sender.id), &event);

            match receipt {
                Some(receipt) => emit_receipts(state, &[receipt]),
                None => {
                    notify::notify(
                        state,
                        NewNotification::new(
                            recipient_id,
                            NotificationKind::Message,
                            format!("New message from {}", sender.name),
                            preview(content),
                        )
                        .with_action_url(format!("/chat/direct/{}", sender.id)),
                    )?;
                }
            }
            Ok(payload)
        }
    }
}

/// Marks one direct message read on behalf of its recipient.
pub fn mark_read(state: &AppState, reader: &User, message_id: i64) -> ApiResult<Message> {
    let message = state
        .store
        .get_message(message_id)?
        .ok_or_else(|| ApiError::not_found("message", message_id))?;
    match message.recipient_id {
        None => {
            return Err(ApiError::Validation(
                "Channel messages do not carry read receipts".into(),
            ))
        }
        Some(recipient) if recipient != reader.id => {
            return Err(ApiError::forbidden(
                "Only the recipient can mark a message as read",
            ))
        }
        Some(_) => {}
    }

    if let Some(receipt) = state
        .store
        .advance_delivery(message_id, DeliveryState::Read, Utc::now())?
    {
        emit_receipts(state, &[receipt]);
    }
    state
        .store
        .get_message(message_id)?
        .ok_or_else(|| ApiError::not_found("message", message_id))
}

/// Reads everything `peer_id` has sent to `reader_id`. Returns how many messages changed.
pub fn mark_conversation_read(state: &AppState, reader_id: i64, peer_id: i64) -> ApiResult<usize> {
    let receipts = state
        .store
        .mark_conversation_read(reader_id, peer_id, Utc::now())?;
    emit_receipts(state, &receipts);
    Ok(receipts.len())
}

/// Delivers the backlog of a user who just came online.
pub fn deliver_pending(state: &AppState, recipient_id: i64) -> ApiResult<usize> {
    let receipts = state.store.deliver_pending_for(recipient_id, Utc::now())?;
    emit_receipts(state, &receipts);
    Ok(receipts.len())
}

/// Tells each sender about the new state of their messages.
pub fn emit_receipts(state: &AppState, receipts: &[DeliveryReceipt]) {
    for receipt in receipts {
        let event = match receipt.state {
            DeliveryState::Delivered => ServerEvent::MessageDelivered {
                message_id: receipt.message_id,
                recipient_id: receipt.recipient_id,
                delivered_at: receipt.at,
            },
            DeliveryState::Read => ServerEvent::MessageRead {
                message_id: receipt.message_id,
                reader_id: receipt.recipient_id,
                read_at: receipt.at,
            },
            DeliveryState::Sent => continue,
        };
        state.hub.emit(Room::User(receipt.sender_id), &event);
    }
    if !receipts.is_empty() {
        debug!(count = receipts.len(), "Delivery receipts emitted");
    }
}

fn preview(content: &str) -> String {
    if content.chars().count() <= PREVIEW_CHARS {
        return content.to_string();
    }
    let cut: String = content.chars().take(PREVIEW_CHARS).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_long_messages() {
        assert_eq!(preview("short"), "short");
        let long = "x".repeat(100);
        let shown = preview(&long);
        assert!(shown.ends_with("..."));
        assert_eq!(shown.chars().count(), PREVIEW_CHARS + 3);
    }
}
