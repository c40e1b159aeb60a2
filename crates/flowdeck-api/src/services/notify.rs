//! Persisted notifications plus their live push to `user:{id}` rooms.

use chrono::Utc;
use flowdeck_core::{NewNotification, Notification, User};
use tracing::{debug, info};

use crate::error::ApiResult;
use crate::realtime::{Room, ServerEvent};
use crate::state::AppState;

pub fn notify(state: &AppState, new: NewNotification) -> ApiResult<Notification> {
    let notification = state.store.create_notification(&new)?;
    push(state, &notification);
    Ok(notification)
}

/// Stores the whole batch in one transaction, then pushes each entry.
pub fn notify_many(state: &AppState, batch: Vec<NewNotification>) -> ApiResult<Vec<Notification>> {
    if batch.is_empty() {
        return Ok(Vec::new());
    }
    let created = state.store.create_notifications(&batch)?;
    for notification in &created {
        push(state, notification);
    }
    debug!(count = created.len(), "Notifications created");
    Ok(created)
}

fn push(state: &AppState, notification: &Notification) {
    state.hub.emit(
        Room::User(notification.user_id),
        &ServerEvent::NewNotification {
            notification: notification.clone(),
        },
    );
}

/// Live-only announcement to every connected member of the sender's organisation.
pub fn broadcast(state: &AppState, sender: &User, title: &str, message: &str) -> usize {
    let reached = state.hub.emit(
        Room::Org(sender.organisation_id),
        &ServerEvent::BroadcastNotification {
            title: title.to_string(),
            message: message.to_string(),
            sender_name: sender.name.clone(),
            sent_at: Utc::now(),
        },
    );
    info!(
        organisation_id = sender.organisation_id,
        sender = sender.id,
        reached,
        "Broadcast sent"
    );
    reached
}
