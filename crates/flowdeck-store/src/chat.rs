use chrono::{DateTime, Utc};
use flowdeck_core::{
    ChannelType, ChatChannel, ConversationPreview, DeliveryReceipt, DeliveryStamps,
    DeliveryState, Message, MessageTarget, MessageType,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::error::{parse_column, Result, StoreError};
use crate::{like_pattern, Store};

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub content: String,
    pub sender_id: i64,
    pub target: MessageTarget,
    pub message_type: MessageType,
    pub task_card_id: Option<i64>,
}

impl NewMessage {
    pub fn text(sender_id: i64, target: MessageTarget, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            sender_id,
            target,
            message_type: MessageType::Text,
            task_card_id: None,
        }
    }
}

const MESSAGE_COLUMNS: &str = "m.id, m.content, m.sender_id, m.recipient_id, m.channel_id,
    m.message_type, m.task_card_id, m.is_delivered, m.delivered_at, m.is_read, m.read_at,
    m.created_at";

const CHANNEL_COLUMNS: &str = "c.id, c.name, c.description, c.channel_type, c.organisation_id,
    c.department_id, c.created_by_id, c.created_at";

fn map_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        content: row.get(1)?,
        sender_id: row.get(2)?,
        recipient_id: row.get(3)?,
        channel_id: row.get(4)?,
        message_type: parse_column(5, row.get(5)?)?,
        task_card_id: row.get(6)?,
        is_delivered: row.get(7)?,
        delivered_at: row.get(8)?,
        is_read: row.get(9)?,
        read_at: row.get(10)?,
        created_at: row.get(11)?,
    })
}

fn map_channel(row: &Row<'_>) -> rusqlite::Result<ChatChannel> {
    Ok(ChatChannel {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        channel_type: parse_column(3, row.get(3)?)?,
        organisation_id: row.get(4)?,
        department_id: row.get(5)?,
        created_by_id: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn get_message_conn(conn: &Connection, id: i64) -> Result<Option<Message>> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = ?1");
    Ok(conn.query_row(&sql, params![id], map_message).optional()?)
}

fn query_messages(conn: &Connection, sql: &str, args: impl rusqlite::Params) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(args, map_message)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Moves one direct message towards `target`, persisting the new stamps.
///
/// Channel messages and messages already at or past `target` yield `None`.
fn advance_conn(
    conn: &Connection,
    message: &Message,
    target: DeliveryState,
    now: DateTime<Utc>,
) -> Result<Option<DeliveryReceipt>> {
    let Some(recipient_id) = message.recipient_id else {
        return Ok(None);
    };
    let mut stamps = DeliveryStamps {
        delivered_at: message.delivered_at,
        read_at: message.read_at,
    };
    if !stamps.apply(target, now) {
        return Ok(None);
    }
    let state = stamps.state();
    conn.execute(
        "UPDATE messages SET is_delivered = ?2, delivered_at = ?3, is_read = ?4, read_at = ?5
         WHERE id = ?1",
        params![
            message.id,
            state.is_delivered(),
            stamps.delivered_at,
            state.is_read(),
            stamps.read_at
        ],
    )?;
    Ok(Some(DeliveryReceipt {
        message_id: message.id,
        sender_id: message.sender_id,
        recipient_id,
        state,
        at: now,
    }))
}

fn advance_all(
    conn: &Connection,
    messages: Vec<Message>,
    target: DeliveryState,
    now: DateTime<Utc>,
) -> Result<Vec<DeliveryReceipt>> {
    let mut receipts = Vec::with_capacity(messages.len());
    for message in &messages {
        if let Some(receipt) = advance_conn(conn, message, target, now)? {
            receipts.push(receipt);
        }
    }
    Ok(receipts)
}

impl Store {
    /// Creates a channel; the creator and any same-tenant members join it.
    #[allow(clippy::too_many_arguments)]
    pub fn create_channel(
        &self,
        organisation_id: i64,
        name: &str,
        description: Option<&str>,
        channel_type: ChannelType,
        department_id: Option<i64>,
        created_by_id: i64,
        member_ids: &[i64],
    ) -> Result<ChatChannel> {
        self.with_tx(|tx| {
            let now = Utc::now();
            tx.execute(
                "INSERT INTO chat_channels (name, description, channel_type, organisation_id,
                    department_id, created_by_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    name,
                    description,
                    channel_type.as_str(),
                    organisation_id,
                    department_id,
                    created_by_id,
                    now
                ],
            )?;
            let id = tx.last_insert_rowid();
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO channel_members (channel_id, user_id, joined_at)
                 SELECT ?1, id, ?3 FROM users WHERE id = ?2 AND organisation_id = ?4",
            )?;
            for user_id in std::iter::once(&created_by_id).chain(member_ids) {
                stmt.execute(params![id, user_id, now, organisation_id])?;
            }
            drop(stmt);
            let sql = format!("SELECT {CHANNEL_COLUMNS} FROM chat_channels c WHERE c.id = ?1");
            Ok(tx.query_row(&sql, params![id], map_channel)?)
        })
    }

    pub fn get_channel(&self, id: i64) -> Result<Option<ChatChannel>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {CHANNEL_COLUMNS} FROM chat_channels c WHERE c.id = ?1");
            Ok(conn.query_row(&sql, params![id], map_channel).optional()?)
        })
    }

    pub fn channels_for_user(&self, user_id: i64) -> Result<Vec<ChatChannel>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {CHANNEL_COLUMNS} FROM chat_channels c
                 JOIN channel_members cm ON cm.channel_id = c.id
                 WHERE cm.user_id = ?1 ORDER BY c.name"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![user_id], map_channel)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    pub fn channel_ids_for_user(&self, user_id: i64) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT channel_id FROM channel_members WHERE user_id = ?1")?;
            let rows = stmt.query_map(params![user_id], |row| row.get(0))?;
            Ok(rows.collect::<rusqlite::Result<Vec<i64>>>()?)
        })
    }

    pub fn is_channel_member(&self, channel_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT 1 FROM channel_members WHERE channel_id = ?1 AND user_id = ?2",
                    params![channel_id, user_id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some())
        })
    }

    pub fn channel_member_ids(&self, channel_id: i64) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM channel_members WHERE channel_id = ?1 ORDER BY user_id",
            )?;
            let rows = stmt.query_map(params![channel_id], |row| row.get(0))?;
            Ok(rows.collect::<rusqlite::Result<Vec<i64>>>()?)
        })
    }

    /// Adds a member. Returns false when the user already belonged to the channel.
    pub fn add_channel_member(&self, channel_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO channel_members (channel_id, user_id, joined_at)
                 VALUES (?1, ?2, ?3)",
                params![channel_id, user_id, Utc::now()],
            )?;
            Ok(inserted > 0)
        })
    }

    pub fn remove_channel_member(&self, channel_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM channel_members WHERE channel_id = ?1 AND user_id = ?2",
                params![channel_id, user_id],
            )?;
            Ok(removed > 0)
        })
    }

    /// Persists a message in the `Sent` state.
    pub fn insert_message(&self, new: &NewMessage) -> Result<Message> {
        let (recipient_id, channel_id) = match new.target {
            MessageTarget::Direct(recipient) => (Some(recipient), None),
            MessageTarget::Channel(channel) => (None, Some(channel)),
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (content, sender_id, recipient_id, channel_id, message_type,
                    task_card_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    new.content,
                    new.sender_id,
                    recipient_id,
                    channel_id,
                    new.message_type.as_str(),
                    new.task_card_id,
                    Utc::now()
                ],
            )?;
            let id = conn.last_insert_rowid();
            get_message_conn(conn, id)?.ok_or_else(|| StoreError::not_found("message", id))
        })
    }

    pub fn get_message(&self, id: i64) -> Result<Option<Message>> {
        self.with_conn(|conn| get_message_conn(conn, id))
    }

    /// The latest `limit` messages of a channel, oldest first.
    pub fn channel_messages(&self, channel_id: i64, limit: u32) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT * FROM (
                    SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.channel_id = ?1
                    ORDER BY m.created_at DESC, m.id DESC LIMIT ?2
                 ) ORDER BY created_at ASC, id ASC"
            );
            query_messages(conn, &sql, params![channel_id, limit])
        })
    }

    /// The latest `limit` direct messages between two users, oldest first.
    pub fn direct_conversation(&self, user_id: i64, peer_id: i64, limit: u32) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT * FROM (
                    SELECT {MESSAGE_COLUMNS} FROM messages m
                    WHERE (m.sender_id = ?1 AND m.recipient_id = ?2)
                       OR (m.sender_id = ?2 AND m.recipient_id = ?1)
                    ORDER BY m.created_at DESC, m.id DESC LIMIT ?3
                 ) ORDER BY created_at ASC, id ASC"
            );
            query_messages(conn, &sql, params![user_id, peer_id, limit])
        })
    }

    /// Messages the user can see whose content matches `query`, newest first.
    pub fn search_messages(&self, user_id: i64, query: &str, limit: u32) -> Result<Vec<Message>> {
        let pattern = like_pattern(query.trim());
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages m
                 WHERE m.content LIKE ?2 ESCAPE '\\'
                   AND (m.sender_id = ?1 OR m.recipient_id = ?1
                        OR m.channel_id IN (SELECT channel_id FROM channel_members WHERE user_id = ?1))
                 ORDER BY m.created_at DESC, m.id DESC LIMIT ?3"
            );
            query_messages(conn, &sql, params![user_id, pattern, limit])
        })
    }

    /// Latest messages visible to the user across channels and direct chats.
    pub fn recent_messages_for(&self, user_id: i64, limit: u32) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages m
                 WHERE m.recipient_id = ?1 OR m.sender_id = ?1
                    OR m.channel_id IN (SELECT channel_id FROM channel_members WHERE user_id = ?1)
                 ORDER BY m.created_at DESC, m.id DESC LIMIT ?2"
            );
            query_messages(conn, &sql, params![user_id, limit])
        })
    }

    pub fn unread_direct_count(&self, user_id: i64) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE recipient_id = ?1 AND is_read = 0",
                params![user_id],
                |row| row.get(0),
            )?)
        })
    }

    /// One entry per direct-message peer, most recent conversation first.
    pub fn recent_conversations(&self, user_id: i64, limit: u32) -> Result<Vec<ConversationPreview>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "WITH latest AS (
                    SELECT CASE WHEN sender_id = ?1 THEN recipient_id ELSE sender_id END AS peer_id,
                           MAX(id) AS last_id
                    FROM messages
                    WHERE recipient_id IS NOT NULL AND (sender_id = ?1 OR recipient_id = ?1)
                    GROUP BY peer_id
                 )
                 SELECT l.peer_id, u.name, m.content, m.created_at,
                        (SELECT COUNT(*) FROM messages x
                         WHERE x.sender_id = l.peer_id AND x.recipient_id = ?1 AND x.is_read = 0)
                 FROM latest l
                 JOIN messages m ON m.id = l.last_id
                 JOIN users u ON u.id = l.peer_id
                 ORDER BY m.created_at DESC, m.id DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![user_id, limit], |row| {
                Ok(ConversationPreview {
                    peer_id: row.get(0)?,
                    peer_name: row.get(1)?,
                    last_message: row.get(2)?,
                    last_message_at: row.get(3)?,
                    unread: row.get(4)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Advances one message. `None` when it is a channel message or already that far.
    pub fn advance_delivery(
        &self,
        message_id: i64,
        target: DeliveryState,
        now: DateTime<Utc>,
    ) -> Result<Option<DeliveryReceipt>> {
        self.with_tx(|tx| {
            let message = get_message_conn(tx, message_id)?
                .ok_or_else(|| StoreError::not_found("message", message_id))?;
            advance_conn(tx, &message, target, now)
        })
    }

    /// Marks every undelivered direct message addressed to `recipient_id` as delivered.
    pub fn deliver_pending_for(
        &self,
        recipient_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeliveryReceipt>> {
        let receipts = self.with_tx(|tx| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages m
                 WHERE m.recipient_id = ?1 AND m.is_delivered = 0 ORDER BY m.id"
            );
            let pending = query_messages(tx, &sql, params![recipient_id])?;
            advance_all(tx, pending, DeliveryState::Delivered, now)
        })?;
        if !receipts.is_empty() {
            debug!(recipient_id, count = receipts.len(), "Delivered pending direct messages");
        }
        Ok(receipts)
    }

    /// Marks every unread message from `peer_id` to `reader_id` as read.
    pub fn mark_conversation_read(
        &self,
        reader_id: i64,
        peer_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeliveryReceipt>> {
        self.with_tx(|tx| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages m
                 WHERE m.recipient_id = ?1 AND m.sender_id = ?2 AND m.is_read = 0 ORDER BY m.id"
            );
            let unread = query_messages(tx, &sql, params![reader_id, peer_id])?;
            advance_all(tx, unread, DeliveryState::Read, now)
        })
    }
}
