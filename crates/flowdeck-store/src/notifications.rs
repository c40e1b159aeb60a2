use chrono::Utc;
use flowdeck_core::{NewNotification, Notification};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{parse_column, Result, StoreError};
use crate::Store;

const NOTIFICATION_COLUMNS: &str = "id, user_id, title, message, notification_type, task_id,
    action_url, is_read, read_at, created_at";

fn map_notification(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        message: row.get(3)?,
        kind: parse_column(4, row.get(4)?)?,
        task_id: row.get(5)?,
        action_url: row.get(6)?,
        is_read: row.get(7)?,
        read_at: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn get_notification_conn(conn: &Connection, id: i64) -> Result<Option<Notification>> {
    let sql = format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], map_notification).optional()?)
}

fn insert_notification(conn: &Connection, new: &NewNotification) -> Result<Notification> {
    conn.execute(
        "INSERT INTO notifications (user_id, title, message, notification_type, task_id,
            action_url, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            new.user_id,
            new.title,
            new.message,
            new.kind.as_str(),
            new.task_id,
            new.action_url,
            Utc::now()
        ],
    )?;
    let id = conn.last_insert_rowid();
    get_notification_conn(conn, id)?.ok_or_else(|| StoreError::not_found("notification", id))
}

impl Store {
    pub fn create_notification(&self, new: &NewNotification) -> Result<Notification> {
        self.with_conn(|conn| insert_notification(conn, new))
    }

    /// Inserts a batch atomically, e.g. one broadcast fanned out to a whole organisation.
    pub fn create_notifications(&self, batch: &[NewNotification]) -> Result<Vec<Notification>> {
        self.with_tx(|tx| batch.iter().map(|n| insert_notification(tx, n)).collect())
    }

    pub fn get_notification(&self, id: i64) -> Result<Option<Notification>> {
        self.with_conn(|conn| get_notification_conn(conn, id))
    }

    /// Newest first.
    pub fn list_notifications(
        &self,
        user_id: i64,
        unread_only: bool,
        limit: u32,
    ) -> Result<Vec<Notification>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM notifications
                 WHERE user_id = ?1 AND (?2 = 0 OR is_read = 0)
                 ORDER BY created_at DESC, id DESC LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![user_id, unread_only, limit], map_notification)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    pub fn unread_notification_count(&self, user_id: i64) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
                params![user_id],
                |row| row.get(0),
            )?)
        })
    }

    /// Marks one of the user's notifications read. Already-read rows keep their timestamp.
    pub fn mark_notification_read(&self, user_id: i64, id: i64) -> Result<Notification> {
        self.with_conn(|conn| {
            let notification = get_notification_conn(conn, id)?
                .filter(|n| n.user_id == user_id)
                .ok_or_else(|| StoreError::not_found("notification", id))?;
            if notification.is_read {
                return Ok(notification);
            }
            conn.execute(
                "UPDATE notifications SET is_read = 1, read_at = ?2 WHERE id = ?1",
                params![id, Utc::now()],
            )?;
            get_notification_conn(conn, id)?.ok_or_else(|| StoreError::not_found("notification", id))
        })
    }

    /// Returns how many notifications changed.
    pub fn mark_all_notifications_read(&self, user_id: i64) -> Result<usize> {
        self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE notifications SET is_read = 1, read_at = ?2 WHERE user_id = ?1 AND is_read = 0",
                params![user_id, Utc::now()],
            )?)
        })
    }
}
