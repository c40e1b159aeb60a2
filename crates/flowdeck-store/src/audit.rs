use chrono::Utc;
use flowdeck_core::{AuditLog, NewAuditEntry};
use rusqlite::params;

use crate::error::{parse_column, Result};
use crate::Store;

impl Store {
    pub fn record_audit(&self, entry: &NewAuditEntry) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO audit_logs (organisation_id, user_id, action, entity_type, entity_id,
                    details, ip_address, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    entry.organisation_id,
                    entry.user_id,
                    entry.action.as_str(),
                    entry.entity_type,
                    entry.entity_id,
                    entry.details,
                    entry.ip_address,
                    Utc::now()
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Latest entries for one organisation.
    pub fn list_audit(&self, organisation_id: i64, limit: u32) -> Result<Vec<AuditLog>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, organisation_id, user_id, action, entity_type, entity_id, details,
                    ip_address, created_at
                 FROM audit_logs WHERE organisation_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![organisation_id, limit], |row| {
                Ok(AuditLog {
                    id: row.get(0)?,
                    organisation_id: row.get(1)?,
                    user_id: row.get(2)?,
                    action: parse_column(3, row.get(3)?)?,
                    entity_type: row.get(4)?,
                    entity_id: row.get(5)?,
                    details: row.get(6)?,
                    ip_address: row.get(7)?,
                    created_at: row.get(8)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }
}
