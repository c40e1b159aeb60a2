//! SQLite persistence for FlowDeck.
//!
//! A single connection guarded by a mutex. Every operation is short, so
//! callers on the async runtime use it directly instead of a blocking pool.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{Connection, Transaction};
use tracing::{debug, info};

mod audit;
mod chat;
mod error;
mod leave;
mod meetings;
mod notifications;
mod organisations;
mod schema;
mod stats;
mod tasks;

pub use chat::NewMessage;
pub use error::{Result, StoreError};
pub use leave::{NewHoliday, NewLeaveRequest};
pub use meetings::{MeetingFilter, MeetingUpdate, NewAgendaItem, NewMeeting};
pub use organisations::{AdminUserUpdate, NewOrganisation, NewUser, ProfileUpdate};
pub use stats::{
    DailyCount, DepartmentStats, LabelCount, OrgOverview, Performer, ProductivityStats, UserStats,
};
pub use tasks::{NewTask, NewTimeLog, TaskUpdate, TaskUpdateOutcome};

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Opens (or creates) the database file, creating parent directories as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "Opened SQLite database");
        Self::from_connection(conn)
    }

    /// In-memory database for tests and ephemeral runs.
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(schema::SCHEMA)?;
        schema::seed_roles(&conn)?;
        debug!("Schema initialised");
        Ok(())
    }

    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Runs `f` inside a transaction that commits only when `f` succeeds.
    pub(crate) fn with_tx<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Cheap liveness probe used by the health endpoint.
    pub fn ping(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
    }
}

/// Escapes `%` and `_` so user input matches literally inside `LIKE ... ESCAPE '\'`.
pub(crate) fn like_pattern(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len() + 2);
    escaped.push('%');
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent() {
        let store = Store::in_memory().unwrap();
        store.init_schema().unwrap();
        store.ping().unwrap();
    }

    #[test]
    fn on_disk_database_is_created_with_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("flowdeck.db");
        let store = Store::open(&path).unwrap();
        store.ping().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }
}
