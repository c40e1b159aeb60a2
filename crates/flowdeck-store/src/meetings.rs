use chrono::{DateTime, Utc};
use flowdeck_core::{
    AgendaItem, AttendanceResponse, Meeting, MeetingAttendee, MeetingNote, MeetingPriority,
    page_offset, MeetingStatus, MeetingType, MeetingView, NoteType, User,
};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{parse_column, Result, StoreError};
use crate::{like_pattern, Store};

#[derive(Debug, Clone)]
pub struct NewAgendaItem {
    pub title: String,
    pub description: Option<String>,
    pub duration_minutes: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewMeeting {
    pub title: String,
    pub description: Option<String>,
    pub meeting_type: MeetingType,
    pub location: Option<String>,
    pub meeting_link: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub priority: MeetingPriority,
    pub is_private: bool,
    pub organisation_id: i64,
    pub department_id: Option<i64>,
    pub task_id: Option<i64>,
    pub organizer_id: i64,
    pub attendee_ids: Vec<i64>,
    /// Stored in the given order.
    pub agenda: Vec<NewAgendaItem>,
}

#[derive(Debug, Clone)]
pub struct MeetingFilter {
    pub view: MeetingView,
    pub status: Option<MeetingStatus>,
    pub meeting_type: Option<MeetingType>,
    pub search: Option<String>,
    pub page: u32,
    pub per_page: u32,
}

impl Default for MeetingFilter {
    fn default() -> Self {
        Self {
            view: MeetingView::default(),
            status: None,
            meeting_type: None,
            search: None,
            page: 1,
            per_page: 20,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MeetingUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub meeting_type: Option<MeetingType>,
    pub location: Option<String>,
    pub meeting_link: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: Option<MeetingStatus>,
    pub priority: Option<MeetingPriority>,
    pub is_private: Option<bool>,
    pub attendee_ids: Option<Vec<i64>>,
}

const MEETING_COLUMNS: &str = "m.id, m.title, m.description, m.meeting_type, m.location,
    m.meeting_link, m.start_time, m.end_time, m.status, m.priority, m.is_private,
    m.organisation_id, m.department_id, m.task_id, m.organizer_id, m.created_at, m.updated_at";

fn map_meeting(row: &Row<'_>) -> rusqlite::Result<Meeting> {
    Ok(Meeting {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        meeting_type: parse_column(3, row.get(3)?)?,
        location: row.get(4)?,
        meeting_link: row.get(5)?,
        start_time: row.get(6)?,
        end_time: row.get(7)?,
        status: parse_column(8, row.get(8)?)?,
        priority: parse_column(9, row.get(9)?)?,
        is_private: row.get(10)?,
        organisation_id: row.get(11)?,
        department_id: row.get(12)?,
        task_id: row.get(13)?,
        organizer_id: row.get(14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

fn map_attendee(row: &Row<'_>) -> rusqlite::Result<MeetingAttendee> {
    Ok(MeetingAttendee {
        meeting_id: row.get(0)?,
        user_id: row.get(1)?,
        status: parse_column(2, row.get(2)?)?,
        responded_at: row.get(3)?,
    })
}

fn get_meeting_conn(conn: &Connection, id: i64) -> Result<Option<Meeting>> {
    let sql = format!("SELECT {MEETING_COLUMNS} FROM meetings m WHERE m.id = ?1");
    Ok(conn.query_row(&sql, params![id], map_meeting).optional()?)
}

fn attendee_ids_conn(conn: &Connection, meeting_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT user_id FROM meeting_attendees WHERE meeting_id = ?1")?;
    let rows = stmt.query_map(params![meeting_id], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<i64>>>()?)
}

/// Invites same-tenant users. Returns the ids that were newly added.
fn invite(conn: &Connection, meeting: &Meeting, user_ids: &[i64]) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO meeting_attendees (meeting_id, user_id, status)
         SELECT ?1, id, 'pending' FROM users WHERE id = ?2 AND organisation_id = ?3",
    )?;
    let mut added = Vec::new();
    for &user_id in user_ids {
        if stmt.execute(params![meeting.id, user_id, meeting.organisation_id])? > 0 {
            added.push(user_id);
        }
    }
    Ok(added)
}

impl Store {
    pub fn create_meeting(&self, new: &NewMeeting) -> Result<Meeting> {
        self.with_tx(|tx| {
            let now = Utc::now();
            tx.execute(
                "INSERT INTO meetings (title, description, meeting_type, location, meeting_link,
                    start_time, end_time, status, priority, is_private, organisation_id,
                    department_id, task_id, organizer_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'scheduled', ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
                params![
                    new.title,
                    new.description,
                    new.meeting_type.as_str(),
                    new.location,
                    new.meeting_link,
                    new.start_time,
                    new.end_time,
                    new.priority.as_str(),
                    new.is_private,
                    new.organisation_id,
                    new.department_id,
                    new.task_id,
                    new.organizer_id,
                    now
                ],
            )?;
            let id = tx.last_insert_rowid();
            let meeting =
                get_meeting_conn(tx, id)?.ok_or_else(|| StoreError::not_found("meeting", id))?;
            invite(tx, &meeting, &new.attendee_ids)?;

            let mut stmt = tx.prepare(
                "INSERT INTO meeting_agenda (meeting_id, title, description, duration_minutes, position)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (position, item) in new.agenda.iter().enumerate() {
                stmt.execute(params![
                    id,
                    item.title,
                    item.description,
                    item.duration_minutes,
                    position as i64
                ])?;
            }
            Ok(meeting)
        })
    }

    pub fn get_meeting(&self, id: i64) -> Result<Option<Meeting>> {
        self.with_conn(|conn| get_meeting_conn(conn, id))
    }

    /// Meetings visible to `user`: the whole organisation for admins, otherwise
    /// the ones they organise or attend.
    pub fn list_meetings_for(
        &self,
        user: &User,
        filter: &MeetingFilter,
        now: DateTime<Utc>,
    ) -> Result<(Vec<Meeting>, i64)> {
        let (view, order) = match filter.view {
            MeetingView::Upcoming => (
                "m.start_time > ?3 AND m.status = 'scheduled'",
                "m.start_time ASC, m.id ASC",
            ),
            MeetingView::Past => (
                "(m.end_time < ?3 OR m.status IN ('completed', 'cancelled'))",
                "m.start_time DESC, m.id DESC",
            ),
            MeetingView::All => ("1 = 1", "m.start_time DESC, m.id DESC"),
        };
        let where_clause = format!(
            "m.organisation_id = ?1
             AND (?2 OR m.organizer_id = ?4
                  OR EXISTS (SELECT 1 FROM meeting_attendees a WHERE a.meeting_id = m.id AND a.user_id = ?4))
             AND {view}
             AND (?5 IS NULL OR m.status = ?5)
             AND (?6 IS NULL OR m.meeting_type = ?6)
             AND (?7 IS NULL OR m.title LIKE ?7 ESCAPE '\\' OR m.description LIKE ?7 ESCAPE '\\')"
        );
        let status = filter.status.map(|s| s.as_str());
        let kind = filter.meeting_type.map(|t| t.as_str());
        let search = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(like_pattern);
        let offset = page_offset(filter.page, filter.per_page);

        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM meetings m WHERE {where_clause}"),
                params![user.organisation_id, user.is_admin(), now, user.id, status, kind, search],
                |row| row.get(0),
            )?;
            let sql = format!(
                "SELECT {MEETING_COLUMNS} FROM meetings m WHERE {where_clause}
                 ORDER BY {order} LIMIT ?8 OFFSET ?9"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params![
                    user.organisation_id,
                    user.is_admin(),
                    now,
                    user.id,
                    status,
                    kind,
                    search,
                    filter.per_page,
                    offset
                ],
                map_meeting,
            )?;
            Ok((rows.collect::<rusqlite::Result<Vec<_>>>()?, total))
        })
    }

    /// Applies an edit. Returns the updated meeting and any newly invited attendees.
    pub fn update_meeting(&self, id: i64, update: &MeetingUpdate) -> Result<(Meeting, Vec<i64>)> {
        self.with_tx(|tx| {
            let meeting =
                get_meeting_conn(tx, id)?.ok_or_else(|| StoreError::not_found("meeting", id))?;
            tx.execute(
                "UPDATE meetings SET
                    title = COALESCE(?2, title),
                    description = COALESCE(?3, description),
                    meeting_type = COALESCE(?4, meeting_type),
                    location = COALESCE(?5, location),
                    meeting_link = COALESCE(?6, meeting_link),
                    start_time = COALESCE(?7, start_time),
                    end_time = COALESCE(?8, end_time),
                    status = COALESCE(?9, status),
                    priority = COALESCE(?10, priority),
                    is_private = COALESCE(?11, is_private),
                    updated_at = ?12
                 WHERE id = ?1",
                params![
                    id,
                    update.title,
                    update.description,
                    update.meeting_type.map(|t| t.as_str()),
                    update.location,
                    update.meeting_link,
                    update.start_time,
                    update.end_time,
                    update.status.map(|s| s.as_str()),
                    update.priority.map(|p| p.as_str()),
                    update.is_private,
                    Utc::now()
                ],
            )?;

            let mut added = Vec::new();
            if let Some(wanted) = &update.attendee_ids {
                let current = attendee_ids_conn(tx, id)?;
                for removed in current.iter().filter(|uid| !wanted.contains(uid)) {
                    tx.execute(
                        "DELETE FROM meeting_attendees WHERE meeting_id = ?1 AND user_id = ?2",
                        params![id, removed],
                    )?;
                }
                added = invite(tx, &meeting, wanted)?;
            }

            let meeting =
                get_meeting_conn(tx, id)?.ok_or_else(|| StoreError::not_found("meeting", id))?;
            Ok((meeting, added))
        })
    }

    pub fn delete_meeting(&self, id: i64) -> Result<()> {
        self.with_conn(|conn| {
            if conn.execute("DELETE FROM meetings WHERE id = ?1", params![id])? == 0 {
                return Err(StoreError::not_found("meeting", id));
            }
            Ok(())
        })
    }

    pub fn meeting_attendees(&self, meeting_id: i64) -> Result<Vec<MeetingAttendee>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT meeting_id, user_id, status, responded_at FROM meeting_attendees
                 WHERE meeting_id = ?1 ORDER BY user_id",
            )?;
            let rows = stmt.query_map(params![meeting_id], map_attendee)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Records an attendee's reply. Fails with `NotFound` for non-attendees.
    pub fn respond_to_meeting(
        &self,
        meeting_id: i64,
        user_id: i64,
        response: AttendanceResponse,
    ) -> Result<MeetingAttendee> {
        if !response.is_reply() {
            return Err(StoreError::InvalidOperation(
                "pending is not a valid response".into(),
            ));
        }
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE meeting_attendees SET status = ?3, responded_at = ?4
                 WHERE meeting_id = ?1 AND user_id = ?2",
                params![meeting_id, user_id, response.as_str(), Utc::now()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!(
                    "attendee {user_id} of meeting {meeting_id}"
                )));
            }
            Ok(conn.query_row(
                "SELECT meeting_id, user_id, status, responded_at FROM meeting_attendees
                 WHERE meeting_id = ?1 AND user_id = ?2",
                params![meeting_id, user_id],
                map_attendee,
            )?)
        })
    }

    pub fn meeting_agenda(&self, meeting_id: i64) -> Result<Vec<AgendaItem>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, meeting_id, title, description, duration_minutes, position, is_completed
                 FROM meeting_agenda WHERE meeting_id = ?1 ORDER BY position, id",
            )?;
            let rows = stmt.query_map(params![meeting_id], |row| {
                Ok(AgendaItem {
                    id: row.get(0)?,
                    meeting_id: row.get(1)?,
                    title: row.get(2)?,
                    description: row.get(3)?,
                    duration_minutes: row.get(4)?,
                    position: row.get(5)?,
                    is_completed: row.get(6)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    pub fn add_meeting_note(
        &self,
        meeting_id: i64,
        author_id: i64,
        content: &str,
        note_type: NoteType,
    ) -> Result<MeetingNote> {
        self.with_conn(|conn| {
            let now = Utc::now();
            conn.execute(
                "INSERT INTO meeting_notes (meeting_id, content, note_type, created_by_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![meeting_id, content, note_type.as_str(), author_id, now],
            )?;
            Ok(MeetingNote {
                id: conn.last_insert_rowid(),
                meeting_id,
                content: content.to_string(),
                note_type,
                created_by_id: Some(author_id),
                created_at: now,
            })
        })
    }

    pub fn meeting_notes(&self, meeting_id: i64) -> Result<Vec<MeetingNote>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, meeting_id, content, note_type, created_by_id, created_at
                 FROM meeting_notes WHERE meeting_id = ?1 ORDER BY created_at, id",
            )?;
            let rows = stmt.query_map(params![meeting_id], |row| {
                Ok(MeetingNote {
                    id: row.get(0)?,
                    meeting_id: row.get(1)?,
                    content: row.get(2)?,
                    note_type: parse_column(3, row.get(3)?)?,
                    created_by_id: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }
}
