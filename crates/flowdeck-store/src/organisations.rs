//! Tenants, departments, users, roles and presence.

use chrono::{DateTime, NaiveDate, Utc};
use flowdeck_core::{
    ChannelType, Department, OnlineStatus, Organisation, RoleName, User, UserPreferences,
};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{conflict_on_unique, json_column, parse_column, Result, StoreError};
use crate::{like_pattern, Store};

#[derive(Debug, Clone)]
pub struct NewOrganisation {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub website: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub organisation_id: i64,
    pub department_id: Option<i64>,
    pub roles: Vec<RoleName>,
    pub job_title: Option<String>,
    pub is_email_verified: bool,
}

/// Self-service profile edits. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub job_title: Option<String>,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub preferences: Option<UserPreferences>,
}

/// Administrative edits. `department_id: Some(None)` clears the department.
#[derive(Debug, Clone, Default)]
pub struct AdminUserUpdate {
    pub name: Option<String>,
    pub job_title: Option<String>,
    pub department_id: Option<Option<i64>>,
    pub roles: Option<Vec<RoleName>>,
    pub is_active: Option<bool>,
}

const ORG_COLUMNS: &str =
    "id, name, email, phone, address, website, is_active, created_at";

const DEPARTMENT_COLUMNS: &str = "id, name, description, organisation_id, created_at";

pub(crate) const USER_COLUMNS: &str = "u.id, u.email, u.name, u.organisation_id, u.department_id,
    u.job_title, u.phone, u.bio, u.date_of_birth, u.is_active, u.is_email_verified,
    u.preferences, u.annual_leave_quota, u.sick_leave_quota, u.personal_leave_quota,
    u.last_login, u.created_at,
    (SELECT GROUP_CONCAT(r.name) FROM user_roles ur JOIN roles r ON r.id = ur.role_id
     WHERE ur.user_id = u.id) AS roles";

fn map_organisation(row: &Row<'_>) -> rusqlite::Result<Organisation> {
    Ok(Organisation {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        address: row.get(4)?,
        website: row.get(5)?,
        is_active: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn map_department(row: &Row<'_>) -> rusqlite::Result<Department> {
    Ok(Department {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        organisation_id: row.get(3)?,
        created_at: row.get(4)?,
    })
}

pub(crate) fn map_user(row: &Row<'_>) -> rusqlite::Result<User> {
    let roles: Option<String> = row.get(17)?;
    let roles = roles
        .unwrap_or_default()
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| parse_column::<RoleName>(17, s.to_string()))
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        organisation_id: row.get(3)?,
        department_id: row.get(4)?,
        job_title: row.get(5)?,
        phone: row.get(6)?,
        bio: row.get(7)?,
        date_of_birth: row.get(8)?,
        is_active: row.get(9)?,
        is_email_verified: row.get(10)?,
        preferences: json_column(11, row.get(11)?)?,
        annual_leave_quota: row.get(12)?,
        sick_leave_quota: row.get(13)?,
        personal_leave_quota: row.get(14)?,
        last_login: row.get(15)?,
        created_at: row.get(16)?,
        roles,
    })
}

pub(crate) fn get_user_conn(conn: &Connection, id: i64) -> Result<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = ?1");
    Ok(conn.query_row(&sql, params![id], map_user).optional()?)
}

fn insert_organisation(conn: &Connection, new: &NewOrganisation, now: DateTime<Utc>) -> Result<Organisation> {
    conn.execute(
        "INSERT INTO organisations (name, email, phone, address, website, is_active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
        params![new.name, new.email, new.phone, new.address, new.website, now],
    )
    .map_err(|e| conflict_on_unique(e, "An organisation with this email already exists"))?;
    let id = conn.last_insert_rowid();
    let sql = format!("SELECT {ORG_COLUMNS} FROM organisations WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], map_organisation)?)
}

fn replace_roles(conn: &Connection, user_id: i64, roles: &[RoleName]) -> Result<()> {
    conn.execute("DELETE FROM user_roles WHERE user_id = ?1", params![user_id])?;
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO user_roles (user_id, role_id)
         SELECT ?1, id FROM roles WHERE name = ?2",
    )?;
    for role in roles {
        stmt.execute(params![user_id, role.as_str()])?;
    }
    Ok(())
}

/// Adds the user to the team channel of `department_id`.
fn join_department_channel(conn: &Connection, user_id: i64, department_id: i64, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO channel_members (channel_id, user_id, joined_at)
         SELECT id, ?1, ?2 FROM chat_channels WHERE department_id = ?3 AND channel_type = ?4",
        params![user_id, now, department_id, ChannelType::Department.as_str()],
    )?;
    Ok(())
}

fn leave_department_channel(conn: &Connection, user_id: i64, department_id: i64) -> Result<()> {
    conn.execute(
        "DELETE FROM channel_members WHERE user_id = ?1 AND channel_id IN
         (SELECT id FROM chat_channels WHERE department_id = ?2 AND channel_type = ?3)",
        params![user_id, department_id, ChannelType::Department.as_str()],
    )?;
    Ok(())
}

fn insert_user(conn: &Connection, new: &NewUser, now: DateTime<Utc>) -> Result<User> {
    let preferences = serde_json::to_string(&UserPreferences::default())?;
    conn.execute(
        "INSERT INTO users (email, password_hash, name, organisation_id, department_id, job_title,
            is_active, is_email_verified, preferences, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8, ?9, ?9)",
        params![
            new.email,
            new.password_hash,
            new.name,
            new.organisation_id,
            new.department_id,
            new.job_title,
            new.is_email_verified,
            preferences,
            now
        ],
    )
    .map_err(|e| conflict_on_unique(e, "A user with this email already exists"))?;
    let id = conn.last_insert_rowid();

    replace_roles(conn, id, &new.roles)?;
    conn.execute(
        "INSERT INTO online_status (user_id, is_online, last_seen) VALUES (?1, 0, ?2)",
        params![id, now],
    )?;
    if let Some(department_id) = new.department_id {
        join_department_channel(conn, id, department_id, now)?;
    }

    get_user_conn(conn, id)?.ok_or_else(|| StoreError::not_found("user", id))
}

impl Store {
    pub fn create_organisation(&self, new: &NewOrganisation) -> Result<Organisation> {
        self.with_conn(|conn| insert_organisation(conn, new, Utc::now()))
    }

    /// Creates a tenant together with its first (admin) user.
    pub fn register_organisation(
        &self,
        org: &NewOrganisation,
        admin: impl FnOnce(i64) -> NewUser,
    ) -> Result<(Organisation, User)> {
        self.with_tx(|tx| {
            let now = Utc::now();
            let organisation = insert_organisation(tx, org, now)?;
            let user = insert_user(tx, &admin(organisation.id), now)?;
            Ok((organisation, user))
        })
    }

    pub fn get_organisation(&self, id: i64) -> Result<Option<Organisation>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {ORG_COLUMNS} FROM organisations WHERE id = ?1");
            Ok(conn.query_row(&sql, params![id], map_organisation).optional()?)
        })
    }

    pub fn list_organisations(&self) -> Result<Vec<Organisation>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {ORG_COLUMNS} FROM organisations ORDER BY id");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], map_organisation)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Creates a department and its "<name> - Team Chat" channel.
    pub fn create_department(
        &self,
        organisation_id: i64,
        name: &str,
        description: Option<&str>,
    ) -> Result<Department> {
        self.with_tx(|tx| {
            let now = Utc::now();
            tx.execute(
                "INSERT INTO departments (name, description, organisation_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![name, description, organisation_id, now],
            )
            .map_err(|e| conflict_on_unique(e, "A department with this name already exists"))?;
            let id = tx.last_insert_rowid();

            tx.execute(
                "INSERT INTO chat_channels (name, description, channel_type, organisation_id,
                    department_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    format!("{name} - Team Chat"),
                    format!("Team channel for {name}"),
                    ChannelType::Department.as_str(),
                    organisation_id,
                    id,
                    now
                ],
            )?;

            let sql = format!("SELECT {DEPARTMENT_COLUMNS} FROM departments WHERE id = ?1");
            Ok(tx.query_row(&sql, params![id], map_department)?)
        })
    }

    pub fn get_department(&self, id: i64) -> Result<Option<Department>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {DEPARTMENT_COLUMNS} FROM departments WHERE id = ?1");
            Ok(conn.query_row(&sql, params![id], map_department).optional()?)
        })
    }

    pub fn list_departments(&self, organisation_id: i64) -> Result<Vec<Department>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {DEPARTMENT_COLUMNS} FROM departments WHERE organisation_id = ?1 ORDER BY name"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![organisation_id], map_department)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    pub fn create_user(&self, new: &NewUser) -> Result<User> {
        self.with_tx(|tx| insert_user(tx, new, Utc::now()))
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.with_conn(|conn| get_user_conn(conn, id))
    }

    /// Returns the user and their password hash for credential checks.
    pub fn find_user_credentials(&self, email: &str) -> Result<Option<(User, String)>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {USER_COLUMNS}, u.password_hash FROM users u WHERE u.email = ?1 COLLATE NOCASE"
            );
            Ok(conn
                .query_row(&sql, params![email], |row| Ok((map_user(row)?, row.get(18)?)))
                .optional()?)
        })
    }

    pub fn password_hash(&self, user_id: i64) -> Result<String> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT password_hash FROM users WHERE id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("user", user_id))
        })
    }

    pub fn update_password(&self, user_id: i64, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET password_hash = ?2, updated_at = ?3 WHERE id = ?1",
                params![user_id, password_hash, Utc::now()],
            )?;
            if changed == 0 {
                return Err(StoreError::not_found("user", user_id));
            }
            Ok(())
        })
    }

    pub fn record_login(&self, user_id: i64, at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET last_login = ?2 WHERE id = ?1",
                params![user_id, at],
            )?;
            Ok(())
        })
    }

    pub fn update_profile(&self, user_id: i64, update: &ProfileUpdate) -> Result<User> {
        let preferences = update
            .preferences
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET
                    name = COALESCE(?2, name),
                    job_title = COALESCE(?3, job_title),
                    phone = COALESCE(?4, phone),
                    bio = COALESCE(?5, bio),
                    date_of_birth = COALESCE(?6, date_of_birth),
                    preferences = COALESCE(?7, preferences),
                    updated_at = ?8
                 WHERE id = ?1",
                params![
                    user_id,
                    update.name,
                    update.job_title,
                    update.phone,
                    update.bio,
                    update.date_of_birth,
                    preferences,
                    Utc::now()
                ],
            )?;
            get_user_conn(conn, user_id)?.ok_or_else(|| StoreError::not_found("user", user_id))
        })
    }

    /// Applies an admin edit; moving departments also moves team-channel membership.
    pub fn admin_update_user(&self, user_id: i64, update: &AdminUserUpdate) -> Result<User> {
        self.with_tx(|tx| {
            let now = Utc::now();
            let current =
                get_user_conn(tx, user_id)?.ok_or_else(|| StoreError::not_found("user", user_id))?;

            tx.execute(
                "UPDATE users SET
                    name = COALESCE(?2, name),
                    job_title = COALESCE(?3, job_title),
                    is_active = COALESCE(?4, is_active),
                    updated_at = ?5
                 WHERE id = ?1",
                params![user_id, update.name, update.job_title, update.is_active, now],
            )?;

            if let Some(department_id) = update.department_id {
                if department_id != current.department_id {
                    tx.execute(
                        "UPDATE users SET department_id = ?2 WHERE id = ?1",
                        params![user_id, department_id],
                    )?;
                    if let Some(old) = current.department_id {
                        leave_department_channel(tx, user_id, old)?;
                    }
                    if let Some(new) = department_id {
                        join_department_channel(tx, user_id, new, now)?;
                    }
                }
            }

            if let Some(roles) = &update.roles {
                replace_roles(tx, user_id, roles)?;
            }

            get_user_conn(tx, user_id)?.ok_or_else(|| StoreError::not_found("user", user_id))
        })
    }

    pub fn set_leave_quota(
        &self,
        user_id: i64,
        annual: i64,
        sick: i64,
        personal: i64,
        set_by: i64,
    ) -> Result<User> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET annual_leave_quota = ?2, sick_leave_quota = ?3,
                    personal_leave_quota = ?4, leave_quota_set_by_id = ?5, updated_at = ?6
                 WHERE id = ?1",
                params![user_id, annual, sick, personal, set_by, Utc::now()],
            )?;
            get_user_conn(conn, user_id)?.ok_or_else(|| StoreError::not_found("user", user_id))
        })
    }

    pub fn list_users(&self, organisation_id: i64) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {USER_COLUMNS} FROM users u WHERE u.organisation_id = ?1 ORDER BY u.name"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![organisation_id], map_user)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Active users of one tenant whose name or email contains `query`.
    pub fn search_users(&self, organisation_id: i64, query: &str, limit: u32) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {USER_COLUMNS} FROM users u
                 WHERE u.organisation_id = ?1 AND u.is_active = 1
                   AND (u.name LIKE ?2 ESCAPE '\\' OR u.email LIKE ?2 ESCAPE '\\')
                 ORDER BY u.name LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![organisation_id, like_pattern(query), limit], map_user)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    pub fn department_member_ids(&self, department_id: i64) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM users WHERE department_id = ?1 AND is_active = 1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![department_id], |row| row.get(0))?;
            Ok(rows.collect::<rusqlite::Result<Vec<i64>>>()?)
        })
    }

    pub fn set_online(&self, user_id: i64, online: bool, at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO online_status (user_id, is_online, last_seen) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET is_online = excluded.is_online,
                    last_seen = excluded.last_seen",
                params![user_id, online, at],
            )?;
            Ok(())
        })
    }

    pub fn online_statuses(&self, organisation_id: i64) -> Result<Vec<OnlineStatus>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT s.user_id, s.is_online, s.last_seen FROM online_status s
                 JOIN users u ON u.id = s.user_id
                 WHERE u.organisation_id = ?1 ORDER BY s.user_id",
            )?;
            let rows = stmt.query_map(params![organisation_id], |row| {
                Ok(OnlineStatus {
                    user_id: row.get(0)?,
                    is_online: row.get(1)?,
                    last_seen: row.get(2)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Marks everyone offline. Presence lives in sockets, which do not survive a restart.
    pub fn reset_presence(&self) -> Result<usize> {
        self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE online_status SET is_online = 0 WHERE is_online = 1",
                [],
            )?)
        })
    }
}
