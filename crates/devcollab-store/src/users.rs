use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use devcollab_core::ids::UserId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, fmt_time};

const TABLE: &str = "users";
const COLUMNS: &str = "id, email, name, password_hash, role, created_at";

pub const DEFAULT_ROLE: &str = "USER";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRow {
    pub id: UserId,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

impl UserRow {
    fn from_row(row: &rusqlite::Row<'_>) -> Result<Self, StoreError> {
        Ok(Self {
            id: UserId::from_raw(row_helpers::get::<String>(row, 0, TABLE, "id")?),
            email: row_helpers::get(row, 1, TABLE, "email")?,
            name: row_helpers::get(row, 2, TABLE, "name")?,
            password_hash: row_helpers::get(row, 3, TABLE, "password_hash")?,
            role: row_helpers::get(row, 4, TABLE, "role")?,
            created_at: row_helpers::get_time(row, 5, TABLE, "created_at")?,
        })
    }
}

pub struct UserRepo {
    db: Database,
}

impl UserRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a user. Emails are unique regardless of case.
    #[instrument(skip(self, password_hash))]
    pub fn create(&self, email: &str, name: &str, password_hash: &str) -> Result<UserRow, StoreError> {
        let user = UserRow {
            id: UserId::new(),
            email: email.trim().to_string(),
            name: name.to_string(),
            password_hash: password_hash.to_string(),
            role: DEFAULT_ROLE.to_string(),
            created_at: row_helpers::now(),
        };
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, name, password_hash, role, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    user.id.as_str(),
                    user.email,
                    user.name,
                    user.password_hash,
                    user.role,
                    fmt_time(&user.created_at),
                ],
            )?;
            Ok(())
        })?;
        Ok(user)
    }

    #[instrument(skip(self), fields(user_id = %id))]
    pub fn get(&self, id: &UserId) -> Result<UserRow, StoreError> {
        self.find_one("id = ?1", id.as_str())?
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))
    }

    #[instrument(skip(self))]
    pub fn find_by_email(&self, email: &str) -> Result<Option<UserRow>, StoreError> {
        self.find_one("email = ?1", email.trim())
    }

    #[instrument(skip(self))]
    pub fn exists_by_email(&self, email: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM users WHERE email = ?1",
                [email.trim()],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    /// Save name, email, password hash and role of an existing user.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub fn update(&self, user: &UserRow) -> Result<(), StoreError> {
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE users SET email = ?2, name = ?3, password_hash = ?4, role = ?5 WHERE id = ?1",
                rusqlite::params![
                    user.id.as_str(),
                    user.email.trim(),
                    user.name,
                    user.password_hash,
                    user.role,
                ],
            )?)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("user {}", user.id)));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %id))]
    pub fn delete(&self, id: &UserId) -> Result<(), StoreError> {
        let changed = self
            .db
            .with_conn(|conn| Ok(conn.execute("DELETE FROM users WHERE id = ?1", [id.as_str()])?))?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("user {id}")));
        }
        Ok(())
    }

    fn find_one(&self, predicate: &str, value: &str) -> Result<Option<UserRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM users WHERE {predicate}"))?;
            let mut rows = stmt.query([value])?;
            match rows.next()? {
                Some(row) => Ok(Some(UserRow::from_row(row)?)),
                None => Ok(None),
            }
        })
    }
}
