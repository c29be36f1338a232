use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use devcollab_core::habits::{Frequency, HabitProgress};
use devcollab_core::ids::{HabitId, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, fmt_time};

const TABLE: &str = "habits";
const COLUMNS: &str =
    "id, user_id, tag, frequency, max_quantity, current_quantity, done, date_done, created_at";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitRow {
    pub id: HabitId,
    pub user_id: UserId,
    pub tag: String,
    pub frequency: Frequency,
    #[serde(flatten)]
    pub progress: HabitProgress,
    pub created_at: DateTime<Utc>,
}

impl HabitRow {
    fn from_row(row: &rusqlite::Row<'_>) -> Result<Self, StoreError> {
        let frequency: String = row_helpers::get(row, 3, TABLE, "frequency")?;
        Ok(Self {
            id: HabitId::from_raw(row_helpers::get::<String>(row, 0, TABLE, "id")?),
            user_id: UserId::from_raw(row_helpers::get::<String>(row, 1, TABLE, "user_id")?),
            tag: row_helpers::get(row, 2, TABLE, "tag")?,
            frequency: row_helpers::parse_enum(&frequency, TABLE, "frequency")?,
            progress: HabitProgress {
                max_quantity: row_helpers::get(row, 4, TABLE, "max_quantity")?,
                current_quantity: row_helpers::get(row, 5, TABLE, "current_quantity")?,
                done: row_helpers::get(row, 6, TABLE, "done")?,
                date_done: row_helpers::get_date_opt(row, 7, TABLE, "date_done")?,
            },
            created_at: row_helpers::get_time(row, 8, TABLE, "created_at")?,
        })
    }
}

pub struct HabitRepo {
    db: Database,
}

impl HabitRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a habit with empty progress.
    #[instrument(skip(self), fields(user_id = %user_id, tag))]
    pub fn create(
        &self,
        user_id: &UserId,
        tag: &str,
        frequency: Frequency,
        max_quantity: i64,
    ) -> Result<HabitRow, StoreError> {
        let habit = HabitRow {
            id: HabitId::new(),
            user_id: user_id.clone(),
            tag: tag.to_string(),
            frequency,
            progress: HabitProgress::new(max_quantity),
            created_at: row_helpers::now(),
        };
        self.db.with_conn(|conn| {
            conn.execute(
                &format!("INSERT INTO habits ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
                rusqlite::params![
                    habit.id.as_str(),
                    habit.user_id.as_str(),
                    habit.tag,
                    habit.frequency.to_string(),
                    habit.progress.max_quantity,
                    habit.progress.current_quantity,
                    habit.progress.done,
                    habit.progress.date_done.map(|d| d.to_string()),
                    fmt_time(&habit.created_at),
                ],
            )?;
            Ok(())
        })?;
        Ok(habit)
    }

    #[instrument(skip(self), fields(habit_id = %id))]
    pub fn get(&self, id: &HabitId) -> Result<HabitRow, StoreError> {
        self.query("WHERE id = ?1", &[&id.as_str()])?
            .pop()
            .ok_or_else(|| StoreError::NotFound(format!("habit {id}")))
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn list_by_user(&self, user_id: &UserId) -> Result<Vec<HabitRow>, StoreError> {
        self.query("WHERE user_id = ?1 ORDER BY created_at, id", &[&user_id.as_str()])
    }

    #[instrument(skip(self, habit), fields(habit_id = %habit.id))]
    pub fn save(&self, habit: &HabitRow) -> Result<(), StoreError> {
        let changed = self.db.with_conn(|conn| update(conn, habit))?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("habit {}", habit.id)));
        }
        Ok(())
    }

    /// Save several habits in one transaction.
    #[instrument(skip(self, habits), fields(count = habits.len()))]
    pub fn save_all(&self, habits: &[HabitRow]) -> Result<(), StoreError> {
        self.db.with_tx(|tx| {
            for habit in habits {
                if update(tx, habit)? == 0 {
                    return Err(StoreError::NotFound(format!("habit {}", habit.id)));
                }
            }
            Ok(())
        })
    }

    #[instrument(skip(self), fields(habit_id = %id))]
    pub fn delete(&self, id: &HabitId) -> Result<(), StoreError> {
        let changed = self
            .db
            .with_conn(|conn| Ok(conn.execute("DELETE FROM habits WHERE id = ?1", [id.as_str()])?))?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("habit {id}")));
        }
        Ok(())
    }

    /// Delete every habit of a user, returning how many were removed.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn delete_all_by_user(&self, user_id: &UserId) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM habits WHERE user_id = ?1", [user_id.as_str()])?)
        })
    }

    fn query(&self, clause: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<HabitRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM habits {clause}"))?;
            let mut rows = stmt.query(params)?;
            let mut habits = Vec::new();
            while let Some(row) = rows.next()? {
                habits.push(HabitRow::from_row(row)?);
            }
            Ok(habits)
        })
    }
}

fn update(conn: &rusqlite::Connection, habit: &HabitRow) -> Result<usize, StoreError> {
    Ok(conn.execute(
        "UPDATE habits SET tag = ?2, frequency = ?3, max_quantity = ?4, current_quantity = ?5,
         done = ?6, date_done = ?7 WHERE id = ?1",
        rusqlite::params![
            habit.id.as_str(),
            habit.tag,
            habit.frequency.to_string(),
            habit.progress.max_quantity,
            habit.progress.current_quantity,
            habit.progress.done,
            habit.progress.date_done.map(|d| d.to_string()),
        ],
    )?)
}
