use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use devcollab_core::ids::{ProjectId, SubtaskId, TaskId, TimeEntryId, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, fmt_time};

const TABLE: &str = "time_entries";
const COLUMNS: &str = "id, user_id, project_id, task_id, subtask_id, description, tags, \
     start_time, end_time, pomodoro, billable";

/// A tracked span of time, optionally linked to any level of the hierarchy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntryRow {
    pub id: TimeEntryId,
    pub user_id: Option<UserId>,
    pub project_id: Option<ProjectId>,
    pub task_id: Option<TaskId>,
    pub subtask_id: Option<SubtaskId>,
    pub description: Option<String>,
    pub tags: BTreeSet<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Created by a Pomodoro rather than by hand.
    pub pomodoro: bool,
    pub billable: bool,
}

impl TimeEntryRow {
    pub fn is_running(&self) -> bool {
        self.start.is_some() && self.end.is_none()
    }

    fn from_row(row: &rusqlite::Row<'_>) -> Result<Self, StoreError> {
        let tags: String = row_helpers::get(row, 6, TABLE, "tags")?;
        Ok(Self {
            id: TimeEntryId::from_raw(row_helpers::get::<String>(row, 0, TABLE, "id")?),
            user_id: row_helpers::get_opt::<String>(row, 1, TABLE, "user_id")?.map(UserId::from_raw),
            project_id: row_helpers::get_opt::<String>(row, 2, TABLE, "project_id")?
                .map(ProjectId::from_raw),
            task_id: row_helpers::get_opt::<String>(row, 3, TABLE, "task_id")?.map(TaskId::from_raw),
            subtask_id: row_helpers::get_opt::<String>(row, 4, TABLE, "subtask_id")?
                .map(SubtaskId::from_raw),
            description: row_helpers::get_opt(row, 5, TABLE, "description")?,
            tags: row_helpers::parse_json(&tags, TABLE, "tags")?,
            start: row_helpers::get_time_opt(row, 7, TABLE, "start_time")?,
            end: row_helpers::get_time_opt(row, 8, TABLE, "end_time")?,
            pomodoro: row_helpers::get(row, 9, TABLE, "pomodoro")?,
            billable: row_helpers::get(row, 10, TABLE, "billable")?,
        })
    }

    fn params(&self) -> Result<[rusqlite::types::Value; 11], StoreError> {
        use rusqlite::types::Value;
        let id = |v: Option<&str>| -> Value { v.map(str::to_string).into() };
        Ok([
            Value::Text(self.id.as_str().to_string()),
            id(self.user_id.as_ref().map(UserId::as_str)),
            id(self.project_id.as_ref().map(ProjectId::as_str)),
            id(self.task_id.as_ref().map(TaskId::as_str)),
            id(self.subtask_id.as_ref().map(SubtaskId::as_str)),
            self.description.clone().into(),
            Value::Text(serde_json::to_string(&self.tags)?),
            self.start.as_ref().map(fmt_time).into(),
            self.end.as_ref().map(fmt_time).into(),
            Value::Integer(i64::from(self.pomodoro)),
            Value::Integer(i64::from(self.billable)),
        ])
    }
}

/// Fields supplied when creating a time entry.
#[derive(Clone, Debug, Default)]
pub struct NewTimeEntry {
    pub user_id: Option<UserId>,
    pub project_id: Option<ProjectId>,
    pub task_id: Option<TaskId>,
    pub subtask_id: Option<SubtaskId>,
    pub description: Option<String>,
    pub tags: BTreeSet<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub pomodoro: bool,
    pub billable: bool,
}

pub struct TimeEntryRepo {
    db: Database,
}

impl TimeEntryRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, new))]
    pub fn create(&self, new: NewTimeEntry) -> Result<TimeEntryRow, StoreError> {
        let entry = TimeEntryRow {
            id: TimeEntryId::new(),
            user_id: new.user_id,
            project_id: new.project_id,
            task_id: new.task_id,
            subtask_id: new.subtask_id,
            description: new.description,
            tags: new.tags,
            start: new.start,
            end: new.end,
            pomodoro: new.pomodoro,
            billable: new.billable,
        };
        let params = entry.params()?;
        self.db.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO time_entries ({COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                ),
                rusqlite::params_from_iter(params),
            )?;
            Ok(())
        })?;
        Ok(entry)
    }

    #[instrument(skip(self), fields(entry_id = %id))]
    pub fn get(&self, id: &TimeEntryId) -> Result<TimeEntryRow, StoreError> {
        self.query("WHERE id = ?1", &[&id.as_str()])?
            .pop()
            .ok_or_else(|| StoreError::NotFound(format!("time entry {id}")))
    }

    #[instrument(skip(self, entry), fields(entry_id = %entry.id))]
    pub fn save(&self, entry: &TimeEntryRow) -> Result<(), StoreError> {
        let params = entry.params()?;
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE time_entries SET user_id = ?2, project_id = ?3, task_id = ?4, subtask_id = ?5,
                 description = ?6, tags = ?7, start_time = ?8, end_time = ?9, pomodoro = ?10,
                 billable = ?11 WHERE id = ?1",
                rusqlite::params_from_iter(params),
            )?)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("time entry {}", entry.id)));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(entry_id = %id))]
    pub fn delete(&self, id: &TimeEntryId) -> Result<(), StoreError> {
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM time_entries WHERE id = ?1", [id.as_str()])?)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("time entry {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn list_by_user(&self, user_id: &UserId) -> Result<Vec<TimeEntryRow>, StoreError> {
        self.query("WHERE user_id = ?1 ORDER BY start_time", &[&user_id.as_str()])
    }

    /// Entries a user started in `[from, to)`, oldest first.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn list_by_user_started_between(
        &self,
        user_id: &UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TimeEntryRow>, StoreError> {
        self.query(
            "WHERE user_id = ?1 AND start_time >= ?2 AND start_time < ?3 ORDER BY start_time",
            &[&user_id.as_str(), &fmt_time(&from), &fmt_time(&to)],
        )
    }

    /// Entries of a user that were started and not yet ended.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn list_active_by_user(&self, user_id: &UserId) -> Result<Vec<TimeEntryRow>, StoreError> {
        self.query(
            "WHERE user_id = ?1 AND start_time IS NOT NULL AND end_time IS NULL ORDER BY start_time",
            &[&user_id.as_str()],
        )
    }

    fn query(
        &self,
        clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<TimeEntryRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM time_entries {clause}"))?;
            let mut rows = stmt.query(params)?;
            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                entries.push(TimeEntryRow::from_row(row)?);
            }
            Ok(entries)
        })
    }
}
