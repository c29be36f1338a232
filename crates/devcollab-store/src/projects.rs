use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use devcollab_core::ids::{BoardId, ColumnId, ProjectId, UserId};
use devcollab_core::status::WorkStatus;
use devcollab_core::timer::PomodoroTimer;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, fmt_time, TIMER_COLUMNS};

const TABLE: &str = "projects";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRow {
    pub id: ProjectId,
    pub name: String,
    pub description: Option<String>,
    pub board_id: BoardId,
    #[serde(rename = "boardColumnId")]
    pub column_id: ColumnId,
    pub owner_id: Option<UserId>,
    pub status: WorkStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub timer: PomodoroTimer,
}

impl ProjectRow {
    /// Move to `status`, stamping or clearing the completion time.
    pub fn set_status(&mut self, status: WorkStatus, now: DateTime<Utc>) {
        self.completed_at = status.completed_at(self.completed_at, now);
        self.status = status;
    }

    fn from_row(row: &rusqlite::Row<'_>) -> Result<Self, StoreError> {
        let status: String = row_helpers::get(row, 6, TABLE, "status")?;
        Ok(Self {
            id: ProjectId::from_raw(row_helpers::get::<String>(row, 0, TABLE, "id")?),
            name: row_helpers::get(row, 1, TABLE, "name")?,
            description: row_helpers::get_opt(row, 2, TABLE, "description")?,
            board_id: BoardId::from_raw(row_helpers::get::<String>(row, 3, TABLE, "board_id")?),
            column_id: ColumnId::from_raw(row_helpers::get::<String>(row, 4, TABLE, "column_id")?),
            owner_id: row_helpers::get_opt::<String>(row, 5, TABLE, "owner_id")?.map(UserId::from_raw),
            status: row_helpers::parse_enum(&status, TABLE, "status")?,
            created_at: row_helpers::get_time(row, 7, TABLE, "created_at")?,
            completed_at: row_helpers::get_time_opt(row, 8, TABLE, "completed_at")?,
            timer: row_helpers::timer_from_row(row, 9, TABLE)?,
        })
    }
}

/// Fields supplied when creating a project.
#[derive(Clone, Debug)]
pub struct NewProject {
    pub name: String,
    pub description: Option<String>,
    pub board_id: BoardId,
    pub column_id: ColumnId,
    pub owner_id: Option<UserId>,
    pub status: WorkStatus,
    pub estimated_pomodoros: i64,
}

pub struct ProjectRepo {
    db: Database,
}

impl ProjectRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, new), fields(name = %new.name, board_id = %new.board_id))]
    pub fn create(&self, new: NewProject) -> Result<ProjectRow, StoreError> {
        let now = row_helpers::now();
        let project = ProjectRow {
            id: ProjectId::new(),
            name: new.name,
            description: new.description,
            board_id: new.board_id,
            column_id: new.column_id,
            owner_id: new.owner_id,
            status: new.status,
            created_at: now,
            completed_at: new.status.completed_at(None, now),
            timer: PomodoroTimer::with_estimate(new.estimated_pomodoros),
        };
        self.db.with_conn(|conn| {
            let mut params: Vec<rusqlite::types::Value> = vec![
                project.id.as_str().to_string().into(),
                project.name.clone().into(),
                project.description.clone().into(),
                project.board_id.as_str().to_string().into(),
                project.column_id.as_str().to_string().into(),
                project.owner_id.as_ref().map(|id| id.as_str().to_string()).into(),
                project.status.to_string().into(),
                fmt_time(&project.created_at).into(),
                project.completed_at.as_ref().map(fmt_time).into(),
            ];
            params.extend(row_helpers::timer_values(&project.timer));
            conn.execute(
                &format!(
                    "INSERT INTO projects (id, name, description, board_id, column_id, owner_id, status,
                     created_at, completed_at, {TIMER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, {})",
                    row_helpers::timer_placeholders(10)
                ),
                rusqlite::params_from_iter(params),
            )?;
            Ok(())
        })?;
        Ok(project)
    }

    #[instrument(skip(self), fields(project_id = %id))]
    pub fn get(&self, id: &ProjectId) -> Result<ProjectRow, StoreError> {
        self.query("WHERE id = ?1", &[&id.as_str()])?
            .pop()
            .ok_or_else(|| StoreError::NotFound(format!("project {id}")))
    }

    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<ProjectRow>, StoreError> {
        self.query("ORDER BY created_at", &[])
    }

    #[instrument(skip(self), fields(board_id = %board_id))]
    pub fn list_by_board(&self, board_id: &BoardId) -> Result<Vec<ProjectRow>, StoreError> {
        self.query("WHERE board_id = ?1 ORDER BY created_at", &[&board_id.as_str()])
    }

    #[instrument(skip(self), fields(owner_id = %owner_id))]
    pub fn list_by_owner(&self, owner_id: &UserId) -> Result<Vec<ProjectRow>, StoreError> {
        self.query("WHERE owner_id = ?1 ORDER BY created_at", &[&owner_id.as_str()])
    }

    /// Save every mutable field of the project.
    #[instrument(skip(self, project), fields(project_id = %project.id))]
    pub fn update(&self, project: &ProjectRow) -> Result<(), StoreError> {
        self.db.with_conn(|conn| update_row(conn, project))
    }

    /// Delete a project with its tasks, subtasks and session logs.
    #[instrument(skip(self), fields(project_id = %id))]
    pub fn delete(&self, id: &ProjectId) -> Result<(), StoreError> {
        let changed = self
            .db
            .with_conn(|conn| Ok(conn.execute("DELETE FROM projects WHERE id = ?1", [id.as_str()])?))?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("project {id}")));
        }
        Ok(())
    }

    /// Seconds on the project plus the combined time of its tasks.
    ///
    /// Loose subtasks are not added: their time is banked on the project
    /// directly when their timer stops.
    #[instrument(skip(self), fields(project_id = %id))]
    pub fn combined_seconds(&self, id: &ProjectId) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT p.total_seconds_spent
                    + COALESCE((SELECT SUM(t.total_seconds_spent) FROM tasks t WHERE t.project_id = p.id), 0)
                    + COALESCE((SELECT SUM(s.total_seconds_spent) FROM subtasks s
                                JOIN tasks t ON s.task_id = t.id WHERE t.project_id = p.id), 0)
                 FROM projects p WHERE p.id = ?1",
                [id.as_str()],
                |row| row.get(0),
            )
            .map_err(|_| StoreError::NotFound(format!("project {id}")))
        })
    }

    fn query(&self, clause: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<ProjectRow>, StoreError> {
        self.db.with_conn(|conn| select(conn, clause, params))
    }
}

fn select(
    conn: &Connection,
    clause: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<ProjectRow>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, name, description, board_id, column_id, owner_id, status, created_at,
         completed_at, {TIMER_COLUMNS} FROM projects {clause}"
    ))?;
    let mut rows = stmt.query(params)?;
    let mut projects = Vec::new();
    while let Some(row) = rows.next()? {
        projects.push(ProjectRow::from_row(row)?);
    }
    Ok(projects)
}

pub(crate) fn load(conn: &Connection, id: &ProjectId) -> Result<ProjectRow, StoreError> {
    select(conn, "WHERE id = ?1", &[&id.as_str()])?
        .pop()
        .ok_or_else(|| StoreError::NotFound(format!("project {id}")))
}

pub(crate) fn update_row(conn: &Connection, project: &ProjectRow) -> Result<(), StoreError> {
    let mut params: Vec<rusqlite::types::Value> = vec![
        project.id.as_str().to_string().into(),
        project.name.clone().into(),
        project.description.clone().into(),
        project.board_id.as_str().to_string().into(),
        project.column_id.as_str().to_string().into(),
        project.status.to_string().into(),
        project.completed_at.as_ref().map(fmt_time).into(),
    ];
    params.extend(row_helpers::timer_values(&project.timer));
    let changed = conn.execute(
        &format!(
            "UPDATE projects SET name = ?2, description = ?3, board_id = ?4, column_id = ?5,
             status = ?6, completed_at = ?7, {} WHERE id = ?1",
            row_helpers::timer_assignments(8)
        ),
        rusqlite::params_from_iter(params),
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound(format!("project {}", project.id)));
    }
    Ok(())
}
