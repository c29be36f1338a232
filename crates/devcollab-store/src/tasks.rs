use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use devcollab_core::ids::{ProjectId, TaskId};
use devcollab_core::status::WorkStatus;
use devcollab_core::timer::PomodoroTimer;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, fmt_time, TIMER_COLUMNS};

const TABLE: &str = "tasks";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRow {
    pub id: TaskId,
    pub project_id: ProjectId,
    pub name: String,
    pub description: Option<String>,
    pub status: WorkStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub timer: PomodoroTimer,
}

impl TaskRow {
    pub fn set_status(&mut self, status: WorkStatus, now: DateTime<Utc>) {
        self.completed_at = status.completed_at(self.completed_at, now);
        self.status = status;
    }

    fn from_row(row: &rusqlite::Row<'_>) -> Result<Self, StoreError> {
        let status: String = row_helpers::get(row, 4, TABLE, "status")?;
        Ok(Self {
            id: TaskId::from_raw(row_helpers::get::<String>(row, 0, TABLE, "id")?),
            project_id: ProjectId::from_raw(row_helpers::get::<String>(row, 1, TABLE, "project_id")?),
            name: row_helpers::get(row, 2, TABLE, "name")?,
            description: row_helpers::get_opt(row, 3, TABLE, "description")?,
            status: row_helpers::parse_enum(&status, TABLE, "status")?,
            created_at: row_helpers::get_time(row, 5, TABLE, "created_at")?,
            completed_at: row_helpers::get_time_opt(row, 6, TABLE, "completed_at")?,
            timer: row_helpers::timer_from_row(row, 7, TABLE)?,
        })
    }
}

pub struct TaskRepo {
    db: Database,
}

impl TaskRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(project_id = %project_id, name))]
    pub fn create(
        &self,
        project_id: &ProjectId,
        name: &str,
        description: Option<&str>,
        estimated_pomodoros: i64,
    ) -> Result<TaskRow, StoreError> {
        let task = TaskRow {
            id: TaskId::new(),
            project_id: project_id.clone(),
            name: name.to_string(),
            description: description.map(str::to_string),
            status: WorkStatus::Todo,
            created_at: row_helpers::now(),
            completed_at: None,
            timer: PomodoroTimer::with_estimate(estimated_pomodoros),
        };
        self.db.with_conn(|conn| {
            let mut params: Vec<rusqlite::types::Value> = vec![
                task.id.as_str().to_string().into(),
                task.project_id.as_str().to_string().into(),
                task.name.clone().into(),
                task.description.clone().into(),
                task.status.to_string().into(),
                fmt_time(&task.created_at).into(),
            ];
            params.extend(row_helpers::timer_values(&task.timer));
            conn.execute(
                &format!(
                    "INSERT INTO tasks (id, project_id, name, description, status, created_at, {TIMER_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, {})",
                    row_helpers::timer_placeholders(7)
                ),
                rusqlite::params_from_iter(params),
            )?;
            Ok(())
        })?;
        Ok(task)
    }

    #[instrument(skip(self), fields(task_id = %id))]
    pub fn get(&self, id: &TaskId) -> Result<TaskRow, StoreError> {
        self.query("WHERE id = ?1", &[&id.as_str()])?
            .pop()
            .ok_or_else(|| StoreError::NotFound(format!("task {id}")))
    }

    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<TaskRow>, StoreError> {
        self.query("ORDER BY created_at", &[])
    }

    /// Tasks of a project, oldest first.
    #[instrument(skip(self), fields(project_id = %project_id))]
    pub fn list_by_project(&self, project_id: &ProjectId) -> Result<Vec<TaskRow>, StoreError> {
        self.query("WHERE project_id = ?1 ORDER BY created_at, id", &[&project_id.as_str()])
    }

    #[instrument(skip(self, task), fields(task_id = %task.id))]
    pub fn save(&self, task: &TaskRow) -> Result<(), StoreError> {
        let changed = self.db.with_conn(|conn| {
            let mut params: Vec<rusqlite::types::Value> = vec![
                task.id.as_str().to_string().into(),
                task.name.clone().into(),
                task.description.clone().into(),
                task.status.to_string().into(),
                task.completed_at.as_ref().map(fmt_time).into(),
            ];
            params.extend(row_helpers::timer_values(&task.timer));
            Ok(conn.execute(
                &format!(
                    "UPDATE tasks SET name = ?2, description = ?3, status = ?4, completed_at = ?5, {}
                     WHERE id = ?1",
                    row_helpers::timer_assignments(6)
                ),
                rusqlite::params_from_iter(params),
            )?)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("task {}", task.id)));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(task_id = %id))]
    pub fn delete(&self, id: &TaskId) -> Result<(), StoreError> {
        let changed = self
            .db
            .with_conn(|conn| Ok(conn.execute("DELETE FROM tasks WHERE id = ?1", [id.as_str()])?))?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("task {id}")));
        }
        Ok(())
    }

    /// Seconds on the task plus everything banked on its subtasks.
    #[instrument(skip(self), fields(task_id = %id))]
    pub fn combined_seconds(&self, id: &TaskId) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT t.total_seconds_spent
                    + COALESCE((SELECT SUM(s.total_seconds_spent) FROM subtasks s WHERE s.task_id = t.id), 0)
                 FROM tasks t WHERE t.id = ?1",
                [id.as_str()],
                |row| row.get(0),
            )
            .map_err(|_| StoreError::NotFound(format!("task {id}")))
        })
    }

    fn query(&self, clause: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<TaskRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT id, project_id, name, description, status, created_at, completed_at, {TIMER_COLUMNS}
                 FROM tasks {clause}"
            ))?;
            let mut rows = stmt.query(params)?;
            let mut tasks = Vec::new();
            while let Some(row) = rows.next()? {
                tasks.push(TaskRow::from_row(row)?);
            }
            Ok(tasks)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boards::BoardRepo;
    use crate::projects::{NewProject, ProjectRepo};
    use crate::schema;

    fn setup() -> (TaskRepo, ProjectRepo, ProjectId) {
        let db = Database::in_memory(schema::BOARD).unwrap();
        let board = BoardRepo::new(db.clone()).create("B", None, None, None).unwrap();
        let projects = ProjectRepo::new(db.clone());
        let project = projects
            .create(NewProject {
                name: "P".into(),
                description: None,
                board_id: board.id.clone(),
                column_id: board.columns[0].id.clone(),
                owner_id: None,
                status: WorkStatus::Todo,
                estimated_pomodoros: 1,
            })
            .unwrap();
        (TaskRepo::new(db), projects, project.id)
    }

    #[test]
    fn create_and_get() {
        let (repo, _, project_id) = setup();
        let task = repo.create(&project_id, "Write copy", Some("hero"), 3).unwrap();
        assert!(task.id.as_str().starts_with("task_"));
        assert_eq!(task.timer.estimated_pomodoros, 3);
        assert_eq!(repo.get(&task.id).unwrap(), task);
    }

    #[test]
    fn list_by_project_in_creation_order() {
        let (repo, _, project_id) = setup();
        let first = repo.create(&project_id, "one", None, 1).unwrap();
        let second = repo.create(&project_id, "two", None, 1).unwrap();
        let ids: Vec<_> = repo
            .list_by_project(&project_id)
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id]);
        assert_eq!(repo.list().unwrap().len(), 2);
    }

    #[test]
    fn save_round_trips() {
        let (repo, _, project_id) = setup();
        let mut task = repo.create(&project_id, "t", None, 1).unwrap();
        task.set_status(WorkStatus::Done, row_helpers::now());
        task.timer.completed_pomodoros = 2;
        task.timer.increment_cycle();
        repo.save(&task).unwrap();
        assert_eq!(repo.get(&task.id).unwrap(), task);
    }

    #[test]
    fn delete_and_project_cascade() {
        let (repo, projects, project_id) = setup();
        let a = repo.create(&project_id, "a", None, 1).unwrap();
        let b = repo.create(&project_id, "b", None, 1).unwrap();
        repo.delete(&a.id).unwrap();
        assert!(matches!(repo.delete(&a.id), Err(StoreError::NotFound(_))));
        projects.delete(&project_id).unwrap();
        assert!(repo.get(&b.id).is_err());
    }

    #[test]
    fn combined_seconds_without_subtasks() {
        let (repo, _, project_id) = setup();
        let mut task = repo.create(&project_id, "t", None, 1).unwrap();
        task.timer.total_seconds_spent = 120;
        repo.save(&task).unwrap();
        assert_eq!(repo.combined_seconds(&task.id).unwrap(), 120);
        assert!(repo.combined_seconds(&TaskId::from_raw("task_missing")).is_err());
    }
}
