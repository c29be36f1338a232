use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use devcollab_core::ids::{ProjectId, SubtaskId, TaskId};
use devcollab_core::timer::PomodoroTimer;

use crate::database::Database;
use crate::error::StoreError;
use crate::projects::{self, ProjectRow};
use crate::row_helpers::{self, fmt_time, TIMER_COLUMNS};

const TABLE: &str = "subtasks";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtaskRow {
    pub id: SubtaskId,
    pub project_id: ProjectId,
    pub task_id: Option<TaskId>,
    pub name: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub timer: PomodoroTimer,
}

impl SubtaskRow {
    fn from_row(row: &rusqlite::Row<'_>) -> Result<Self, StoreError> {
        Ok(Self {
            id: SubtaskId::from_raw(row_helpers::get::<String>(row, 0, TABLE, "id")?),
            project_id: ProjectId::from_raw(row_helpers::get::<String>(row, 1, TABLE, "project_id")?),
            task_id: row_helpers::get_opt::<String>(row, 2, TABLE, "task_id")?.map(TaskId::from_raw),
            name: row_helpers::get(row, 3, TABLE, "name")?,
            completed: row_helpers::get(row, 4, TABLE, "completed")?,
            created_at: row_helpers::get_time(row, 5, TABLE, "created_at")?,
            timer: row_helpers::timer_from_row(row, 6, TABLE)?,
        })
    }
}

pub struct SubtaskRepo {
    db: Database,
}

impl SubtaskRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a subtask under a project, optionally attached to one of its tasks.
    #[instrument(skip(self), fields(project_id = %project_id, name))]
    pub fn create(
        &self,
        project_id: &ProjectId,
        task_id: Option<&TaskId>,
        name: &str,
        estimated_pomodoros: i64,
    ) -> Result<SubtaskRow, StoreError> {
        let subtask = SubtaskRow {
            id: SubtaskId::new(),
            project_id: project_id.clone(),
            task_id: task_id.cloned(),
            name: name.to_string(),
            completed: false,
            created_at: row_helpers::now(),
            timer: PomodoroTimer::with_estimate(estimated_pomodoros),
        };
        self.db.with_conn(|conn| {
            let mut params: Vec<rusqlite::types::Value> = vec![
                subtask.id.as_str().to_string().into(),
                subtask.project_id.as_str().to_string().into(),
                subtask.task_id.as_ref().map(|id| id.as_str().to_string()).into(),
                subtask.name.clone().into(),
                fmt_time(&subtask.created_at).into(),
            ];
            params.extend(row_helpers::timer_values(&subtask.timer));
            conn.execute(
                &format!(
                    "INSERT INTO subtasks (id, project_id, task_id, name, created_at, {TIMER_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, {})",
                    row_helpers::timer_placeholders(6)
                ),
                rusqlite::params_from_iter(params),
            )?;
            Ok(())
        })?;
        Ok(subtask)
    }

    #[instrument(skip(self), fields(subtask_id = %id))]
    pub fn get(&self, id: &SubtaskId) -> Result<SubtaskRow, StoreError> {
        self.db.with_conn(|conn| load(conn, id))
    }

    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<SubtaskRow>, StoreError> {
        self.query("ORDER BY created_at, id", &[])
    }

    #[instrument(skip(self), fields(task_id = %task_id))]
    pub fn list_by_task(&self, task_id: &TaskId) -> Result<Vec<SubtaskRow>, StoreError> {
        self.query("WHERE task_id = ?1 ORDER BY created_at, id", &[&task_id.as_str()])
    }

    /// Every subtask of a project, attached to a task or not.
    #[instrument(skip(self), fields(project_id = %project_id))]
    pub fn list_by_project(&self, project_id: &ProjectId) -> Result<Vec<SubtaskRow>, StoreError> {
        self.query("WHERE project_id = ?1 ORDER BY created_at, id", &[&project_id.as_str()])
    }

    #[instrument(skip(self, subtask), fields(subtask_id = %subtask.id))]
    pub fn save(&self, subtask: &SubtaskRow) -> Result<(), StoreError> {
        self.db.with_conn(|conn| update_row(conn, subtask))
    }

    /// Load a subtask and its project, let `f` change both, and save them in
    /// one transaction. Nothing is written when `f` fails.
    #[instrument(skip(self, f), fields(subtask_id = %id))]
    pub fn update_with_project<T, E, F>(&self, id: &SubtaskId, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut SubtaskRow, &mut ProjectRow) -> Result<T, E>,
        E: From<StoreError>,
    {
        self.db.transaction(|tx| {
            let mut subtask = load(tx, id)?;
            let mut project = projects::load(tx, &subtask.project_id)?;
            let value = f(&mut subtask, &mut project)?;
            update_row(tx, &subtask)?;
            projects::update_row(tx, &project)?;
            Ok(value)
        })
    }

    #[instrument(skip(self), fields(subtask_id = %id))]
    pub fn delete(&self, id: &SubtaskId) -> Result<(), StoreError> {
        let changed = self
            .db
            .with_conn(|conn| Ok(conn.execute("DELETE FROM subtasks WHERE id = ?1", [id.as_str()])?))?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("subtask {id}")));
        }
        Ok(())
    }

    fn query(&self, clause: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<SubtaskRow>, StoreError> {
        self.db.with_conn(|conn| select(conn, clause, params))
    }
}

pub(crate) fn select(
    conn: &Connection,
    clause: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<SubtaskRow>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, project_id, task_id, name, completed, created_at, {TIMER_COLUMNS}
         FROM subtasks {clause}"
    ))?;
    let mut rows = stmt.query(params)?;
    let mut subtasks = Vec::new();
    while let Some(row) = rows.next()? {
        subtasks.push(SubtaskRow::from_row(row)?);
    }
    Ok(subtasks)
}

pub(crate) fn load(conn: &Connection, id: &SubtaskId) -> Result<SubtaskRow, StoreError> {
    select(conn, "WHERE id = ?1", &[&id.as_str()])?
        .pop()
        .ok_or_else(|| StoreError::NotFound(format!("subtask {id}")))
}

pub(crate) fn update_row(conn: &Connection, subtask: &SubtaskRow) -> Result<(), StoreError> {
    let mut params: Vec<rusqlite::types::Value> = vec![
        subtask.id.as_str().to_string().into(),
        subtask.task_id.as_ref().map(|id| id.as_str().to_string()).into(),
        subtask.name.clone().into(),
        i64::from(subtask.completed).into(),
    ];
    params.extend(row_helpers::timer_values(&subtask.timer));
    let changed = conn.execute(
        &format!(
            "UPDATE subtasks SET task_id = ?2, name = ?3, completed = ?4, {} WHERE id = ?1",
            row_helpers::timer_assignments(5)
        ),
        rusqlite::params_from_iter(params),
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound(format!("subtask {}", subtask.id)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boards::BoardRepo;
    use crate::projects::{NewProject, ProjectRepo};
    use crate::schema;
    use crate::tasks::TaskRepo;
    use devcollab_core::status::WorkStatus;

    struct Fixture {
        db: Database,
        subtasks: SubtaskRepo,
        tasks: TaskRepo,
        project_id: ProjectId,
    }

    fn setup() -> Fixture {
        let db = Database::in_memory(schema::BOARD).unwrap();
        let board = BoardRepo::new(db.clone()).create("B", None, None, None).unwrap();
        let project = ProjectRepo::new(db.clone())
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
        Fixture {
            subtasks: SubtaskRepo::new(db.clone()),
            tasks: TaskRepo::new(db.clone()),
            db,
            project_id: project.id,
        }
    }

    #[test]
    fn create_with_and_without_task() {
        let f = setup();
        let task = f.tasks.create(&f.project_id, "t", None, 1).unwrap();
        let attached = f.subtasks.create(&f.project_id, Some(&task.id), "a", 2).unwrap();
        let loose = f.subtasks.create(&f.project_id, None, "b", 1).unwrap();
        assert!(attached.id.as_str().starts_with("sub_"));
        assert_eq!(f.subtasks.get(&attached.id).unwrap(), attached);
        assert!(loose.task_id.is_none());

        assert_eq!(f.subtasks.list_by_task(&task.id).unwrap().len(), 1);
        assert_eq!(f.subtasks.list_by_project(&f.project_id).unwrap().len(), 2);
        assert_eq!(f.subtasks.list().unwrap().len(), 2);
    }

    #[test]
    fn save_timer_and_completion() {
        let f = setup();
        let mut subtask = f.subtasks.create(&f.project_id, None, "s", 4).unwrap();
        subtask.completed = true;
        subtask.timer.start(row_helpers::now());
        f.subtasks.save(&subtask).unwrap();
        assert_eq!(f.subtasks.get(&subtask.id).unwrap(), subtask);
    }

    #[test]
    fn task_combined_seconds_includes_subtasks() {
        let f = setup();
        let task = f.tasks.create(&f.project_id, "t", None, 1).unwrap();
        for seconds in [60, 90] {
            let mut s = f.subtasks.create(&f.project_id, Some(&task.id), "s", 1).unwrap();
            s.timer.total_seconds_spent = seconds;
            f.subtasks.save(&s).unwrap();
        }
        assert_eq!(f.tasks.combined_seconds(&task.id).unwrap(), 150);
    }

    #[test]
    fn project_combined_seconds_rolls_up_tasks() {
        let f = setup();
        let projects = ProjectRepo::new(f.db.clone());
        let mut project = projects.get(&f.project_id).unwrap();
        project.timer.total_seconds_spent = 10;
        projects.update(&project).unwrap();

        let mut task = f.tasks.create(&f.project_id, "t", None, 1).unwrap();
        task.timer.total_seconds_spent = 100;
        f.tasks.save(&task).unwrap();
        let mut attached = f.subtasks.create(&f.project_id, Some(&task.id), "a", 1).unwrap();
        attached.timer.total_seconds_spent = 1000;
        f.subtasks.save(&attached).unwrap();
        let mut loose = f.subtasks.create(&f.project_id, None, "l", 1).unwrap();
        loose.timer.total_seconds_spent = 5;
        f.subtasks.save(&loose).unwrap();

        assert_eq!(projects.combined_seconds(&f.project_id).unwrap(), 1110);
    }

    #[test]
    fn deleting_task_removes_its_subtasks() {
        let f = setup();
        let task = f.tasks.create(&f.project_id, "t", None, 1).unwrap();
        let s = f.subtasks.create(&f.project_id, Some(&task.id), "s", 1).unwrap();
        f.tasks.delete(&task.id).unwrap();
        assert!(matches!(f.subtasks.get(&s.id), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn delete_missing_is_not_found() {
        let f = setup();
        let result = f.subtasks.delete(&SubtaskId::from_raw("sub_missing"));
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn update_with_project_saves_both() {
        let f = setup();
        let subtask = f.subtasks.create(&f.project_id, None, "s", 1).unwrap();
        f.subtasks
            .update_with_project(&subtask.id, |subtask, project| {
                subtask.timer.total_seconds_spent = 300;
                project.timer.total_seconds_spent += 300;
                Ok::<_, StoreError>(())
            })
            .unwrap();
        let projects = ProjectRepo::new(f.db.clone());
        assert_eq!(f.subtasks.get(&subtask.id).unwrap().timer.total_seconds_spent, 300);
        assert_eq!(projects.get(&f.project_id).unwrap().timer.total_seconds_spent, 300);
    }

    #[test]
    fn refused_update_writes_neither_row() {
        let f = setup();
        let subtask = f.subtasks.create(&f.project_id, None, "s", 1).unwrap();
        let result: Result<(), StoreError> = f.subtasks.update_with_project(&subtask.id, |subtask, project| {
            subtask.completed = true;
            project.timer.total_seconds_spent = 99;
            Err(StoreError::NotFound("not yours".into()))
        });
        assert!(result.is_err());

        // Project row missing: the subtask write ran first and must roll back.
        let result = f.subtasks.update_with_project(&subtask.id, |subtask, project| {
            subtask.completed = true;
            project.id = ProjectId::from_raw("proj_gone");
            Ok::<_, StoreError>(())
        });
        assert!(matches!(result, Err(StoreError::NotFound(_))));

        let projects = ProjectRepo::new(f.db.clone());
        assert!(!f.subtasks.get(&subtask.id).unwrap().completed);
        assert_eq!(projects.get(&f.project_id).unwrap().timer.total_seconds_spent, 0);
    }
}
