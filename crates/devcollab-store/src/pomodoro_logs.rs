use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use devcollab_core::ids::{PomodoroLogId, ProjectId, SubtaskId, UserId};
use devcollab_core::pomodoro::{BreakType, SessionSample};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, fmt_time};
use crate::subtasks::{self, SubtaskRow};

const TABLE: &str = "pomodoro_logs";
const COLUMNS: &str = "l.id, l.subtask_id, l.user_id, l.start_time, l.end_time, l.pomodoros_used, \
     l.completed, l.distractions, l.notes, l.break_type, l.cycle_number, l.created_at";

/// One timer session on a subtask.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PomodoroLogRow {
    pub id: PomodoroLogId,
    pub subtask_id: SubtaskId,
    pub user_id: UserId,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub pomodoros_used: i64,
    pub completed: bool,
    pub distractions: i64,
    pub notes: Option<String>,
    pub break_type: BreakType,
    pub cycle_number: i64,
    pub created_at: DateTime<Utc>,
}

impl PomodoroLogRow {
    /// The analytics view of this session.
    pub fn sample(&self) -> SessionSample {
        SessionSample {
            start_time: self.start_time,
            end_time: self.end_time,
            completed: self.completed,
            distractions: self.distractions,
            pomodoros_used: self.pomodoros_used,
        }
    }

    fn open(subtask_id: &SubtaskId, user_id: &UserId, cycle_number: i64, start_time: DateTime<Utc>) -> Self {
        Self {
            id: PomodoroLogId::new(),
            subtask_id: subtask_id.clone(),
            user_id: user_id.clone(),
            start_time,
            end_time: None,
            pomodoros_used: 1,
            completed: false,
            distractions: 0,
            notes: None,
            break_type: BreakType::None,
            cycle_number,
            created_at: row_helpers::now(),
        }
    }

    fn from_row(row: &rusqlite::Row<'_>) -> Result<Self, StoreError> {
        let break_type: String = row_helpers::get(row, 9, TABLE, "break_type")?;
        Ok(Self {
            id: PomodoroLogId::from_raw(row_helpers::get::<String>(row, 0, TABLE, "id")?),
            subtask_id: SubtaskId::from_raw(row_helpers::get::<String>(row, 1, TABLE, "subtask_id")?),
            user_id: UserId::from_raw(row_helpers::get::<String>(row, 2, TABLE, "user_id")?),
            start_time: row_helpers::get_time(row, 3, TABLE, "start_time")?,
            end_time: row_helpers::get_time_opt(row, 4, TABLE, "end_time")?,
            pomodoros_used: row_helpers::get(row, 5, TABLE, "pomodoros_used")?,
            completed: row_helpers::get(row, 6, TABLE, "completed")?,
            distractions: row_helpers::get(row, 7, TABLE, "distractions")?,
            notes: row_helpers::get_opt(row, 8, TABLE, "notes")?,
            break_type: row_helpers::parse_enum(&break_type, TABLE, "break_type")?,
            cycle_number: row_helpers::get(row, 10, TABLE, "cycle_number")?,
            created_at: row_helpers::get_time(row, 11, TABLE, "created_at")?,
        })
    }
}

/// Result of [`PomodoroLogRepo::start_session`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionStart {
    Started { log: PomodoroLogRow, subtask: SubtaskRow },
    /// The user already has a session running; nothing was written.
    AlreadyActive,
}

pub struct PomodoroLogRepo {
    db: Database,
}

impl PomodoroLogRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Open a one-Pomodoro session starting at `start_time`.
    #[instrument(skip(self), fields(subtask_id = %subtask_id, user_id = %user_id))]
    pub fn create(
        &self,
        subtask_id: &SubtaskId,
        user_id: &UserId,
        cycle_number: i64,
        start_time: DateTime<Utc>,
    ) -> Result<PomodoroLogRow, StoreError> {
        let log = PomodoroLogRow::open(subtask_id, user_id, cycle_number, start_time);
        self.db.with_conn(|conn| insert_row(conn, &log))?;
        Ok(log)
    }

    #[instrument(skip(self), fields(log_id = %id))]
    pub fn get(&self, id: &PomodoroLogId) -> Result<PomodoroLogRow, StoreError> {
        self.db.with_conn(|conn| load(conn, id))
    }

    #[instrument(skip(self, log), fields(log_id = %log.id))]
    pub fn save(&self, log: &PomodoroLogRow) -> Result<(), StoreError> {
        self.db.with_conn(|conn| update_row(conn, log))
    }

    /// Open a session for `user_id` on a subtask and stamp the subtask's
    /// timer, unless the user already has an active session. The check and
    /// both writes share one transaction.
    #[instrument(skip(self), fields(subtask_id = %subtask_id, user_id = %user_id))]
    pub fn start_session(
        &self,
        subtask_id: &SubtaskId,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<SessionStart, StoreError> {
        self.db.with_tx(|tx| {
            let mut subtask = subtasks::load(tx, subtask_id)?;
            let running = select(tx, "WHERE l.user_id = ?1 AND l.completed = 0", &[&user_id.as_str()])?;
            if running.iter().any(|log| log.sample().is_active(now)) {
                return Ok(SessionStart::AlreadyActive);
            }
            let log = PomodoroLogRow::open(subtask_id, user_id, subtask.timer.current_cycle, now);
            insert_row(tx, &log)?;
            subtask.timer.pomodoro_start = Some(now);
            subtasks::update_row(tx, &subtask)?;
            Ok(SessionStart::Started { log, subtask })
        })
    }

    /// Load a log and its subtask, let `f` change both, and save them in one
    /// transaction. Nothing is written when `f` fails.
    #[instrument(skip(self, f), fields(log_id = %id))]
    pub fn update_with_subtask<T, E, F>(&self, id: &PomodoroLogId, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut PomodoroLogRow, &mut SubtaskRow) -> Result<T, E>,
        E: From<StoreError>,
    {
        self.db.transaction(|tx| {
            let mut log = load(tx, id)?;
            let mut subtask = subtasks::load(tx, &log.subtask_id)?;
            let value = f(&mut log, &mut subtask)?;
            update_row(tx, &log)?;
            subtasks::update_row(tx, &subtask)?;
            Ok(value)
        })
    }

    #[instrument(skip(self), fields(subtask_id = %subtask_id))]
    pub fn list_by_subtask(&self, subtask_id: &SubtaskId) -> Result<Vec<PomodoroLogRow>, StoreError> {
        self.query(
            "WHERE l.subtask_id = ?1 ORDER BY l.start_time DESC",
            &[&subtask_id.as_str()],
        )
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn list_by_user(&self, user_id: &UserId) -> Result<Vec<PomodoroLogRow>, StoreError> {
        self.query("WHERE l.user_id = ?1 ORDER BY l.start_time DESC", &[&user_id.as_str()])
    }

    /// Sessions a user started within `[from, to)`, newest first.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn list_by_user_in_range(
        &self,
        user_id: &UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PomodoroLogRow>, StoreError> {
        self.query(
            "WHERE l.user_id = ?1 AND l.start_time >= ?2 AND l.start_time < ?3 ORDER BY l.start_time DESC",
            &[&user_id.as_str(), &fmt_time(&from), &fmt_time(&to)],
        )
    }

    /// Sessions on any subtask of a project started after `since`.
    #[instrument(skip(self), fields(project_id = %project_id))]
    pub fn list_recent_by_project(
        &self,
        project_id: &ProjectId,
        since: DateTime<Utc>,
    ) -> Result<Vec<PomodoroLogRow>, StoreError> {
        self.query(
            "JOIN subtasks s ON s.id = l.subtask_id
             WHERE s.project_id = ?1 AND l.start_time > ?2 ORDER BY l.start_time DESC",
            &[&project_id.as_str(), &fmt_time(&since)],
        )
    }

    fn query(
        &self,
        clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<PomodoroLogRow>, StoreError> {
        self.db.with_conn(|conn| select(conn, clause, params))
    }
}

fn select(
    conn: &Connection,
    clause: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<PomodoroLogRow>, StoreError> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM pomodoro_logs l {clause}"))?;
    let mut rows = stmt.query(params)?;
    let mut logs = Vec::new();
    while let Some(row) = rows.next()? {
        logs.push(PomodoroLogRow::from_row(row)?);
    }
    Ok(logs)
}

fn load(conn: &Connection, id: &PomodoroLogId) -> Result<PomodoroLogRow, StoreError> {
    select(conn, "WHERE l.id = ?1", &[&id.as_str()])?
        .pop()
        .ok_or_else(|| StoreError::NotFound(format!("pomodoro log {id}")))
}

fn insert_row(conn: &Connection, log: &PomodoroLogRow) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO pomodoro_logs (id, subtask_id, user_id, start_time, pomodoros_used,
         completed, distractions, break_type, cycle_number, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, ?6, ?7, ?8)",
        rusqlite::params![
            log.id.as_str(),
            log.subtask_id.as_str(),
            log.user_id.as_str(),
            fmt_time(&log.start_time),
            log.pomodoros_used,
            log.break_type.to_string(),
            log.cycle_number,
            fmt_time(&log.created_at),
        ],
    )?;
    Ok(())
}

fn update_row(conn: &Connection, log: &PomodoroLogRow) -> Result<(), StoreError> {
    let changed = conn.execute(
        "UPDATE pomodoro_logs SET end_time = ?2, pomodoros_used = ?3, completed = ?4,
         distractions = ?5, notes = ?6, break_type = ?7, cycle_number = ?8 WHERE id = ?1",
        rusqlite::params![
            log.id.as_str(),
            log.end_time.as_ref().map(fmt_time),
            log.pomodoros_used,
            log.completed,
            log.distractions,
            log.notes,
            log.break_type.to_string(),
            log.cycle_number,
        ],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound(format!("pomodoro log {}", log.id)));
    }
    Ok(())
}
