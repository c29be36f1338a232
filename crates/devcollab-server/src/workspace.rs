//! The session workspace: one flat board of projects with their subtasks,
//! grouped by status. Guests keep it in their session; members see their
//! own database projects in the same shape.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use devcollab_core::ids::{ProjectId, SubtaskId};
use devcollab_core::status::WorkStatus;
use devcollab_core::timer::PomodoroTimer;
use devcollab_store::projects::ProjectRow;
use devcollab_store::subtasks::SubtaskRow;

/// Name of the board member workspace projects are created on when the
/// member owns no board yet.
pub const WORKSPACE_BOARD_NAME: &str = "My Projects";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSubtask {
    #[serde(default)]
    pub id: SubtaskId,
    pub name: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(flatten)]
    pub timer: PomodoroTimer,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceProject {
    /// Missing on hand-written imports; a fresh one is assigned then.
    #[serde(default)]
    pub id: ProjectId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: WorkStatus,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub timer: PomodoroTimer,
    #[serde(default)]
    pub subtasks: Vec<WorkspaceSubtask>,
}

impl WorkspaceProject {
    pub fn new(name: String, description: Option<String>, status: WorkStatus, now: DateTime<Utc>) -> Self {
        Self {
            id: ProjectId::new(),
            name,
            description,
            status,
            created_at: now,
            completed_at: status.completed_at(None, now),
            timer: PomodoroTimer::default(),
            subtasks: Vec::new(),
        }
    }

    pub fn from_rows(project: ProjectRow, subtasks: Vec<SubtaskRow>) -> Self {
        Self {
            id: project.id,
            name: project.name,
            description: project.description,
            status: project.status,
            created_at: project.created_at,
            completed_at: project.completed_at,
            timer: project.timer,
            subtasks: subtasks.into_iter().map(WorkspaceSubtask::from).collect(),
        }
    }

    pub fn set_status(&mut self, status: WorkStatus, now: DateTime<Utc>) {
        self.completed_at = status.completed_at(self.completed_at, now);
        self.status = status;
    }
}

impl From<SubtaskRow> for WorkspaceSubtask {
    fn from(row: SubtaskRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            completed: row.completed,
            timer: row.timer,
        }
    }
}

/// Projects bucketed under `todo`, `doing` and `done`; every bucket is
/// present even when empty.
pub fn group_by_status(projects: Vec<WorkspaceProject>) -> BTreeMap<&'static str, Vec<WorkspaceProject>> {
    let mut groups: BTreeMap<&'static str, Vec<WorkspaceProject>> =
        WorkStatus::ALL.iter().map(|s| (s.key(), Vec::new())).collect();
    for project in projects {
        groups.entry(project.status.key()).or_default().push(project);
    }
    groups
}

/// Index of the board column a status lives in.
pub fn column_index(status: WorkStatus) -> usize {
    match status {
        WorkStatus::Todo => 0,
        WorkStatus::Doing => 1,
        WorkStatus::Done => 2,
    }
}
