use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// Lifecycle state shared by projects and tasks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkStatus {
    #[default]
    Todo,
    Doing,
    Done,
}

impl WorkStatus {
    pub const ALL: [WorkStatus; 3] = [WorkStatus::Todo, WorkStatus::Doing, WorkStatus::Done];

    /// Lower-case grouping key used by the board view.
    pub fn key(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::Doing => "doing",
            Self::Done => "done",
        }
    }

    /// Completion timestamp after a transition into `self`.
    ///
    /// Entering `DONE` keeps an existing stamp or sets `now`; any other
    /// status clears it.
    pub fn completed_at(
        self,
        previous: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match self {
            Self::Done => previous.or(Some(now)),
            Self::Todo | Self::Doing => None,
        }
    }
}

impl std::fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Todo => write!(f, "TODO"),
            Self::Doing => write!(f, "DOING"),
            Self::Done => write!(f, "DONE"),
        }
    }
}

impl std::str::FromStr for WorkStatus {
    type Err = DomainError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TODO" => Ok(Self::Todo),
            "DOING" => Ok(Self::Doing),
            "DONE" => Ok(Self::Done),
            _ => Err(DomainError::UnknownStatus(s.to_string())),
        }
    }
}
