use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::{PomodoroLogId, ProjectId, SubtaskId, TaskId, TimeEntryId, UserId};
use crate::palette;
use crate::status::WorkStatus;

static MENTION_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"@(\w+)").unwrap());

pub const TOPIC_PROJECT_UPDATES: &str = "project-updates";
pub const TOPIC_POMODORO: &str = "pomodoro";
pub const TOPIC_CHAT: &str = "chat";
pub const TOPIC_NOTIFICATIONS: &str = "notifications";
pub const TOPIC_CURSORS: &str = "cursors";
pub const TOPIC_PRESENCE: &str = "presence";
pub const TOPIC_TIMERS: &str = "timers";

pub const SYSTEM_USER: &str = "System";

/// Per-project Pomodoro topic.
pub fn project_pomodoro_topic(project_id: &ProjectId) -> String {
    format!("{TOPIC_POMODORO}/{project_id}")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateAction {
    Moved,
    TimerStarted,
    TimerStopped,
    Created,
    Deleted,
    SubtaskAdded,
    Updated,
}

/// Board-level change to a project, shown live to every viewer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectUpdate {
    pub project_id: ProjectId,
    pub project_name: String,
    pub status: WorkStatus,
    pub pomodoro_start: Option<DateTime<Utc>>,
    pub action: UpdateAction,
    pub user_name: String,
    pub user_color: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PomodoroStarted {
    pub log_id: PomodoroLogId,
    pub subtask_id: SubtaskId,
    pub subtask_name: String,
    pub task_id: Option<TaskId>,
    pub project_id: ProjectId,
    pub user_id: UserId,
    pub username: String,
    pub cycle_number: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayPhase {
    Start,
    Complete,
}

/// Client-originated Pomodoro notice, forwarded as-is with a server timestamp.
#[derive(Clone, Debug, PartialEq)]
pub struct PomodoroRelay {
    pub phase: RelayPhase,
    pub body: Map<String, Value>,
}

impl PomodoroRelay {
    pub fn new(phase: RelayPhase, mut body: Map<String, Value>, now: DateTime<Utc>) -> Self {
        body.insert("timestamp".into(), Value::String(now.to_rfc3339()));
        Self { phase, body }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub user_color: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    /// Stamp the message if the sender left the time out.
    pub fn stamped(mut self, now: DateTime<Utc>) -> Self {
        self.timestamp.get_or_insert(now);
        self
    }

    /// Distinct names mentioned as `@name`.
    pub fn mentions(&self) -> BTreeSet<String> {
        MENTION_PATTERN
            .captures_iter(&self.message)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .collect()
    }

    /// One system notification per distinct mention.
    pub fn mention_notifications(&self, now: DateTime<Utc>) -> Vec<ChatMessage> {
        self.mentions()
            .into_iter()
            .map(|_| ChatMessage {
                project_id: self.project_id.clone(),
                message: format!(
                    "You were mentioned by {}: {}",
                    self.user_name, self.message
                ),
                user_name: SYSTEM_USER.to_string(),
                user_color: Some(palette::NOTIFICATION_COLOR.to_string()),
                timestamp: Some(now),
            })
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorMove {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub user_color: Option<String>,
    pub x: f64,
    pub y: f64,
    /// Project under the cursor, if any.
    #[serde(default)]
    pub project_id: Option<ProjectId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPresence {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub user_color: Option<String>,
    pub connected: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimerAction {
    Start,
    Stop,
    Update,
}

/// Change to a free-form time entry, so other tabs of the same user follow.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSync {
    pub action: TimerAction,
    pub entry_id: TimeEntryId,
    pub user_id: Option<UserId>,
    pub subtask_id: Option<SubtaskId>,
    pub description: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Everything published to live clients.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncEvent {
    ProjectUpdate(ProjectUpdate),
    PomodoroStarted(PomodoroStarted),
    PomodoroRelay(PomodoroRelay),
    Chat(ChatMessage),
    Notification(ChatMessage),
    Cursor(CursorMove),
    Presence(UserPresence),
    TimerSync(TimerSync),
}

impl SyncEvent {
    pub fn topic(&self) -> String {
        match self {
            Self::ProjectUpdate(_) => TOPIC_PROJECT_UPDATES.to_string(),
            Self::PomodoroStarted(e) => project_pomodoro_topic(&e.project_id),
            Self::PomodoroRelay(_) => TOPIC_POMODORO.to_string(),
            Self::Chat(_) => TOPIC_CHAT.to_string(),
            Self::Notification(_) => TOPIC_NOTIFICATIONS.to_string(),
            Self::Cursor(_) => TOPIC_CURSORS.to_string(),
            Self::Presence(_) => TOPIC_PRESENCE.to_string(),
            Self::TimerSync(_) => TOPIC_TIMERS.to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProjectUpdate(_) => "project_update",
            Self::PomodoroStarted(_) => "pomodoro_start",
            Self::PomodoroRelay(r) => match r.phase {
                RelayPhase::Start => "pomodoro_start",
                RelayPhase::Complete => "pomodoro_complete",
            },
            Self::Chat(_) => "chat",
            Self::Notification(_) => "notification",
            Self::Cursor(_) => "cursor",
            Self::Presence(_) => "presence",
            Self::TimerSync(_) => "timer_sync",
        }
    }

    pub fn payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::ProjectUpdate(e) => serde_json::to_value(e),
            Self::PomodoroStarted(e) => serde_json::to_value(e),
            Self::PomodoroRelay(r) => Ok(Value::Object(r.body.clone())),
            Self::Chat(e) | Self::Notification(e) => serde_json::to_value(e),
            Self::Cursor(e) => serde_json::to_value(e),
            Self::Presence(e) => serde_json::to_value(e),
            Self::TimerSync(e) => serde_json::to_value(e),
        }
    }
}
