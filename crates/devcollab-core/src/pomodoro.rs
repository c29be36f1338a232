//! Pomodoro session bookkeeping: estimates, break selection and the
//! per-user efficiency analytics computed over session logs.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::timer::PomodoroTimer;

pub const MIN_ESTIMATE: i64 = 1;
pub const MAX_ESTIMATE: i64 = 5;
/// An open session older than this no longer blocks a new one.
pub const ACTIVE_WINDOW_MINUTES: i64 = 30;
pub const REPORT_WINDOW_DAYS: i64 = 7;
pub const MAX_NOTES_LEN: usize = 500;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BreakType {
    #[default]
    None,
    Short,
    Long,
}

impl std::fmt::Display for BreakType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "NONE"),
            Self::Short => write!(f, "SHORT"),
            Self::Long => write!(f, "LONG"),
        }
    }
}

impl std::str::FromStr for BreakType {
    type Err = DomainError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(Self::None),
            "SHORT" => Ok(Self::Short),
            "LONG" => Ok(Self::Long),
            other => Err(DomainError::UnknownBreakType(other.to_string())),
        }
    }
}

/// Break earned after a cycle completes. A cycle counter that wrapped back
/// to 1 means four Pomodoros were just finished.
pub fn break_after_cycle(new_cycle: i64) -> BreakType {
    if new_cycle == 1 {
        BreakType::Long
    } else {
        BreakType::Short
    }
}

pub fn validate_estimate(estimate: i64) -> Result<i64, DomainError> {
    if (MIN_ESTIMATE..=MAX_ESTIMATE).contains(&estimate) {
        Ok(estimate)
    } else {
        Err(DomainError::EstimateOutOfRange(estimate))
    }
}

/// Suggest an estimate from a subtask's session history.
pub fn suggest_estimate(history: &[SessionSample], current_estimate: i64) -> i64 {
    if history.is_empty() {
        return current_estimate;
    }
    let completed = history.iter().filter(|s| s.completed).count() as i64;
    completed.clamp(MIN_ESTIMATE, MAX_ESTIMATE)
}

/// The fields of a session log the analytics need.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSample {
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub completed: bool,
    pub distractions: i64,
    pub pomodoros_used: i64,
}

impl SessionSample {
    pub fn duration_minutes(&self) -> i64 {
        self.end_time
            .map(|end| (end - self.start_time).num_minutes())
            .unwrap_or(0)
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.completed && self.start_time > now - Duration::minutes(ACTIVE_WINDOW_MINUTES)
    }
}

/// 0-100 score: completion rate (40), low distractions (30), estimate accuracy (30).
pub fn efficiency_score(samples: &[SessionSample]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let total = samples.len() as f64;
    let completed = samples.iter().filter(|s| s.completed).count() as f64;
    let completion = completed / total * 40.0;
    let distraction = (30.0 - average_distractions(samples) * 5.0).max(0.0);
    // Estimate accuracy is not measured yet; every user gets the full share.
    let accuracy = 30.0;
    (completion + distraction + accuracy).min(100.0)
}

fn average_distractions(samples: &[SessionSample]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s.distractions).sum::<i64>() as f64 / samples.len() as f64
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyReport {
    pub total_pomodoros: usize,
    pub completed_pomodoros: usize,
    pub total_minutes: i64,
    pub average_distractions: f64,
    pub efficiency_score: f64,
    /// Sessions started per ISO date.
    pub daily_breakdown: BTreeMap<String, usize>,
}

pub fn weekly_report(samples: &[SessionSample]) -> WeeklyReport {
    let mut daily_breakdown = BTreeMap::new();
    for sample in samples {
        *daily_breakdown
            .entry(sample.start_time.date_naive().to_string())
            .or_insert(0) += 1;
    }
    WeeklyReport {
        total_pomodoros: samples.len(),
        completed_pomodoros: samples.iter().filter(|s| s.completed).count(),
        total_minutes: samples
            .iter()
            .filter(|s| s.completed)
            .map(SessionSample::duration_minutes)
            .sum(),
        average_distractions: average_distractions(samples),
        efficiency_score: efficiency_score(samples),
        daily_breakdown,
    }
}

/// Outcome reported to the client after a cycle completes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleOutcome {
    pub break_type: BreakType,
    pub cycle_number: i64,
    pub completion_percentage: i64,
    pub needs_long_break: bool,
}

/// Credit a finished session to a subtask timer.
pub fn complete_cycle(timer: &mut PomodoroTimer, session_seconds: i64) -> CycleOutcome {
    timer.completed_pomodoros += 1;
    timer.increment_cycle();
    timer.pomodoro_start = None;
    timer.total_seconds_spent += session_seconds.max(0);
    CycleOutcome {
        break_type: break_after_cycle(timer.current_cycle),
        cycle_number: timer.current_cycle,
        completion_percentage: timer.completion_percentage(),
        needs_long_break: timer.needs_long_break(),
    }
}

/// Append a pause reason to a session's notes, keeping the newest text
/// within the notes limit.
pub fn append_pause_note(notes: Option<&str>, reason: &str, at: DateTime<Utc>) -> String {
    let line = format!("\n[{}] PAUSED: {reason}", at.to_rfc3339());
    let mut combined = format!("{}{line}", notes.unwrap_or_default());
    truncate_notes(&mut combined);
    combined
}

/// Cut notes to the storage limit on a char boundary, keeping the tail.
pub fn truncate_notes(notes: &mut String) {
    let chars = notes.chars().count();
    if chars > MAX_NOTES_LEN {
        *notes = notes.chars().skip(chars - MAX_NOTES_LEN).collect();
    }
}
