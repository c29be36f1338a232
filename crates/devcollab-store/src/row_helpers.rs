use chrono::{DateTime, NaiveDate, SecondsFormat, SubsecRound, Utc};
use devcollab_core::timer::PomodoroTimer;

use crate::error::StoreError;

/// Columns of an embedded [`PomodoroTimer`], in [`timer_from_row`] order.
pub const TIMER_COLUMNS: &str = "pomodoro_start, total_seconds_spent, paused_elapsed_seconds, \
     pomodoro_duration, break_duration, is_break, estimated_pomodoros, completed_pomodoros, current_cycle";

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Get an optional column value.
pub fn get_opt<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<Option<T>, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Canonical text form for stored instants. Fixed precision keeps
/// lexicographic order equal to time order.
pub fn fmt_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time at stored precision, so freshly created rows compare equal
/// to what a later read returns.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub fn parse_time(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            table,
            column,
            detail: format!("invalid timestamp {raw:?}: {e}"),
        })
}

pub fn get_time(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<DateTime<Utc>, StoreError> {
    let raw: String = get(row, idx, table, column)?;
    parse_time(&raw, table, column)
}

pub fn get_time_opt(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    get_opt::<String>(row, idx, table, column)?
        .map(|raw| parse_time(&raw, table, column))
        .transpose()
}

pub fn get_date_opt(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<Option<NaiveDate>, StoreError> {
    get_opt::<String>(row, idx, table, column)?
        .map(|raw| {
            NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| StoreError::CorruptRow {
                table,
                column,
                detail: format!("invalid date {raw:?}: {e}"),
            })
        })
        .transpose()
}

/// Parse a JSON string column, returning CorruptRow on parse failure.
pub fn parse_json<T: serde::de::DeserializeOwned>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid JSON: {e}"),
    })
}

/// Parse a string into an enum, returning CorruptRow on failure.
pub fn parse_enum<T: std::str::FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("unknown variant: {raw}"),
    })
}

/// Read the nine [`TIMER_COLUMNS`] starting at `start`.
pub fn timer_from_row(
    row: &rusqlite::Row<'_>,
    start: usize,
    table: &'static str,
) -> Result<PomodoroTimer, StoreError> {
    Ok(PomodoroTimer {
        pomodoro_start: get_time_opt(row, start, table, "pomodoro_start")?,
        total_seconds_spent: get(row, start + 1, table, "total_seconds_spent")?,
        paused_elapsed_seconds: get(row, start + 2, table, "paused_elapsed_seconds")?,
        pomodoro_duration: get(row, start + 3, table, "pomodoro_duration")?,
        break_duration: get(row, start + 4, table, "break_duration")?,
        is_break: get(row, start + 5, table, "is_break")?,
        estimated_pomodoros: get(row, start + 6, table, "estimated_pomodoros")?,
        completed_pomodoros: get(row, start + 7, table, "completed_pomodoros")?,
        current_cycle: get(row, start + 8, table, "current_cycle")?,
    })
}

/// Timer values in [`TIMER_COLUMNS`] order, for inserts and updates.
pub fn timer_values(timer: &PomodoroTimer) -> [rusqlite::types::Value; 9] {
    use rusqlite::types::Value;
    [
        timer
            .pomodoro_start
            .as_ref()
            .map(|t| Value::Text(fmt_time(t)))
            .unwrap_or(Value::Null),
        Value::Integer(timer.total_seconds_spent),
        Value::Integer(timer.paused_elapsed_seconds),
        Value::Integer(timer.pomodoro_duration),
        Value::Integer(timer.break_duration),
        Value::Integer(i64::from(timer.is_break)),
        Value::Integer(timer.estimated_pomodoros),
        Value::Integer(timer.completed_pomodoros),
        Value::Integer(timer.current_cycle),
    ]
}

/// `SET` clause for the timer columns with placeholders from `?{first}`.
pub fn timer_assignments(first: usize) -> String {
    TIMER_COLUMNS
        .split(',')
        .enumerate()
        .map(|(i, col)| format!("{} = ?{}", col.trim(), first + i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Placeholders `?{first}..` for the timer columns.
pub fn timer_placeholders(first: usize) -> String {
    (0..9)
        .map(|i| format!("?{}", first + i))
        .collect::<Vec<_>>()
        .join(", ")
}
