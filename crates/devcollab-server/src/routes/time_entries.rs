//! Free-form time tracking: a running stopwatch plus a weekly calendar.

use std::collections::BTreeSet;

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Deserialize;

use devcollab_core::events::{SyncEvent, TimerAction, TimerSync};
use devcollab_core::ids::{ProjectId, SubtaskId, TaskId, TimeEntryId, UserId};
use devcollab_store::row_helpers;
use devcollab_store::time_entries::{NewTimeEntry, TimeEntryRow};

use crate::error::{ApiError, ApiResult};
use crate::routes::resolve_optional;
use crate::server::AppState;
use crate::session::Session;

const WEEK_DAYS: i64 = 7;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/timer/start", post(start_timer))
        .route("/timer/stop", post(stop_timer))
        .route("/timer/active", get(active_timers))
        .route("/time-entries/week", get(week_entries))
        .route("/time-entries", post(create_entry))
        .route("/time-entries/{id}", patch(update_entry).delete(delete_entry))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryRequest {
    user_id: Option<UserId>,
    project_id: Option<ProjectId>,
    task_id: Option<TaskId>,
    subtask_id: Option<SubtaskId>,
    description: Option<String>,
    #[serde(default)]
    tags: BTreeSet<String>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    #[serde(default)]
    pomodoro: bool,
    #[serde(default)]
    billable: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryPatch {
    project_id: Option<ProjectId>,
    task_id: Option<TaskId>,
    subtask_id: Option<SubtaskId>,
    description: Option<String>,
    tags: Option<BTreeSet<String>>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StopRequest {
    entry_id: TimeEntryId,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserParams {
    user_id: Option<UserId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WeekParams {
    start: NaiveDate,
    user_id: Option<UserId>,
}

fn timer_sync(action: TimerAction, entry: &TimeEntryRow) -> SyncEvent {
    SyncEvent::TimerSync(TimerSync {
        action,
        entry_id: entry.id.clone(),
        user_id: entry.user_id.clone(),
        subtask_id: entry.subtask_id.clone(),
        description: entry.description.clone(),
        start: entry.start,
        end: entry.end,
    })
}

/// The explicit user, else the logged-in member.
fn target_user(explicit: Option<UserId>, session: &Session) -> ApiResult<UserId> {
    explicit
        .or_else(|| session.user().map(|u| u.id))
        .ok_or_else(|| ApiError::BadRequest("userId is required".into()))
}

/// Build a new entry, dropping references to rows that do not exist.
fn new_entry(state: &AppState, session: &Session, req: EntryRequest) -> ApiResult<NewTimeEntry> {
    let user_id = match req.user_id {
        Some(id) => resolve_optional(Some(id), |id| state.users().get(id))?,
        None => session.user().map(|u| u.id),
    };
    Ok(NewTimeEntry {
        user_id,
        project_id: resolve_optional(req.project_id, |id| state.projects().get(id))?,
        task_id: resolve_optional(req.task_id, |id| state.tasks().get(id))?,
        subtask_id: resolve_optional(req.subtask_id, |id| state.subtasks().get(id))?,
        description: req.description,
        tags: req.tags,
        start: req.start,
        end: req.end,
        pomodoro: req.pomodoro,
        billable: req.billable,
    })
}

async fn start_timer(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<EntryRequest>,
) -> ApiResult<Json<TimeEntryRow>> {
    let mut new = new_entry(&state, &session, req)?;
    new.start = Some(row_helpers::now());
    new.end = None;
    let entry = state.time_entries().create(new)?;
    tracing::info!(entry_id = %entry.id, "timer started");
    state.publish(timer_sync(TimerAction::Start, &entry));
    Ok(Json(entry))
}

async fn stop_timer(
    State(state): State<AppState>,
    Json(req): Json<StopRequest>,
) -> ApiResult<Json<TimeEntryRow>> {
    let repo = state.time_entries();
    let mut entry = repo.get(&req.entry_id)?;
    entry.end = Some(row_helpers::now());
    repo.save(&entry)?;
    tracing::info!(entry_id = %entry.id, "timer stopped");
    state.publish(timer_sync(TimerAction::Stop, &entry));
    Ok(Json(entry))
}

async fn active_timers(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Query(params): Query<UserParams>,
) -> ApiResult<Json<Vec<TimeEntryRow>>> {
    let user_id = target_user(params.user_id, &session)?;
    Ok(Json(state.time_entries().list_active_by_user(&user_id)?))
}

/// Entries started in the seven days from `start` (midnight UTC).
async fn week_entries(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Query(params): Query<WeekParams>,
) -> ApiResult<Json<Vec<TimeEntryRow>>> {
    let user_id = target_user(params.user_id, &session)?;
    let from = params.start.and_time(chrono::NaiveTime::MIN).and_utc();
    let to = from + Duration::days(WEEK_DAYS);
    Ok(Json(
        state
            .time_entries()
            .list_by_user_started_between(&user_id, from, to)?,
    ))
}

async fn create_entry(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<EntryRequest>,
) -> ApiResult<Json<TimeEntryRow>> {
    let new = new_entry(&state, &session, req)?;
    let entry = state.time_entries().create(new)?;
    state.publish(timer_sync(TimerAction::Update, &entry));
    Ok(Json(entry))
}

async fn update_entry(
    State(state): State<AppState>,
    Path(id): Path<TimeEntryId>,
    Json(patch): Json<EntryPatch>,
) -> ApiResult<Json<TimeEntryRow>> {
    let repo = state.time_entries();
    let mut entry = repo.get(&id)?;
    if let Some(start) = patch.start {
        entry.start = Some(start);
    }
    if let Some(end) = patch.end {
        entry.end = Some(end);
    }
    if let Some(description) = patch.description {
        entry.description = Some(description);
    }
    if let Some(tags) = patch.tags {
        entry.tags = tags;
    }
    if patch.project_id.is_some() {
        entry.project_id = resolve_optional(patch.project_id, |id| state.projects().get(id))?;
    }
    if patch.task_id.is_some() {
        entry.task_id = resolve_optional(patch.task_id, |id| state.tasks().get(id))?;
    }
    if patch.subtask_id.is_some() {
        entry.subtask_id = resolve_optional(patch.subtask_id, |id| state.subtasks().get(id))?;
    }
    repo.save(&entry)?;
    state.publish(timer_sync(TimerAction::Update, &entry));
    Ok(Json(entry))
}

async fn delete_entry(State(state): State<AppState>, Path(id): Path<TimeEntryId>) -> ApiResult<()> {
    state.time_entries().delete(&id)?;
    Ok(())
}
