//! Logged Pomodoro sessions on subtasks, with team visibility and
//! per-user analytics. Every route needs a logged-in member.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use devcollab_core::errors::DomainError;
use devcollab_core::events::{PomodoroStarted, SyncEvent};
use devcollab_core::ids::{PomodoroLogId, ProjectId, SubtaskId};
use devcollab_core::pomodoro::{self, SessionSample, WeeklyReport, ACTIVE_WINDOW_MINUTES, REPORT_WINDOW_DAYS};
use devcollab_store::pomodoro_logs::SessionStart;
use devcollab_store::row_helpers;
use devcollab_store::StoreError;

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;
use crate::session::{Session, SessionUser};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/subtasks/{id}/start", post(start_session))
        .route("/subtasks/{id}/estimate", post(update_estimate))
        .route("/subtasks/{id}/suggested-estimate", get(suggested_estimate))
        .route("/logs/{id}/pause", post(pause_session))
        .route("/logs/{id}/complete", post(complete_session))
        .route("/projects/{id}/active", get(active_sessions))
        .route("/reports/weekly", get(weekly))
        .route("/reports/efficiency", get(efficiency))
}

fn member(session: &Session) -> ApiResult<SessionUser> {
    session
        .user()
        .ok_or_else(|| ApiError::Unauthorized("Login required".into()))
}

#[derive(Debug, Deserialize)]
struct PauseParams {
    reason: String,
}

#[derive(Debug, Default, Deserialize)]
struct CompleteParams {
    #[serde(default)]
    distractions: i64,
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EstimateParams {
    estimate: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ActiveSession {
    log_id: PomodoroLogId,
    subtask_name: String,
    username: String,
    started_at: DateTime<Utc>,
    cycle_number: i64,
    minutes_elapsed: i64,
}

async fn start_session(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<SubtaskId>,
) -> ApiResult<Json<Value>> {
    let user = member(&session)?;
    let now = row_helpers::now();
    let (log, subtask) = match state.pomodoro_logs().start_session(&id, &user.id, now)? {
        SessionStart::Started { log, subtask } => (log, subtask),
        SessionStart::AlreadyActive => return Err(DomainError::SessionAlreadyActive.into()),
    };
    tracing::info!(log_id = %log.id, subtask_id = %id, user_id = %user.id, "pomodoro started");

    state.publish(SyncEvent::PomodoroStarted(PomodoroStarted {
        log_id: log.id.clone(),
        subtask_id: subtask.id.clone(),
        subtask_name: subtask.name.clone(),
        task_id: subtask.task_id.clone(),
        project_id: subtask.project_id.clone(),
        user_id: user.id.clone(),
        username: user.email.clone(),
        cycle_number: log.cycle_number,
        timestamp: now,
    }));

    Ok(Json(json!({
        "success": true,
        "logId": log.id,
        "startTime": log.start_time,
        "cycleNumber": log.cycle_number,
    })))
}

async fn pause_session(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<PomodoroLogId>,
    Query(params): Query<PauseParams>,
) -> ApiResult<Json<Value>> {
    member(&session)?;
    let logs = state.pomodoro_logs();
    let mut log = logs.get(&id)?;
    if log.completed {
        return Err(DomainError::SessionCompleted.into());
    }
    log.distractions += 1;
    log.notes = Some(pomodoro::append_pause_note(
        log.notes.as_deref(),
        &params.reason,
        row_helpers::now(),
    ));
    logs.save(&log)?;
    tracing::debug!(log_id = %id, distractions = log.distractions, "pomodoro paused");
    Ok(Json(json!({ "success": true })))
}

async fn complete_session(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<PomodoroLogId>,
    Query(params): Query<CompleteParams>,
) -> ApiResult<Json<Value>> {
    member(&session)?;
    let now = row_helpers::now();
    let mut notes = params.notes.unwrap_or_default();
    pomodoro::truncate_notes(&mut notes);

    let (outcome, subtask_id) = state.pomodoro_logs().update_with_subtask(&id, |log, subtask| {
        if log.completed {
            return Err(ApiError::Conflict("Pomodoro already completed".into()));
        }
        log.end_time = Some(now);
        log.completed = true;
        log.distractions = params.distractions.max(0);
        log.notes = Some(notes);
        let session_seconds = (now - log.start_time).num_seconds();
        let outcome = pomodoro::complete_cycle(&mut subtask.timer, session_seconds);
        log.break_type = outcome.break_type;
        Ok((outcome, subtask.id.clone()))
    })?;
    tracing::info!(
        log_id = %id,
        subtask_id = %subtask_id,
        cycle = outcome.cycle_number,
        "pomodoro completed"
    );

    let mut body = serde_json::to_value(&outcome).map_err(|e| ApiError::Internal(e.to_string()))?;
    if let Value::Object(map) = &mut body {
        map.insert("success".into(), Value::Bool(true));
    }
    Ok(Json(body))
}

async fn update_estimate(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<SubtaskId>,
    Query(params): Query<EstimateParams>,
) -> ApiResult<Json<Value>> {
    member(&session)?;
    let estimate = pomodoro::validate_estimate(params.estimate)?;
    let subtasks = state.subtasks();
    let mut subtask = subtasks.get(&id)?;
    subtask.timer.estimated_pomodoros = estimate;
    subtasks.save(&subtask)?;
    Ok(Json(json!({ "success": true })))
}

async fn suggested_estimate(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<SubtaskId>,
) -> ApiResult<Json<Value>> {
    member(&session)?;
    let subtask = state.subtasks().get(&id)?;
    let history: Vec<SessionSample> = state
        .pomodoro_logs()
        .list_by_subtask(&id)?
        .iter()
        .map(|log| log.sample())
        .collect();
    Ok(Json(json!({
        "subtaskId": id,
        "currentEstimate": subtask.timer.estimated_pomodoros,
        "suggestedEstimate": pomodoro::suggest_estimate(&history, subtask.timer.estimated_pomodoros),
    })))
}

/// Unfinished sessions on the project started within the active window.
async fn active_sessions(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(project_id): Path<ProjectId>,
) -> ApiResult<Json<Vec<ActiveSession>>> {
    member(&session)?;
    let now = row_helpers::now();
    let since = now - Duration::minutes(ACTIVE_WINDOW_MINUTES);
    let subtasks = state.subtasks();
    let users = state.users();

    let mut active = Vec::new();
    for log in state.pomodoro_logs().list_recent_by_project(&project_id, since)? {
        if !log.sample().is_active(now) {
            continue;
        }
        let subtask_name = match subtasks.get(&log.subtask_id) {
            Ok(subtask) => subtask.name,
            Err(StoreError::NotFound(_)) => continue,
            Err(e) => return Err(e.into()),
        };
        let username = match users.get(&log.user_id) {
            Ok(user) => user.email,
            Err(StoreError::NotFound(_)) => continue,
            Err(e) => return Err(e.into()),
        };
        active.push(ActiveSession {
            log_id: log.id,
            subtask_name,
            username,
            started_at: log.start_time,
            cycle_number: log.cycle_number,
            minutes_elapsed: (now - log.start_time).num_minutes(),
        });
    }
    Ok(Json(active))
}

fn week_samples(state: &AppState, user: &SessionUser) -> ApiResult<Vec<SessionSample>> {
    let now = row_helpers::now();
    let from = now - Duration::days(REPORT_WINDOW_DAYS);
    Ok(state
        .pomodoro_logs()
        .list_by_user_in_range(&user.id, from, now)?
        .iter()
        .map(|log| log.sample())
        .collect())
}

async fn weekly(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<WeeklyReport>> {
    let user = member(&session)?;
    Ok(Json(pomodoro::weekly_report(&week_samples(&state, &user)?)))
}

async fn efficiency(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<Value>> {
    let user = member(&session)?;
    let score = pomodoro::efficiency_score(&week_samples(&state, &user)?);
    Ok(Json(json!({ "efficiencyScore": score })))
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use devcollab_core::ids::PomodoroLogId;
    use devcollab_store::pomodoro_logs::PomodoroLogRepo;

    use crate::routes::test_support::TestServer;

    /// Register, log in and create a project with one subtask.
    async fn setup(server: &TestServer) -> (String, String) {
        server
            .post_json(
                "/register",
                json!({"email": "ana@example.com", "name": "Ana", "password": "pw"}),
            )
            .await;
        let login = server
            .post_json("/login", json!({"email": "ana@example.com", "password": "pw"}))
            .await;
        assert_eq!(login.status(), 200);

        let board: Value = server
            .post_json("/api/boards", json!({"name": "B"}))
            .await
            .json()
            .await
            .unwrap();
        let project: Value = server
            .post_json(
                "/api/projects",
                json!({"name": "P", "boardId": board["id"], "boardColumnId": board["columns"][0]["id"]}),
            )
            .await
            .json()
            .await
            .unwrap();
        let pid = project["id"].as_str().unwrap().to_string();
        let sub: Value = server
            .post_json("/api/subtasks", json!({"projectId": pid, "name": "Draft outline", "estimatedPomodoros": 2}))
            .await
            .json()
            .await
            .unwrap();
        (pid, sub["id"].as_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn guests_are_rejected() {
        let server = TestServer::start().await;
        assert_eq!(server.get("/pomodoro/reports/weekly").await.status(), 401);
        assert_eq!(server.post("/pomodoro/subtasks/sub_1/start").await.status(), 401);
    }

    #[tokio::test]
    async fn one_active_session_per_user() {
        let server = TestServer::start().await;
        let (pid, sid) = setup(&server).await;

        let started: Value = server
            .post(&format!("/pomodoro/subtasks/{sid}/start"))
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(started["success"], true);
        assert_eq!(started["cycleNumber"], 1);

        let again = server.post(&format!("/pomodoro/subtasks/{sid}/start")).await;
        assert_eq!(again.status(), 400);
        let err: Value = again.json().await.unwrap();
        assert_eq!(err["error"], "User already has an active Pomodoro session");

        let active: Value = server
            .get(&format!("/pomodoro/projects/{pid}/active"))
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(active.as_array().unwrap().len(), 1);
        assert_eq!(active[0]["username"], "ana@example.com");
        assert_eq!(active[0]["subtaskName"], "Draft outline");
    }

    #[tokio::test]
    async fn pause_then_complete() {
        let server = TestServer::start().await;
        let (_, sid) = setup(&server).await;
        let started: Value = server
            .post(&format!("/pomodoro/subtasks/{sid}/start"))
            .await
            .json()
            .await
            .unwrap();
        let log_id = started["logId"].as_str().unwrap().to_string();

        let paused = server
            .post(&format!("/pomodoro/logs/{log_id}/pause?reason=phone"))
            .await;
        assert_eq!(paused.status(), 200);
        let log = PomodoroLogRepo::new(server.db.clone())
            .get(&PomodoroLogId::from_raw(log_id.as_str()))
            .unwrap();
        assert_eq!(log.distractions, 1);
        assert!(log.notes.unwrap().contains("PAUSED: phone"));

        let done: Value = server
            .post(&format!("/pomodoro/logs/{log_id}/complete?distractions=2&notes=ok"))
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(done["success"], true);
        assert_eq!(done["breakType"], "SHORT");
        assert_eq!(done["cycleNumber"], 2);
        assert_eq!(done["completionPercentage"], 50);
        assert_eq!(done["needsLongBreak"], false);

        let late_pause = server
            .post(&format!("/pomodoro/logs/{log_id}/pause?reason=late"))
            .await;
        assert_eq!(late_pause.status(), 400);
        let err: Value = late_pause.json().await.unwrap();
        assert_eq!(err["error"], "Cannot pause a completed Pomodoro");

        let report: Value = server.get("/pomodoro/reports/weekly").await.json().await.unwrap();
        assert_eq!(report["totalPomodoros"], 1);
        assert_eq!(report["completedPomodoros"], 1);
        assert_eq!(report["averageDistractions"], 2.0);

        let score: Value = server.get("/pomodoro/reports/efficiency").await.json().await.unwrap();
        assert_eq!(score["efficiencyScore"], 90.0);
    }

    #[tokio::test]
    async fn racing_starts_open_one_session() {
        let server = TestServer::start().await;
        let (pid, sid) = setup(&server).await;
        let path = format!("/pomodoro/subtasks/{sid}/start");
        let statuses = futures::future::join_all((0..8).map(|_| server.post(&path))).await;
        let ok = statuses.iter().filter(|r| r.status() == 200).count();
        assert_eq!(ok, 1);
        assert!(statuses.iter().all(|r| r.status() == 200 || r.status() == 400));

        let active: Value = server
            .get(&format!("/pomodoro/projects/{pid}/active"))
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(active.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_complete_conflicts_without_advancing_cycle() {
        let server = TestServer::start().await;
        let (_, sid) = setup(&server).await;
        let started: Value = server
            .post(&format!("/pomodoro/subtasks/{sid}/start"))
            .await
            .json()
            .await
            .unwrap();
        let log_id = started["logId"].as_str().unwrap().to_string();
        let complete = format!("/pomodoro/logs/{log_id}/complete");
        assert_eq!(server.post(&complete).await.status(), 200);
        assert_eq!(server.post(&complete).await.status(), 409);

        let subtask = devcollab_store::subtasks::SubtaskRepo::new(server.db.clone())
            .get(&devcollab_core::ids::SubtaskId::from_raw(sid.as_str()))
            .unwrap();
        assert_eq!(subtask.timer.completed_pomodoros, 1);
        assert_eq!(subtask.timer.current_cycle, 2);
    }

    #[tokio::test]
    async fn estimates() {
        let server = TestServer::start().await;
        let (_, sid) = setup(&server).await;

        let bad = server.post(&format!("/pomodoro/subtasks/{sid}/estimate?estimate=6")).await;
        assert_eq!(bad.status(), 400);
        let err: Value = bad.json().await.unwrap();
        assert_eq!(err["error"], "Estimate must be between 1 and 5 Pomodoros");

        let ok = server.post(&format!("/pomodoro/subtasks/{sid}/estimate?estimate=4")).await;
        assert_eq!(ok.status(), 200);

        let suggestion: Value = server
            .get(&format!("/pomodoro/subtasks/{sid}/suggested-estimate"))
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(suggestion["currentEstimate"], 4);
        assert_eq!(suggestion["suggestedEstimate"], 4);
    }
}
