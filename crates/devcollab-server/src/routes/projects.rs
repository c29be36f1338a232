use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};

use devcollab_core::events::UpdateAction;
use devcollab_core::ids::{BoardId, ColumnId, ProjectId};
use devcollab_core::status::WorkStatus;
use devcollab_core::timer::PomodoroTimer;
use devcollab_store::projects::{NewProject, ProjectRow};
use devcollab_store::row_helpers;

use crate::error::{ApiError, ApiResult};
use crate::routes::{missing_as_bad_request, Actor};
use crate::server::AppState;
use crate::session::Session;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/projects", get(list_projects).post(create_project))
        .route("/projects/board/{board_id}", get(list_by_board))
        .route(
            "/projects/{id}",
            get(get_project).patch(update_project).delete(delete_project),
        )
        .route("/projects/{id}/pomodoro/start", post(start_pomodoro))
        .route("/projects/{id}/pomodoro/pause", post(pause_pomodoro))
        .route("/projects/{id}/pomodoro/stop", post(stop_pomodoro))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateProject {
    name: String,
    description: Option<String>,
    board_id: Option<BoardId>,
    board_column_id: Option<ColumnId>,
    estimated_pomodoros: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectPatch {
    name: Option<String>,
    description: Option<String>,
    status: Option<WorkStatus>,
    estimated_pomodoros: Option<i64>,
    board_column_id: Option<ColumnId>,
}

/// A project with the time of its tasks and their subtasks folded in.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectDetail {
    #[serde(flatten)]
    project: ProjectRow,
    combined_seconds: i64,
}

async fn list_projects(State(state): State<AppState>) -> ApiResult<Json<Vec<ProjectRow>>> {
    Ok(Json(state.projects().list()?))
}

async fn list_by_board(
    State(state): State<AppState>,
    Path(board_id): Path<BoardId>,
) -> ApiResult<Json<Vec<ProjectRow>>> {
    state.boards().get(&board_id)?;
    Ok(Json(state.projects().list_by_board(&board_id)?))
}

async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<ProjectId>,
) -> ApiResult<Json<ProjectDetail>> {
    let repo = state.projects();
    let project = repo.get(&id)?;
    let combined_seconds = repo.combined_seconds(&id)?;
    Ok(Json(ProjectDetail {
        project,
        combined_seconds,
    }))
}

async fn create_project(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    headers: HeaderMap,
    Json(body): Json<CreateProject>,
) -> ApiResult<Json<ProjectRow>> {
    let board_id = body
        .board_id
        .ok_or_else(|| ApiError::BadRequest("Board ID is required".into()))?;
    let column_id = body
        .board_column_id
        .ok_or_else(|| ApiError::BadRequest("Column ID is required".into()))?;

    let boards = state.boards();
    boards
        .get(&board_id)
        .map_err(|e| missing_as_bad_request(e, "Board not found"))?;
    let column = boards
        .get_column(&column_id)
        .map_err(|e| missing_as_bad_request(e, "Column not found"))?;
    if column.board_id != board_id {
        return Err(ApiError::BadRequest("Column not found".into()));
    }

    let project = state.projects().create(NewProject {
        name: body.name,
        description: body.description,
        board_id,
        column_id,
        owner_id: session.user().map(|u| u.id),
        status: WorkStatus::Todo,
        estimated_pomodoros: body.estimated_pomodoros.unwrap_or(1),
    })?;
    tracing::info!(project_id = %project.id, "project created");

    let actor = Actor::resolve(&session, &headers);
    state.publish(actor.project_update(&project, UpdateAction::Created));
    Ok(Json(project))
}

async fn update_project(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    headers: HeaderMap,
    Path(id): Path<ProjectId>,
    Json(patch): Json<ProjectPatch>,
) -> ApiResult<Json<ProjectRow>> {
    let repo = state.projects();
    let mut project = repo.get(&id)?;

    if let Some(name) = patch.name {
        project.name = name;
    }
    if let Some(description) = patch.description {
        project.description = Some(description);
    }
    if let Some(status) = patch.status {
        project.set_status(status, row_helpers::now());
    }
    if let Some(estimate) = patch.estimated_pomodoros {
        project.timer.estimated_pomodoros = estimate;
    }

    let mut action = UpdateAction::Updated;
    if let Some(column_id) = patch.board_column_id {
        let column = state.boards().get_column(&column_id)?;
        if column.id != project.column_id {
            action = UpdateAction::Moved;
        }
        project.board_id = column.board_id;
        project.column_id = column.id;
    }

    repo.update(&project)?;
    let actor = Actor::resolve(&session, &headers);
    state.publish(actor.project_update(&project, action));
    Ok(Json(project))
}

async fn delete_project(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    headers: HeaderMap,
    Path(id): Path<ProjectId>,
) -> ApiResult<()> {
    let repo = state.projects();
    let project = repo.get(&id)?;
    repo.delete(&id)?;
    tracing::info!(project_id = %id, "project deleted");

    let actor = Actor::resolve(&session, &headers);
    state.publish(actor.project_update(&project, UpdateAction::Deleted));
    Ok(())
}

/// Load a project, apply a timer change and save it.
fn with_timer(
    state: &AppState,
    id: &ProjectId,
    change: impl FnOnce(&mut PomodoroTimer),
) -> ApiResult<ProjectRow> {
    let repo = state.projects();
    let mut project = repo.get(id)?;
    change(&mut project.timer);
    repo.update(&project)?;
    Ok(project)
}

async fn start_pomodoro(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    headers: HeaderMap,
    Path(id): Path<ProjectId>,
) -> ApiResult<Json<ProjectRow>> {
    let project = with_timer(&state, &id, |timer| timer.start(row_helpers::now()))?;
    let actor = Actor::resolve(&session, &headers);
    state.publish(actor.project_update(&project, UpdateAction::TimerStarted));
    Ok(Json(project))
}

async fn pause_pomodoro(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    headers: HeaderMap,
    Path(id): Path<ProjectId>,
) -> ApiResult<Json<ProjectRow>> {
    let project = with_timer(&state, &id, |timer| timer.pause(row_helpers::now()))?;
    let actor = Actor::resolve(&session, &headers);
    state.publish(actor.project_update(&project, UpdateAction::Updated));
    Ok(Json(project))
}

async fn stop_pomodoro(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    headers: HeaderMap,
    Path(id): Path<ProjectId>,
) -> ApiResult<Json<ProjectRow>> {
    let project = with_timer(&state, &id, |timer| {
        if let Some(elapsed) = timer.stop(row_helpers::now()) {
            if PomodoroTimer::counts_as_pomodoro(elapsed) {
                timer.completed_pomodoros += 1;
            }
        }
    })?;
    let actor = Actor::resolve(&session, &headers);
    state.publish(actor.project_update(&project, UpdateAction::TimerStopped));
    Ok(Json(project))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::{json, Value};

    use devcollab_store::projects::ProjectRepo;

    use super::*;
    use crate::routes::test_support::TestServer;

    async fn board(server: &TestServer) -> Value {
        server
            .post_json("/api/boards", json!({"name": "Board"}))
            .await
            .json()
            .await
            .unwrap()
    }

    async fn project(server: &TestServer, board: &Value) -> Value {
        server
            .post_json(
                "/api/projects",
                json!({
                    "name": "API",
                    "boardId": board["id"],
                    "boardColumnId": board["columns"][0]["id"],
                    "estimatedPomodoros": 3,
                }),
            )
            .await
            .json()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_requires_board_and_column() {
        let server = TestServer::start().await;
        let b = board(&server).await;

        let cases = [
            (json!({"name": "x"}), "Board ID is required"),
            (json!({"name": "x", "boardId": b["id"]}), "Column ID is required"),
            (
                json!({"name": "x", "boardId": "board_missing", "boardColumnId": "col_missing"}),
                "Board not found",
            ),
            (
                json!({"name": "x", "boardId": b["id"], "boardColumnId": "col_missing"}),
                "Column not found",
            ),
        ];
        for (body, message) in cases {
            let resp = server.post_json("/api/projects", body).await;
            assert_eq!(resp.status(), 400);
            let err: Value = resp.json().await.unwrap();
            assert_eq!(err["error"], message);
        }
    }

    #[tokio::test]
    async fn create_and_fetch() {
        let server = TestServer::start().await;
        let b = board(&server).await;
        let p = project(&server, &b).await;
        assert_eq!(p["status"], "TODO");
        assert_eq!(p["estimatedPomodoros"], 3);
        assert_eq!(p["totalSecondsSpent"], 0);

        let id = p["id"].as_str().unwrap();
        let fetched: Value = server.get(&format!("/api/projects/{id}")).await.json().await.unwrap();
        assert_eq!(fetched["combinedSeconds"], 0);

        let by_board: Value = server
            .get(&format!("/api/projects/board/{}", b["id"].as_str().unwrap()))
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(by_board.as_array().unwrap().len(), 1);
        assert_eq!(server.get("/api/projects/board/board_missing").await.status(), 404);
    }

    #[tokio::test]
    async fn patch_moves_between_columns() {
        let server = TestServer::start().await;
        let b = board(&server).await;
        let p = project(&server, &b).await;
        let id = p["id"].as_str().unwrap();

        let moved: Value = server
            .patch_json(
                &format!("/api/projects/{id}"),
                json!({"boardColumnId": b["columns"][2]["id"], "status": "DONE"}),
            )
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(moved["boardColumnId"], b["columns"][2]["id"]);
        assert_eq!(moved["status"], "DONE");
        assert!(moved["completedAt"].is_string());

        let missing = server
            .patch_json(&format!("/api/projects/{id}"), json!({"boardColumnId": "col_missing"}))
            .await;
        assert_eq!(missing.status(), 404);
    }

    #[tokio::test]
    async fn stop_counts_a_pomodoro_after_a_real_session() {
        let server = TestServer::start().await;
        let b = board(&server).await;
        let p = project(&server, &b).await;
        let id = ProjectId::from_raw(p["id"].as_str().unwrap());

        let started: Value = server
            .post(&format!("/api/projects/{id}/pomodoro/start"))
            .await
            .json()
            .await
            .unwrap();
        assert!(started["pomodoroStart"].is_string());

        // Back-date the session so it outlasts the one-second threshold.
        let repo = ProjectRepo::new(server.db.clone());
        let mut row = repo.get(&id).unwrap();
        row.timer.pomodoro_start = Some(Utc::now() - Duration::seconds(120));
        repo.update(&row).unwrap();

        let stopped: Value = server
            .post(&format!("/api/projects/{id}/pomodoro/stop"))
            .await
            .json()
            .await
            .unwrap();
        assert!(stopped["pomodoroStart"].is_null());
        assert_eq!(stopped["completedPomodoros"], 1);
        assert!(stopped["totalSecondsSpent"].as_i64().unwrap() >= 120);
        assert_eq!(stopped["currentCycle"], 1);
    }

    #[tokio::test]
    async fn pause_then_stop_banks_paused_time() {
        let server = TestServer::start().await;
        let b = board(&server).await;
        let p = project(&server, &b).await;
        let id = ProjectId::from_raw(p["id"].as_str().unwrap());

        let repo = ProjectRepo::new(server.db.clone());
        let mut row = repo.get(&id).unwrap();
        row.timer.pomodoro_start = Some(Utc::now() - Duration::seconds(300));
        repo.update(&row).unwrap();

        let paused: Value = server
            .post(&format!("/api/projects/{id}/pomodoro/pause"))
            .await
            .json()
            .await
            .unwrap();
        assert!(paused["pomodoroStart"].is_null());
        assert!(paused["pausedElapsedSeconds"].as_i64().unwrap() >= 300);

        let stopped: Value = server
            .post(&format!("/api/projects/{id}/pomodoro/stop"))
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(stopped["pausedElapsedSeconds"], 0);
        assert_eq!(stopped["completedPomodoros"], 0);
        assert!(stopped["totalSecondsSpent"].as_i64().unwrap() >= 300);
    }

    #[tokio::test]
    async fn delete_then_missing() {
        let server = TestServer::start().await;
        let b = board(&server).await;
        let p = project(&server, &b).await;
        let id = p["id"].as_str().unwrap();
        assert_eq!(server.delete(&format!("/api/projects/{id}")).await.status(), 200);
        assert_eq!(server.delete(&format!("/api/projects/{id}")).await.status(), 404);
        assert_eq!(server.post(&format!("/api/projects/{id}/pomodoro/start")).await.status(), 404);
    }
}
