use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use devcollab_core::ids::{ProjectId, SubtaskId, TaskId};
use devcollab_core::timer::PomodoroTimer;
use devcollab_store::row_helpers;
use devcollab_store::subtasks::SubtaskRow;

use crate::error::{ApiError, ApiResult};
use crate::routes::missing_as_bad_request;
use crate::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/subtasks", get(list_subtasks).post(create_subtask))
        .route("/subtasks/task/{task_id}", get(list_by_task))
        .route(
            "/subtasks/{id}",
            get(get_subtask).patch(update_subtask).delete(delete_subtask),
        )
        .route("/subtasks/{id}/pomodoro/start", post(start_pomodoro))
        .route("/subtasks/{id}/pomodoro/stop", post(stop_pomodoro))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSubtask {
    project_id: Option<ProjectId>,
    task_id: Option<TaskId>,
    name: String,
    estimated_pomodoros: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubtaskPatch {
    name: Option<String>,
    completed: Option<bool>,
    estimated_pomodoros: Option<i64>,
}

async fn list_subtasks(State(state): State<AppState>) -> ApiResult<Json<Vec<SubtaskRow>>> {
    Ok(Json(state.subtasks().list()?))
}

async fn list_by_task(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
) -> ApiResult<Json<Vec<SubtaskRow>>> {
    Ok(Json(state.subtasks().list_by_task(&task_id)?))
}

async fn get_subtask(
    State(state): State<AppState>,
    Path(id): Path<SubtaskId>,
) -> ApiResult<Json<SubtaskRow>> {
    Ok(Json(state.subtasks().get(&id)?))
}

/// A subtask hangs off a project; when a task is named it inherits that
/// task's project.
async fn create_subtask(
    State(state): State<AppState>,
    Json(body): Json<CreateSubtask>,
) -> ApiResult<Json<SubtaskRow>> {
    let project_id = match &body.task_id {
        Some(task_id) => {
            let task = state
                .tasks()
                .get(task_id)
                .map_err(|e| missing_as_bad_request(e, "Task not found"))?;
            if body.project_id.as_ref().is_some_and(|p| *p != task.project_id) {
                return Err(ApiError::BadRequest("Task belongs to another project".into()));
            }
            task.project_id
        }
        None => {
            let project_id = body
                .project_id
                .ok_or_else(|| ApiError::BadRequest("Project ID is required".into()))?;
            state
                .projects()
                .get(&project_id)
                .map_err(|e| missing_as_bad_request(e, "Project not found"))?;
            project_id
        }
    };

    let subtask = state.subtasks().create(
        &project_id,
        body.task_id.as_ref(),
        &body.name,
        body.estimated_pomodoros.unwrap_or(1),
    )?;
    tracing::info!(subtask_id = %subtask.id, project_id = %project_id, "subtask created");
    Ok(Json(subtask))
}

async fn update_subtask(
    State(state): State<AppState>,
    Path(id): Path<SubtaskId>,
    Json(patch): Json<SubtaskPatch>,
) -> ApiResult<Json<SubtaskRow>> {
    let repo = state.subtasks();
    let mut subtask = repo.get(&id)?;
    if let Some(name) = patch.name {
        subtask.name = name;
    }
    if let Some(completed) = patch.completed {
        subtask.completed = completed;
    }
    if let Some(estimate) = patch.estimated_pomodoros {
        subtask.timer.estimated_pomodoros = estimate;
    }
    repo.save(&subtask)?;
    Ok(Json(subtask))
}

async fn delete_subtask(State(state): State<AppState>, Path(id): Path<SubtaskId>) -> ApiResult<()> {
    state.subtasks().delete(&id)?;
    Ok(())
}

async fn start_pomodoro(
    State(state): State<AppState>,
    Path(id): Path<SubtaskId>,
) -> ApiResult<Json<SubtaskRow>> {
    let repo = state.subtasks();
    let mut subtask = repo.get(&id)?;
    subtask.timer.start(row_helpers::now());
    repo.save(&subtask)?;
    Ok(Json(subtask))
}

async fn stop_pomodoro(
    State(state): State<AppState>,
    Path(id): Path<SubtaskId>,
) -> ApiResult<Json<SubtaskRow>> {
    let repo = state.subtasks();
    let mut subtask = repo.get(&id)?;
    if let Some(elapsed) = subtask.timer.stop(row_helpers::now()) {
        if PomodoroTimer::counts_as_pomodoro(elapsed) {
            subtask.timer.completed_pomodoros += 1;
        }
    }
    repo.save(&subtask)?;
    Ok(Json(subtask))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::{json, Value};

    use devcollab_store::subtasks::SubtaskRepo;

    use super::*;
    use crate::routes::test_support::TestServer;

    async fn project_and_task(server: &TestServer) -> (String, String) {
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
        let task: Value = server
            .post_json("/api/tasks", json!({"projectId": pid, "name": "T"}))
            .await
            .json()
            .await
            .unwrap();
        (pid, task["id"].as_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn subtask_inherits_task_project() {
        let server = TestServer::start().await;
        let (pid, tid) = project_and_task(&server).await;

        let sub: Value = server
            .post_json("/api/subtasks", json!({"taskId": tid, "name": "Step"}))
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(sub["projectId"], pid.as_str());
        assert_eq!(sub["taskId"], tid.as_str());

        let loose: Value = server
            .post_json("/api/subtasks", json!({"projectId": pid, "name": "Loose"}))
            .await
            .json()
            .await
            .unwrap();
        assert!(loose["taskId"].is_null());

        let by_task: Value = server
            .get(&format!("/api/subtasks/task/{tid}"))
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(by_task.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_validates_parents() {
        let server = TestServer::start().await;
        let resp = server.post_json("/api/subtasks", json!({"name": "x"})).await;
        assert_eq!(resp.status(), 400);
        let resp = server
            .post_json("/api/subtasks", json!({"name": "x", "taskId": "task_missing"}))
            .await;
        assert_eq!(resp.status(), 400);
        let err: Value = resp.json().await.unwrap();
        assert_eq!(err["error"], "Task not found");
    }

    #[tokio::test]
    async fn stop_counts_long_sessions() {
        let server = TestServer::start().await;
        let (pid, _) = project_and_task(&server).await;
        let sub: Value = server
            .post_json("/api/subtasks", json!({"projectId": pid, "name": "S"}))
            .await
            .json()
            .await
            .unwrap();
        let id = SubtaskId::from_raw(sub["id"].as_str().unwrap());

        server.post(&format!("/api/subtasks/{id}/pomodoro/start")).await;
        let repo = SubtaskRepo::new(server.db.clone());
        let mut row = repo.get(&id).unwrap();
        row.timer.pomodoro_start = Some(Utc::now() - Duration::seconds(30));
        repo.save(&row).unwrap();

        let stopped: Value = server
            .post(&format!("/api/subtasks/{id}/pomodoro/stop"))
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(stopped["completedPomodoros"], 1);
        assert!(stopped["totalSecondsSpent"].as_i64().unwrap() >= 30);

        let patched: Value = server
            .patch_json(&format!("/api/subtasks/{id}"), json!({"completed": true}))
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(patched["completed"], true);
        assert_eq!(server.delete(&format!("/api/subtasks/{id}")).await.status(), 200);
        assert_eq!(server.delete(&format!("/api/subtasks/{id}")).await.status(), 404);
    }
}
