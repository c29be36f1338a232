use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use devcollab_core::errors::DomainError;
use devcollab_core::ids::{ProjectId, TaskId};
use devcollab_core::status::WorkStatus;
use devcollab_store::row_helpers;
use devcollab_store::tasks::TaskRow;

use crate::error::{ApiError, ApiResult};
use crate::routes::missing_as_bad_request;
use crate::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/project/{project_id}", get(list_by_project))
        .route("/tasks/{id}", get(get_task).patch(update_task).delete(delete_task))
        .route("/tasks/{id}/pomodoro/start", post(start_pomodoro))
        .route("/tasks/{id}/pomodoro/stop", post(stop_pomodoro))
        .route("/tasks/{id}/move", post(move_task))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTask {
    project_id: Option<ProjectId>,
    name: String,
    description: Option<String>,
    estimated_pomodoros: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskPatch {
    name: Option<String>,
    description: Option<String>,
    status: Option<WorkStatus>,
    estimated_pomodoros: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoveParams {
    new_status: String,
}

async fn list_tasks(State(state): State<AppState>) -> ApiResult<Json<Vec<TaskRow>>> {
    Ok(Json(state.tasks().list()?))
}

async fn list_by_project(
    State(state): State<AppState>,
    Path(project_id): Path<ProjectId>,
) -> ApiResult<Json<Vec<TaskRow>>> {
    Ok(Json(state.tasks().list_by_project(&project_id)?))
}

/// A task with the time of its subtasks folded in.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskDetail {
    #[serde(flatten)]
    task: TaskRow,
    combined_seconds: i64,
}

async fn get_task(State(state): State<AppState>, Path(id): Path<TaskId>) -> ApiResult<Json<TaskDetail>> {
    let repo = state.tasks();
    let task = repo.get(&id)?;
    let combined_seconds = repo.combined_seconds(&id)?;
    Ok(Json(TaskDetail {
        task,
        combined_seconds,
    }))
}

async fn create_task(
    State(state): State<AppState>,
    Json(body): Json<CreateTask>,
) -> ApiResult<Json<TaskRow>> {
    let project_id = body
        .project_id
        .ok_or_else(|| ApiError::BadRequest("Project ID is required".into()))?;
    state
        .projects()
        .get(&project_id)
        .map_err(|e| missing_as_bad_request(e, "Project not found"))?;

    let task = state.tasks().create(
        &project_id,
        &body.name,
        body.description.as_deref(),
        body.estimated_pomodoros.unwrap_or(1),
    )?;
    tracing::info!(task_id = %task.id, project_id = %project_id, "task created");
    Ok(Json(task))
}

async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
    Json(patch): Json<TaskPatch>,
) -> ApiResult<Json<TaskRow>> {
    let repo = state.tasks();
    let mut task = repo.get(&id)?;
    if let Some(name) = patch.name {
        task.name = name;
    }
    if let Some(description) = patch.description {
        task.description = Some(description);
    }
    if let Some(status) = patch.status {
        task.set_status(status, row_helpers::now());
    }
    if let Some(estimate) = patch.estimated_pomodoros {
        task.timer.estimated_pomodoros = estimate;
    }
    repo.save(&task)?;
    Ok(Json(task))
}

async fn delete_task(State(state): State<AppState>, Path(id): Path<TaskId>) -> ApiResult<()> {
    state.tasks().delete(&id)?;
    Ok(())
}

async fn start_pomodoro(
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
) -> ApiResult<Json<TaskRow>> {
    let repo = state.tasks();
    let mut task = repo.get(&id)?;
    if task.timer.is_running() {
        return Err(DomainError::TimerAlreadyRunning.into());
    }
    task.timer.start(row_helpers::now());
    repo.save(&task)?;
    Ok(Json(task))
}

async fn stop_pomodoro(
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
) -> ApiResult<Json<TaskRow>> {
    let repo = state.tasks();
    let mut task = repo.get(&id)?;
    if !task.timer.is_running() {
        return Err(DomainError::TimerNotRunning.into());
    }
    let was_break = task.timer.is_break;
    task.timer.stop(row_helpers::now());
    if !was_break {
        task.timer.completed_pomodoros += 1;
        task.timer.increment_cycle();
    }
    repo.save(&task)?;
    tracing::debug!(task_id = %id, total = task.timer.total_seconds_spent, "task timer stopped");
    Ok(Json(task))
}

async fn move_task(
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
    Query(params): Query<MoveParams>,
) -> ApiResult<Json<TaskRow>> {
    let status: WorkStatus = params.new_status.parse()?;
    let repo = state.tasks();
    let mut task = repo.get(&id)?;
    task.set_status(status, row_helpers::now());
    repo.save(&task)?;
    Ok(Json(task))
}
