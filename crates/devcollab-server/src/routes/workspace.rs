//! Session-aware project board for the web client. Members work on their
//! own database projects; guests keep theirs in the session.

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::http::header::CONTENT_DISPOSITION;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use devcollab_core::events::UpdateAction;
use devcollab_core::ids::{ProjectId, SubtaskId};
use devcollab_core::status::WorkStatus;
use devcollab_core::timer::PomodoroTimer;
use devcollab_store::boards::ColumnRow;
use devcollab_store::projects::{NewProject, ProjectRow};
use devcollab_store::row_helpers;

use crate::error::{ApiError, ApiResult};
use crate::routes::Actor;
use crate::server::AppState;
use crate::session::{Session, SessionUser};
use crate::workspace::{
    column_index, group_by_status, WorkspaceProject, WorkspaceSubtask, WORKSPACE_BOARD_NAME,
};

const EXPORT_FILENAME: &str = "devcollab-guest.json";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/projects", get(list_grouped).post(create_project))
        .route("/projects/column/{status}", get(list_column))
        .route("/projects/export", get(export_guest))
        .route("/projects/import", post(import_guest))
        .route("/projects/{id}/delete", post(delete_project))
        .route("/projects/{id}/status", post(update_status))
        .route("/projects/{id}/pomodoro/start", post(start_project_timer))
        .route("/projects/{id}/pomodoro/stop", post(stop_project_timer))
        .route("/projects/{id}/subtasks", post(create_subtask))
        .route("/subtasks/{id}/pomodoro/start", post(start_subtask_timer))
        .route("/subtasks/{id}/pomodoro/stop", post(stop_subtask_timer))
}

#[derive(Debug, Deserialize)]
struct CreateProject {
    name: String,
    description: Option<String>,
    #[serde(default)]
    status: WorkStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSubtask {
    name: String,
    estimated_pomodoros: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct StatusParams {
    status: String,
}

/// Everything the session can see, in board shape.
fn load_projects(state: &AppState, session: &Session) -> ApiResult<Vec<WorkspaceProject>> {
    match session.user() {
        Some(user) => {
            let subtasks = state.subtasks();
            state
                .projects()
                .list_by_owner(&user.id)?
                .into_iter()
                .map(|row| {
                    let subs = subtasks.list_by_project(&row.id)?;
                    Ok(WorkspaceProject::from_rows(row, subs))
                })
                .collect()
        }
        None => Ok(session.read_data(|data| data.guest_projects.clone())),
    }
}

fn owned_project(state: &AppState, user: &SessionUser, id: &ProjectId) -> ApiResult<ProjectRow> {
    let row = state.projects().get(id)?;
    if row.owner_id.as_ref() != Some(&user.id) {
        return Err(ApiError::Forbidden("Not your project".into()));
    }
    Ok(row)
}

/// The board column holding `status`, falling back to the last column.
fn column_for(columns: &[ColumnRow], status: WorkStatus) -> Option<&ColumnRow> {
    columns.get(column_index(status)).or(columns.last())
}

/// Copy the editable parts of a workspace project back onto its row.
fn write_back(state: &AppState, project: &WorkspaceProject, row: &mut ProjectRow) -> ApiResult<()> {
    row.name = project.name.clone();
    row.description = project.description.clone();
    row.timer = project.timer.clone();
    if row.status != project.status {
        row.set_status(project.status, row_helpers::now());
        let columns = state.boards().list_columns(&row.board_id)?;
        if let Some(column) = column_for(&columns, project.status) {
            row.column_id = column.id.clone();
        }
    }
    state.projects().update(row)?;
    Ok(())
}

/// Apply `f` to one project of the session and persist it.
fn modify_project(
    state: &AppState,
    session: &Session,
    id: &ProjectId,
    f: impl FnOnce(&mut WorkspaceProject),
) -> ApiResult<WorkspaceProject> {
    match session.user() {
        Some(user) => {
            let mut row = owned_project(state, &user, id)?;
            let subtasks = state.subtasks().list_by_project(id)?;
            let mut project = WorkspaceProject::from_rows(row.clone(), subtasks);
            f(&mut project);
            write_back(state, &project, &mut row)?;
            Ok(project)
        }
        None => session.with_data(|data| {
            let project = data
                .guest_projects
                .iter_mut()
                .find(|p| &p.id == id)
                .ok_or_else(|| ApiError::not_found(format!("project {id}")))?;
            f(project);
            Ok(project.clone())
        }),
    }
}

/// Apply `f` to a subtask and the timer of its project, persisting both.
fn modify_subtask(
    state: &AppState,
    session: &Session,
    id: &SubtaskId,
    f: impl FnOnce(&mut WorkspaceSubtask, &mut PomodoroTimer),
) -> ApiResult<WorkspaceProject> {
    match session.user() {
        Some(user) => {
            let subtasks = state.subtasks();
            let project_row = subtasks.update_with_project(id, |row, project_row| {
                if project_row.owner_id.as_ref() != Some(&user.id) {
                    return Err(ApiError::Forbidden("Not your project".into()));
                }
                let mut subtask = WorkspaceSubtask::from(row.clone());
                f(&mut subtask, &mut project_row.timer);
                row.timer = subtask.timer;
                Ok(project_row.clone())
            })?;
            let all = subtasks.list_by_project(&project_row.id)?;
            Ok(WorkspaceProject::from_rows(project_row, all))
        }
        None => session.with_data(|data| {
            for project in &mut data.guest_projects {
                if let Some(subtask) = project.subtasks.iter_mut().find(|s| &s.id == id) {
                    f(subtask, &mut project.timer);
                    return Ok(project.clone());
                }
            }
            Err(ApiError::not_found(format!("subtask {id}")))
        }),
    }
}

fn publish(
    state: &AppState,
    session: &Session,
    headers: &HeaderMap,
    project: &WorkspaceProject,
    action: UpdateAction,
) {
    let actor = Actor::resolve(session, headers);
    state.publish(actor.update(
        project.id.clone(),
        project.name.clone(),
        project.status,
        project.timer.pomodoro_start,
        action,
    ));
}

/// Bank the running session in whole minutes.
fn stop_rounded(timer: &mut PomodoroTimer, now: DateTime<Utc>) -> i64 {
    timer.stop_rounded(now).unwrap_or(0)
}

async fn list_grouped(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<BTreeMap<&'static str, Vec<WorkspaceProject>>>> {
    Ok(Json(group_by_status(load_projects(&state, &session)?)))
}

/// One column; an unknown status is an empty column.
async fn list_column(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(status): Path<String>,
) -> ApiResult<Json<Vec<WorkspaceProject>>> {
    let Ok(status) = status.parse::<WorkStatus>() else {
        return Ok(Json(Vec::new()));
    };
    let projects = load_projects(&state, &session)?
        .into_iter()
        .filter(|p| p.status == status)
        .collect();
    Ok(Json(projects))
}

async fn create_project(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    headers: HeaderMap,
    Json(body): Json<CreateProject>,
) -> ApiResult<Json<WorkspaceProject>> {
    if body.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Project name is required".into()));
    }
    let now = row_helpers::now();
    let project = match session.user() {
        Some(user) => {
            let boards = state.boards();
            let board = match boards.list_by_owner(&user.id)?.into_iter().next() {
                Some(board) => board,
                None => boards.create(WORKSPACE_BOARD_NAME, None, None, Some(&user.id))?,
            };
            let columns = boards.list_columns(&board.id)?;
            let column = column_for(&columns, body.status)
                .ok_or_else(|| ApiError::BadRequest("Board has no columns".into()))?;
            let row = state.projects().create(NewProject {
                name: body.name,
                description: body.description,
                board_id: board.id.clone(),
                column_id: column.id.clone(),
                owner_id: Some(user.id.clone()),
                status: body.status,
                estimated_pomodoros: 1,
            })?;
            WorkspaceProject::from_rows(row, Vec::new())
        }
        None => {
            let project = WorkspaceProject::new(body.name, body.description, body.status, now);
            session.with_data(|data| data.guest_projects.push(project.clone()));
            project
        }
    };
    tracing::info!(project_id = %project.id, guest = session.user().is_none(), "workspace project created");
    publish(&state, &session, &headers, &project, UpdateAction::Created);
    Ok(Json(project))
}

async fn delete_project(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    headers: HeaderMap,
    Path(id): Path<ProjectId>,
) -> ApiResult<()> {
    let removed = match session.user() {
        Some(user) => {
            let row = owned_project(&state, &user, &id)?;
            state.projects().delete(&id)?;
            WorkspaceProject::from_rows(row, Vec::new())
        }
        None => session.with_data(|data| {
            let index = data
                .guest_projects
                .iter()
                .position(|p| p.id == id)
                .ok_or_else(|| ApiError::not_found(format!("project {id}")))?;
            Ok::<_, ApiError>(data.guest_projects.remove(index))
        })?,
    };
    publish(&state, &session, &headers, &removed, UpdateAction::Deleted);
    Ok(())
}

async fn update_status(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    headers: HeaderMap,
    Path(id): Path<ProjectId>,
    Query(params): Query<StatusParams>,
) -> ApiResult<Json<WorkspaceProject>> {
    let status: WorkStatus = params.status.parse()?;
    let now = row_helpers::now();
    let project = modify_project(&state, &session, &id, |p| p.set_status(status, now))?;
    publish(&state, &session, &headers, &project, UpdateAction::Moved);
    Ok(Json(project))
}

async fn start_project_timer(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    headers: HeaderMap,
    Path(id): Path<ProjectId>,
) -> ApiResult<Json<WorkspaceProject>> {
    let now = row_helpers::now();
    let project = modify_project(&state, &session, &id, |p| p.timer.pomodoro_start = Some(now))?;
    publish(&state, &session, &headers, &project, UpdateAction::TimerStarted);
    Ok(Json(project))
}

async fn stop_project_timer(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    headers: HeaderMap,
    Path(id): Path<ProjectId>,
) -> ApiResult<Json<WorkspaceProject>> {
    let now = row_helpers::now();
    let project = modify_project(&state, &session, &id, |p| {
        let minutes = stop_rounded(&mut p.timer, now);
        tracing::debug!(project_id = %p.id, minutes, "workspace project timer stopped");
    })?;
    publish(&state, &session, &headers, &project, UpdateAction::TimerStopped);
    Ok(Json(project))
}

async fn create_subtask(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<ProjectId>,
    Json(body): Json<CreateSubtask>,
) -> ApiResult<Json<WorkspaceProject>> {
    let estimate = body.estimated_pomodoros.unwrap_or(1);
    let project = match session.user() {
        Some(user) => {
            let row = owned_project(&state, &user, &id)?;
            let subtasks = state.subtasks();
            subtasks.create(&id, None, &body.name, estimate)?;
            WorkspaceProject::from_rows(row, subtasks.list_by_project(&id)?)
        }
        None => modify_project(&state, &session, &id, |p| {
            p.subtasks.push(WorkspaceSubtask {
                id: SubtaskId::new(),
                name: body.name,
                completed: false,
                timer: PomodoroTimer::with_estimate(estimate),
            });
        })?,
    };
    Ok(Json(project))
}

async fn start_subtask_timer(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    headers: HeaderMap,
    Path(id): Path<SubtaskId>,
) -> ApiResult<Json<WorkspaceProject>> {
    let now = row_helpers::now();
    let project = modify_subtask(&state, &session, &id, |s, _| s.timer.pomodoro_start = Some(now))?;
    publish(&state, &session, &headers, &project, UpdateAction::TimerStarted);
    Ok(Json(project))
}

/// The minutes banked on the subtask are added to its project too.
async fn stop_subtask_timer(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    headers: HeaderMap,
    Path(id): Path<SubtaskId>,
) -> ApiResult<Json<WorkspaceProject>> {
    let now = row_helpers::now();
    let project = modify_subtask(&state, &session, &id, |s, project_timer| {
        let minutes = stop_rounded(&mut s.timer, now);
        project_timer.total_seconds_spent += minutes * 60;
    })?;
    publish(&state, &session, &headers, &project, UpdateAction::TimerStopped);
    Ok(Json(project))
}

async fn export_guest(
    Extension(session): Extension<Session>,
) -> ApiResult<impl IntoResponse> {
    if session.user().is_some() {
        return Err(ApiError::BadRequest("Only guests can export".into()));
    }
    let projects = session.read_data(|data| data.guest_projects.clone());
    let disposition = format!("attachment; filename={EXPORT_FILENAME}");
    Ok(([(CONTENT_DISPOSITION, disposition)], Json(projects)))
}

/// Append exported projects to the guest board. Entries without ids get
/// fresh ones while deserializing.
async fn import_guest(
    Extension(session): Extension<Session>,
    Json(imported): Json<Vec<WorkspaceProject>>,
) -> ApiResult<Json<Value>> {
    if session.user().is_some() {
        return Err(ApiError::BadRequest("Only guests can import".into()));
    }
    let count = imported.len();
    session.with_data(|data| data.guest_projects.extend(imported));
    tracing::info!(count, "guest projects imported");
    Ok(Json(json!({ "imported": count })))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::{json, Value};

    use devcollab_core::ids::ProjectId;
    use devcollab_store::projects::ProjectRepo;

    use crate::routes::test_support::TestServer;

    async fn create(server: &TestServer, name: &str, status: &str) -> Value {
        server
            .post_json("/projects", json!({"name": name, "status": status}))
            .await
            .json()
            .await
            .unwrap()
    }

    async fn login(server: &TestServer) {
        server
            .post_json(
                "/register",
                json!({"email": "ana@example.com", "name": "Ana", "password": "pw"}),
            )
            .await;
        server
            .post_json("/login", json!({"email": "ana@example.com", "password": "pw"}))
            .await;
    }

    #[tokio::test]
    async fn guest_board_lives_in_the_session() {
        let server = TestServer::start().await;
        create(&server, "Landing page", "TODO").await;
        create(&server, "API", "DOING").await;

        let grouped: Value = server.get("/projects").await.json().await.unwrap();
        assert_eq!(grouped["todo"].as_array().unwrap().len(), 1);
        assert_eq!(grouped["doing"].as_array().unwrap().len(), 1);
        assert!(grouped["done"].as_array().unwrap().is_empty());

        let doing: Value = server.get("/projects/column/doing").await.json().await.unwrap();
        assert_eq!(doing[0]["name"], "API");
        let unknown: Value = server.get("/projects/column/archived").await.json().await.unwrap();
        assert!(unknown.as_array().unwrap().is_empty());

        let other: Value = server
            .other_client()
            .get(server.url("/projects"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(other["todo"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn guest_subtask_time_rolls_up() {
        let server = TestServer::start().await;
        let project = create(&server, "P", "TODO").await;
        let pid = project["id"].as_str().unwrap();

        let with_sub: Value = server
            .post_json(&format!("/projects/{pid}/subtasks"), json!({"name": "S"}))
            .await
            .json()
            .await
            .unwrap();
        let sid = with_sub["subtasks"][0]["id"].as_str().unwrap();

        let started: Value = server
            .post(&format!("/subtasks/{sid}/pomodoro/start"))
            .await
            .json()
            .await
            .unwrap();
        assert!(started["subtasks"][0]["pomodoroStart"].is_string());

        let stopped: Value = server
            .post(&format!("/subtasks/{sid}/pomodoro/stop"))
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(stopped["subtasks"][0]["totalSecondsSpent"], 60);
        assert_eq!(stopped["totalSecondsSpent"], 60);

        let moved: Value = server
            .post(&format!("/projects/{pid}/status?status=done"))
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(moved["status"], "DONE");
        assert!(moved["completedAt"].is_string());

        assert_eq!(server.post(&format!("/projects/{pid}/delete")).await.status(), 200);
        assert_eq!(server.post(&format!("/projects/{pid}/delete")).await.status(), 404);
    }

    #[tokio::test]
    async fn export_and_import() {
        let server = TestServer::start().await;
        create(&server, "Keep", "DOING").await;

        let resp = server.get("/projects/export").await;
        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers()["content-disposition"],
            "attachment; filename=devcollab-guest.json"
        );
        let exported: Value = resp.json().await.unwrap();
        assert_eq!(exported.as_array().unwrap().len(), 1);

        let imported: Value = server
            .post_json("/projects/import", json!([{"name": "From file", "status": "TODO"}]))
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(imported["imported"], 1);
        let grouped: Value = server.get("/projects").await.json().await.unwrap();
        assert!(grouped["todo"][0]["id"].as_str().unwrap().starts_with("proj_"));

        login(&server).await;
        assert_eq!(server.get("/projects/export").await.status(), 400);
    }

    #[tokio::test]
    async fn member_projects_are_stored() {
        let server = TestServer::start().await;
        login(&server).await;

        let project = create(&server, "Stored", "DOING").await;
        let id = ProjectId::from_raw(project["id"].as_str().unwrap());
        let repo = ProjectRepo::new(server.db.clone());
        let row = repo.get(&id).unwrap();
        assert!(row.owner_id.is_some());

        let mut running = row.clone();
        running.timer.pomodoro_start = Some(Utc::now() - Duration::seconds(61));
        repo.update(&running).unwrap();
        let stopped: Value = server
            .post(&format!("/projects/{id}/pomodoro/stop"))
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(stopped["totalSecondsSpent"], 120);

        server.post(&format!("/projects/{id}/status?status=DONE")).await;
        let moved = repo.get(&id).unwrap();
        assert_eq!(moved.status.to_string(), "DONE");
        assert_ne!(moved.column_id, row.column_id);

        let grouped: Value = server.get("/projects").await.json().await.unwrap();
        assert_eq!(grouped["done"].as_array().unwrap().len(), 1);

        let guest = server.other_client();
        let resp = guest
            .post(server.url(&format!("/projects/{id}/delete")))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        assert!(repo.get(&id).is_ok());
    }
}
