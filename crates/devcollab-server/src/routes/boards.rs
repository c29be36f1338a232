use axum::extract::{Path, State};
use axum::routing::{get, patch};
use axum::{Extension, Json, Router};
use serde::Deserialize;

use devcollab_core::ids::{BoardId, ColumnId};
use devcollab_store::boards::{BoardRow, ColumnRow};

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;
use crate::session::Session;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/boards", get(list_boards).post(create_board))
        .route(
            "/boards/{id}",
            get(get_board).patch(update_board).delete(delete_board),
        )
        .route("/boards/{id}/columns", get(list_columns).post(add_column))
        .route(
            "/boards/{id}/columns/{column_id}",
            patch(update_board_column).delete(delete_column),
        )
        .route("/boards/columns/{column_id}", patch(update_column_legacy))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateBoard {
    name: String,
    description: Option<String>,
    color: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BoardPatch {
    name: Option<String>,
    description: Option<String>,
    color: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateColumn {
    name: String,
    bg_color: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ColumnPatch {
    name: Option<String>,
    bg_color: Option<String>,
    position: Option<i64>,
}

async fn list_boards(State(state): State<AppState>) -> ApiResult<Json<Vec<BoardRow>>> {
    let repo = state.boards();
    let mut boards = repo.list()?;
    for board in &mut boards {
        board.columns = repo.list_columns(&board.id)?;
    }
    Ok(Json(boards))
}

async fn create_board(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(body): Json<CreateBoard>,
) -> ApiResult<Json<BoardRow>> {
    if body.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Board name is required".into()));
    }
    let owner = session.user().map(|u| u.id);
    let board = state.boards().create(
        body.name.trim(),
        body.description.as_deref(),
        body.color.as_deref(),
        owner.as_ref(),
    )?;
    tracing::info!(board_id = %board.id, "board created");
    Ok(Json(board))
}

async fn get_board(State(state): State<AppState>, Path(id): Path<BoardId>) -> ApiResult<Json<BoardRow>> {
    Ok(Json(state.boards().get(&id)?))
}

async fn update_board(
    State(state): State<AppState>,
    Path(id): Path<BoardId>,
    Json(patch): Json<BoardPatch>,
) -> ApiResult<Json<BoardRow>> {
    let repo = state.boards();
    let mut board = repo.get(&id)?;
    if let Some(name) = patch.name {
        board.name = name;
    }
    if let Some(description) = patch.description {
        board.description = Some(description);
    }
    if let Some(color) = patch.color {
        board.color = color;
    }
    repo.update(&board)?;
    Ok(Json(board))
}

async fn delete_board(State(state): State<AppState>, Path(id): Path<BoardId>) -> ApiResult<()> {
    state.boards().delete(&id)?;
    tracing::info!(board_id = %id, "board deleted");
    Ok(())
}

async fn list_columns(
    State(state): State<AppState>,
    Path(id): Path<BoardId>,
) -> ApiResult<Json<Vec<ColumnRow>>> {
    let repo = state.boards();
    repo.get(&id)?;
    Ok(Json(repo.list_columns(&id)?))
}

async fn add_column(
    State(state): State<AppState>,
    Path(id): Path<BoardId>,
    Json(body): Json<CreateColumn>,
) -> ApiResult<Json<ColumnRow>> {
    let column = state
        .boards()
        .add_column(&id, &body.name, body.bg_color.as_deref())?;
    Ok(Json(column))
}

async fn update_board_column(
    State(state): State<AppState>,
    Path((board_id, column_id)): Path<(BoardId, ColumnId)>,
    Json(patch): Json<ColumnPatch>,
) -> ApiResult<Json<ColumnRow>> {
    let repo = state.boards();
    repo.get(&board_id)?;
    let column = repo.get_column(&column_id)?;
    if column.board_id != board_id {
        return Err(ApiError::not_found(format!("column {column_id}")));
    }
    Ok(Json(apply_column_patch(&state, column, patch)?))
}

async fn update_column_legacy(
    State(state): State<AppState>,
    Path(column_id): Path<ColumnId>,
    Json(patch): Json<ColumnPatch>,
) -> ApiResult<Json<ColumnRow>> {
    let column = state.boards().get_column(&column_id)?;
    Ok(Json(apply_column_patch(&state, column, patch)?))
}

fn apply_column_patch(state: &AppState, mut column: ColumnRow, patch: ColumnPatch) -> ApiResult<ColumnRow> {
    if let Some(name) = patch.name {
        column.name = name;
    }
    if let Some(bg_color) = patch.bg_color {
        column.bg_color = bg_color;
    }
    if let Some(position) = patch.position.filter(|p| *p >= 0) {
        column.position = position;
    }
    state.boards().update_column(&column)?;
    Ok(column)
}

async fn delete_column(
    State(state): State<AppState>,
    Path((board_id, column_id)): Path<(BoardId, ColumnId)>,
) -> ApiResult<()> {
    let repo = state.boards();
    repo.get(&board_id)?;
    let column = repo.get_column(&column_id)?;
    if column.board_id != board_id {
        return Err(ApiError::not_found(format!("column {column_id}")));
    }
    repo.delete_column(&column_id)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use crate::routes::test_support::TestServer;

    #[tokio::test]
    async fn board_lifecycle() {
        let server = TestServer::start().await;

        let created: Value = server
            .post_json("/api/boards", json!({"name": "Sprint"}))
            .await
            .json()
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap().to_string();
        assert_eq!(created["color"], "#3B82F6");
        let names: Vec<&str> = created["columns"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["To Do", "Doing", "Done"]);

        let patched: Value = server
            .patch_json(&format!("/api/boards/{id}"), json!({"name": "Sprint 2"}))
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(patched["name"], "Sprint 2");

        let all: Value = server.get("/api/boards").await.json().await.unwrap();
        assert_eq!(all.as_array().unwrap().len(), 1);
        assert_eq!(all[0]["columns"].as_array().unwrap().len(), 3);

        assert_eq!(server.delete(&format!("/api/boards/{id}")).await.status(), 200);
        assert_eq!(server.get(&format!("/api/boards/{id}")).await.status(), 404);
        assert_eq!(server.delete(&format!("/api/boards/{id}")).await.status(), 404);
    }

    #[tokio::test]
    async fn columns_append_and_patch() {
        let server = TestServer::start().await;
        let board: Value = server
            .post_json("/api/boards", json!({"name": "B"}))
            .await
            .json()
            .await
            .unwrap();
        let id = board["id"].as_str().unwrap();

        let column: Value = server
            .post_json(&format!("/api/boards/{id}/columns"), json!({"name": "Review"}))
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(column["position"], 3);
        let column_id = column["id"].as_str().unwrap();

        let patched: Value = server
            .patch_json(
                &format!("/api/boards/{id}/columns/{column_id}"),
                json!({"name": "QA", "position": -1}),
            )
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(patched["name"], "QA");
        assert_eq!(patched["position"], 3);

        let legacy: Value = server
            .patch_json(&format!("/api/boards/columns/{column_id}"), json!({"bgColor": "#000000"}))
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(legacy["bgColor"], "#000000");

        let missing = server
            .post_json("/api/boards/board_missing/columns", json!({"name": "x"}))
            .await;
        assert_eq!(missing.status(), 404);

        assert_eq!(
            server
                .delete(&format!("/api/boards/{id}/columns/{column_id}"))
                .await
                .status(),
            200
        );
        let columns: Value = server
            .get(&format!("/api/boards/{id}/columns"))
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(columns.as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn blank_board_name_rejected() {
        let server = TestServer::start().await;
        let resp = server.post_json("/api/boards", json!({"name": "  "})).await;
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "Board name is required");
    }
}
