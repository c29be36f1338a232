//! Recent warnings and errors persisted by the telemetry layer.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};

use devcollab_telemetry::{LogQuery, LogRecord};

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/logs", get(recent_logs))
}

/// Empty when the service runs without a log database.
async fn recent_logs(
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> ApiResult<Json<Vec<LogRecord>>> {
    let Some(sink) = state.log_sink.as_ref() else {
        return Ok(Json(Vec::new()));
    };
    let records = sink
        .query(&query)
        .map_err(|e| ApiError::Internal(format!("log query failed: {e}")))?;
    Ok(Json(records))
}
