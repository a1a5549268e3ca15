use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;

use crate::error::AppError;
use crate::state::SharedState;

pub async fn reset_item(
    State(state): State<SharedState>,
    Path(record_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let reset = state.queue.reset(&record_id).await?;
    if !reset {
        return Err(AppError::NotFound("Work item not found".to_string()));
    }

    tracing::info!("Operator reset {record_id} for retry");
    Ok(Json(serde_json::json!({ "message": "Reset" })))
}

pub async fn trigger_cycle(
    State(state): State<SharedState>,
) -> (StatusCode, Json<serde_json::Value>) {
    state.wake.notify_one();
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "message": "Cycle triggered" })),
    )
}

pub async fn request_shutdown(
    State(state): State<SharedState>,
) -> (StatusCode, Json<serde_json::Value>) {
    tracing::info!("Shutdown requested via API");
    let _ = state.shutdown.send(true);
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "message": "Shutting down" })),
    )
}
