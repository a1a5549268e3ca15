use axum::Json;
use axum::extract::{Path, State};

use crate::breaker::BreakerStatistics;
use crate::error::AppError;
use crate::state::SharedState;

pub async fn queue_status(
    State(state): State<SharedState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let counts = state.queue.status_counts().await?;
    let counts: serde_json::Map<String, serde_json::Value> = counts
        .iter()
        .map(|(status, count)| (status.as_str().to_string(), serde_json::json!(count)))
        .collect();
    let phase = *state.phase.borrow();

    Ok(Json(serde_json::json!({
        "counts": counts,
        "scheduler": phase,
    })))
}

pub async fn item_detail(
    State(state): State<SharedState>,
    Path(record_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let item = state
        .queue
        .find(&record_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Work item not found".to_string()))?;

    let errors = state.queue.errors_for(&record_id, 20).await?;

    Ok(Json(serde_json::json!({
        "item": item,
        "errors": errors,
    })))
}

pub async fn breaker_statistics(State(state): State<SharedState>) -> Json<BreakerStatistics> {
    Json(state.breaker.lock().await.statistics())
}
