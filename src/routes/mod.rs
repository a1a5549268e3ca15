pub mod control;
pub mod status;

use axum::Router;
use axum::routing::{get, post};

use crate::state::SharedState;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        // Queue
        .route("/api/v1/queue/status", get(status::queue_status))
        .route("/api/v1/queue/items/{record_id}", get(status::item_detail))
        .route(
            "/api/v1/queue/items/{record_id}/reset",
            post(control::reset_item),
        )
        // Breaker
        .route("/api/v1/breaker", get(status::breaker_statistics))
        // Control
        .route("/api/v1/cycle", post(control::trigger_cycle))
        .route("/api/v1/shutdown", post(control::request_shutdown))
}
