pub mod config;
pub mod error;
pub mod state;
pub mod models;
pub mod retry;
pub mod breaker;
pub mod queue;
pub mod upstream;
pub mod archive;
pub mod intake;
pub mod worker;
pub mod scheduler;
pub mod routes;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

pub fn build_app(state: SharedState) -> Router {
    Router::new()
        .merge(routes::api_routes())
        .route("/health", axum::routing::get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
