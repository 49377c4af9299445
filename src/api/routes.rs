//! API route table (mounted under /api/v1)

use axum::routing::{get, post};
use axum::Router;

use super::handlers::{self, ApiState};

pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .route("/events", get(handlers::events))
        // Actions (static paths before the parameterized ones)
        .route("/actions", post(handlers::submit_action))
        .route("/actions/pending", get(handlers::pending_actions))
        .route("/actions/history", get(handlers::action_history))
        .route("/actions/:id/approve", post(handlers::approve_action))
        .route("/actions/:id/reject", post(handlers::reject_action))
        // Operator text commands
        .route("/command", post(handlers::command))
        .with_state(state)
}
