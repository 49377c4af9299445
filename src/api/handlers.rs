//! API route handlers
//!
//! Reads come from the shared snapshot. Writes go through the command
//! channel and wait for the control loop to apply them.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::envelope;
use crate::config::defaults::{DEFAULT_HISTORY_LIMIT, HISTORY_RETENTION};
use crate::supervisor::{CommandError, CommandSender, SharedSnapshot};
use crate::types::{HealthClass, Submission};

// ============================================================================
// API State
// ============================================================================

#[derive(Clone)]
pub struct ApiState {
    pub snapshot: SharedSnapshot,
    pub commands: CommandSender,
}

impl ApiState {
    pub fn new(snapshot: SharedSnapshot, commands: CommandSender) -> Self {
        Self { snapshot, commands }
    }
}

// ============================================================================
// Request / response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct CommandReply {
    pub reply: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub daemon: String,
    pub cycles: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub units: BTreeMap<String, HealthClass>,
}

fn loop_unavailable(e: &CommandError) -> Response {
    envelope::error(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
}

// ============================================================================
// Reads
// ============================================================================

/// GET /api/v1/health
pub async fn health(State(state): State<ApiState>) -> Response {
    let snapshot = state.snapshot.read().await;
    let units = snapshot
        .health
        .iter()
        .map(|(name, record)| (name.clone(), record.class))
        .collect();
    envelope::ok(HealthResponse {
        status: "ok",
        daemon: snapshot.daemon.clone(),
        cycles: snapshot.cycles,
        last_cycle_at: snapshot.last_cycle_at,
        units,
    })
}

/// GET /api/v1/status
pub async fn status(State(state): State<ApiState>) -> Response {
    let snapshot = state.snapshot.read().await;
    envelope::ok(&*snapshot)
}

/// GET /api/v1/actions/pending
pub async fn pending_actions(State(state): State<ApiState>) -> Response {
    let snapshot = state.snapshot.read().await;
    envelope::ok(&snapshot.pending)
}

/// GET /api/v1/actions/history?limit=30
pub async fn action_history(State(state): State<ApiState>, Query(q): Query<LimitQuery>) -> Response {
    let limit = q.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).min(HISTORY_RETENTION);
    let snapshot = state.snapshot.read().await;
    envelope::ok(snapshot.recent_history(limit))
}

/// GET /api/v1/events
pub async fn events(State(state): State<ApiState>) -> Response {
    let snapshot = state.snapshot.read().await;
    envelope::ok(&snapshot.events)
}

// ============================================================================
// Writes
// ============================================================================

/// POST /api/v1/actions: collaborator submission
pub async fn submit_action(State(state): State<ApiState>, axum::Json(submission): axum::Json<Submission>) -> Response {
    if submission.action_type.trim().is_empty() {
        return envelope::error(StatusCode::BAD_REQUEST, "action type is required");
    }
    match state.commands.submit(submission).await {
        Ok(outcome) => envelope::created(outcome),
        Err(e) => loop_unavailable(&e),
    }
}

/// POST /api/v1/actions/:id/approve
pub async fn approve_action(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.commands.approve(id.as_str()).await {
        Ok(Some(action)) => envelope::ok(action),
        Ok(None) => envelope::error(StatusCode::NOT_FOUND, format!("No pending action {id}")),
        Err(e) => loop_unavailable(&e),
    }
}

/// POST /api/v1/actions/:id/reject
pub async fn reject_action(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.commands.reject(id.as_str()).await {
        Ok(Some(action)) => envelope::ok(action),
        Ok(None) => envelope::error(StatusCode::NOT_FOUND, format!("No pending action {id}")),
        Err(e) => loop_unavailable(&e),
    }
}

/// POST /api/v1/command: operator text
pub async fn command(State(state): State<ApiState>, axum::Json(req): axum::Json<CommandRequest>) -> Response {
    if req.text.trim().is_empty() {
        return envelope::error(StatusCode::BAD_REQUEST, "command text is required");
    }
    match state.commands.operator(req.text).await {
        Ok(reply) => envelope::ok(CommandReply { reply }),
        Err(e) => loop_unavailable(&e),
    }
}
