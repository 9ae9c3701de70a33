//! Trigger endpoints and the workflow listing.
//!
//! A trigger schedules a run and returns `202 Accepted` immediately. Progress
//! is reported only on the run's status stream (`GET /ws/{run_id}`), which the
//! caller should open before triggering: events published while no connection
//! is registered are dropped.
//!
//! Only a caller that sends `X-Run-Id` can connect before the run starts.
//! Without the header the server generates the id and returns it in the
//! `202` body, so every event published before the caller connects to that
//! id is lost, `start` included. Callers that need the full event sequence
//! must choose the run id themselves.

use crate::AppState;
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use conductor_engine::{
    PipelineContext, SpawnError, WorkflowRun, WorkflowSummary, AUDIO_PIPELINE, TEXT_PIPELINE,
};
use conductor_types::TriggerAccepted;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

/// Header carrying the caller-chosen run id.
pub const RUN_ID_HEADER: &str = "x-run-id";

/// Longest accepted run id.
pub const MAX_RUN_ID_LEN: usize = 128;

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("invalid run id: {0}")]
    InvalidRunId(String),
    #[error("run {0} is already in progress")]
    AlreadyRunning(String),
    #[error("server is shutting down")]
    ShuttingDown,
    #[error("unknown workflow: {0}")]
    UnknownWorkflow(&'static str),
}

impl From<SpawnError> for TriggerError {
    fn from(e: SpawnError) -> Self {
        match e {
            SpawnError::DuplicateRun(run_id) => TriggerError::AlreadyRunning(run_id),
            SpawnError::ShuttingDown => TriggerError::ShuttingDown,
        }
    }
}

impl IntoResponse for TriggerError {
    fn into_response(self) -> Response {
        let status = match self {
            TriggerError::InvalidRunId(_) => StatusCode::BAD_REQUEST,
            TriggerError::AlreadyRunning(_) => StatusCode::CONFLICT,
            TriggerError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            TriggerError::UnknownWorkflow(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Whether `run_id` is usable as a path segment and log field.
pub fn is_valid_run_id(run_id: &str) -> bool {
    !run_id.is_empty()
        && run_id.len() <= MAX_RUN_ID_LEN
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}

/// Reads the run id from `X-Run-Id`, generating a UUID when absent. A
/// generated id is unknown to the caller until the trigger returns.
fn resolve_run_id(headers: &HeaderMap) -> Result<String, TriggerError> {
    let Some(value) = headers.get(RUN_ID_HEADER) else {
        return Ok(uuid::Uuid::new_v4().to_string());
    };
    let run_id = value
        .to_str()
        .map_err(|_| TriggerError::InvalidRunId("not valid ASCII".to_string()))?
        .trim();
    if run_id.is_empty() {
        return Ok(uuid::Uuid::new_v4().to_string());
    }
    if !is_valid_run_id(run_id) {
        return Err(TriggerError::InvalidRunId(run_id.chars().take(32).collect()));
    }
    Ok(run_id.to_string())
}

/// Schedules `workflow` for `run_id` under the supervisor.
fn schedule(
    state: &AppState,
    workflow: &'static str,
    run_id: String,
    context: PipelineContext,
) -> Result<Json<TriggerAccepted>, TriggerError> {
    let definition = state
        .workflows
        .get(workflow)
        .ok_or(TriggerError::UnknownWorkflow(workflow))?;
    let engine = state.engine.clone();
    let task_run_id = run_id.clone();

    state.supervisor.spawn(run_id.clone(), move |cancel| async move {
        let run = WorkflowRun::new(task_run_id, definition.name(), context);
        let run = engine.execute(&definition, run, cancel).await;
        tracing::debug!(
            run_id = %run.run_id,
            state = ?run.state,
            steps = run.steps.len(),
            "run task finished"
        );
    })?;

    tracing::info!(run_id = %run_id, workflow, "run scheduled");
    Ok(Json(TriggerAccepted::processing(run_id)))
}

/// Handler for `POST /api/v1/process_audio`. The body is the raw audio.
pub async fn process_audio_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<TriggerAccepted>), TriggerError> {
    let run_id = resolve_run_id(&headers)?;
    tracing::debug!(run_id = %run_id, bytes = body.len(), "audio trigger received");

    let context = PipelineContext::from_audio(run_id.clone(), body);
    let accepted = schedule(&state, AUDIO_PIPELINE, run_id, context)?;
    Ok((StatusCode::ACCEPTED, accepted))
}

#[derive(Debug, Deserialize)]
pub struct ProcessTextRequest {
    pub text: String,
}

/// Handler for `POST /api/v1/process_text`.
pub async fn process_text_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<ProcessTextRequest>,
) -> Result<(StatusCode, Json<TriggerAccepted>), TriggerError> {
    let run_id = resolve_run_id(&headers)?;

    let context = PipelineContext::from_text(run_id.clone(), payload.text);
    let accepted = schedule(&state, TEXT_PIPELINE, run_id, context)?;
    Ok((StatusCode::ACCEPTED, accepted))
}

/// Handler for `GET /api/v1/workflows`.
pub async fn list_workflows_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<Vec<WorkflowSummary>> {
    Json(state.workflows.describe())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn run_id_validation() {
        assert!(is_valid_run_id("3f2b9c1e-4d5a-4b6c-8d7e-9f0a1b2c3d4e"));
        assert!(is_valid_run_id("session_42.turn:3"));
        assert!(!is_valid_run_id(""));
        assert!(!is_valid_run_id("has space"));
        assert!(!is_valid_run_id("../etc"));
        assert!(!is_valid_run_id(&"a".repeat(MAX_RUN_ID_LEN + 1)));
    }

    #[test]
    fn missing_header_generates_uuid() {
        let run_id = resolve_run_id(&HeaderMap::new()).unwrap();
        assert!(uuid::Uuid::parse_str(&run_id).is_ok());
    }

    #[test]
    fn header_value_is_trimmed() {
        let mut headers = HeaderMap::new();
        headers.insert(RUN_ID_HEADER, HeaderValue::from_static("  run-7 "));
        assert_eq!(resolve_run_id(&headers).unwrap(), "run-7");
    }

    #[test]
    fn spawn_errors_map_to_statuses() {
        let conflict = TriggerError::from(SpawnError::DuplicateRun("r".into())).into_response();
        assert_eq!(conflict.status(), StatusCode::CONFLICT);
        let draining = TriggerError::from(SpawnError::ShuttingDown).into_response();
        assert_eq!(draining.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
