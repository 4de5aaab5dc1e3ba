use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::api::signature::{verify_signature, SIGNATURE_HEADER};
use crate::server::AppState;
use crate::workflow::RunRequest;
use crate::workspace::git::validate_branch_name;
use crate::workspace::repo::RepoRef;

fn rejection(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// Reject requests that could never start a run.
fn check_request(state: &AppState, request: &RunRequest) -> Result<(), String> {
    RepoRef::parse(&request.target_repo, &state.config.git.host).map_err(|e| e.to_string())?;
    if let Some(branch) = &request.branch_name {
        validate_branch_name(branch).map_err(|e| e.to_string())?;
    }
    Ok(())
}

pub async fn submit_run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if state.is_shutting_down() {
        return rejection(StatusCode::SERVICE_UNAVAILABLE, "Service is shutting down");
    }

    if let Some(secret) = state.config.api_secret() {
        let Some(signature) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
            tracing::warn!("Missing run submission signature");
            return rejection(StatusCode::UNAUTHORIZED, "Missing signature");
        };
        if let Err(e) = verify_signature(secret, &body, signature) {
            tracing::warn!(error = %e, "Run submission signature verification failed");
            return rejection(StatusCode::UNAUTHORIZED, "Invalid signature");
        }
    }

    let request: RunRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, "Malformed run request");
            return rejection(StatusCode::BAD_REQUEST, format!("Malformed run request: {e}"));
        }
    };

    if let Err(message) = check_request(&state, &request) {
        tracing::warn!(repo = %request.target_repo, error = %message, "Rejected run request");
        return rejection(StatusCode::UNPROCESSABLE_ENTITY, message);
    }

    let run_id = state.submit(request).await;
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "run_id": run_id, "status": "queued" })),
    )
        .into_response()
}

pub async fn get_run(State(state): State<Arc<AppState>>, Path(run_id): Path<String>) -> Response {
    match state.get_run(&run_id).await {
        Some(record) => Json(record).into_response(),
        None => rejection(StatusCode::NOT_FOUND, format!("Unknown run: {run_id}")),
    }
}
