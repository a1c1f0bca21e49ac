//! Pipeline status and control endpoints.
//!
//! Control requests are not applied inline: they are published on the
//! pipeline channel and applied by the pipeline coordinator, the same path
//! any other producer of control messages uses.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use deposit_core::{messaging::publish, PipelineAction, PipelineMessage, PipelineStatus};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use super::ErrorResponse;
use crate::state::AppState;

/// Header naming the user a control request is made on behalf of.
pub const USER_HEADER: &str = "x-user-id";

const ANONYMOUS_USER: &str = "anonymous";

#[derive(Debug, Serialize)]
pub struct PipelineActionResponse {
    pub action: PipelineAction,
    pub username: String,
    pub message: String,
}

pub async fn get_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PipelineStatus>, (StatusCode, Json<ErrorResponse>)> {
    state
        .pipeline()
        .status()
        .map(Json)
        .map_err(|e| ErrorResponse::internal(format!("Failed to read pipeline status: {}", e)))
}

pub async fn quiet(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<PipelineActionResponse>), (StatusCode, Json<ErrorResponse>)> {
    request_action(&state, &headers, PipelineAction::Quiet).await
}

pub async fn unquiet(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<PipelineActionResponse>), (StatusCode, Json<ErrorResponse>)> {
    request_action(&state, &headers, PipelineAction::Unquiet).await
}

pub async fn stop(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<PipelineActionResponse>), (StatusCode, Json<ErrorResponse>)> {
    request_action(&state, &headers, PipelineAction::Stop).await
}

async fn request_action(
    state: &AppState,
    headers: &HeaderMap,
    action: PipelineAction,
) -> Result<(StatusCode, Json<PipelineActionResponse>), (StatusCode, Json<ErrorResponse>)> {
    let username = headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .unwrap_or(ANONYMOUS_USER)
        .to_string();

    let message = PipelineMessage::new(action, username.clone());
    publish(state.pipeline_channel(), &message)
        .await
        .map_err(|e| {
            ErrorResponse::with_status(
                StatusCode::SERVICE_UNAVAILABLE,
                format!("Failed to publish {}: {}", action.as_str(), e),
            )
        })?;
    info!("{} requested by {}", action.as_str(), username);

    Ok((
        StatusCode::ACCEPTED,
        Json(PipelineActionResponse {
            action,
            username,
            message: format!("{} queued", action.as_str()),
        }),
    ))
}
