//! Read-only deposit status endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use deposit_core::{Deposit, DepositState, JobStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::ErrorResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListDepositsParams {
    /// Only deposits in this state (e.g. "queued")
    pub state: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DepositListResponse {
    pub deposits: Vec<Deposit>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct DepositDetailResponse {
    #[serde(flatten)]
    pub deposit: Deposit,
    /// Recorded job runs, oldest first
    pub jobs: Vec<JobStatus>,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

pub async fn list_deposits(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListDepositsParams>,
) -> ApiResult<DepositListResponse> {
    let filter = match params.state.as_deref() {
        Some(raw) => Some(
            raw.parse::<DepositState>()
                .map_err(|e| ErrorResponse::with_status(StatusCode::BAD_REQUEST, e))?,
        ),
        None => None,
    };

    let mut deposits = state
        .deposits()
        .list()
        .map_err(|e| ErrorResponse::internal(format!("Failed to list deposits: {}", e)))?;
    if let Some(wanted) = filter {
        deposits.retain(|deposit| deposit.state == wanted);
    }

    Ok(Json(DepositListResponse {
        total: deposits.len(),
        deposits,
    }))
}

pub async fn get_deposit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<DepositDetailResponse> {
    let deposit = state
        .deposits()
        .get(&id)
        .map_err(|e| ErrorResponse::internal(format!("Failed to load deposit: {}", e)))?
        .ok_or_else(|| {
            ErrorResponse::with_status(StatusCode::NOT_FOUND, format!("Deposit not found: {}", id))
        })?;
    let jobs = state
        .jobs()
        .list_for_deposit(&id)
        .map_err(|e| ErrorResponse::internal(format!("Failed to load jobs: {}", e)))?;

    Ok(Json(DepositDetailResponse { deposit, jobs }))
}
