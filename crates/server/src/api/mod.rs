pub mod audit;
pub mod deposits;
pub mod handlers;
pub mod middleware;
pub mod pipeline;
pub mod routes;

use axum::{http::StatusCode, Json};
use serde::Serialize;

pub use routes::create_router;

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn with_status(status: StatusCode, error: impl Into<String>) -> (StatusCode, Json<Self>) {
        (
            status,
            Json(Self {
                error: error.into(),
            }),
        )
    }

    pub fn internal(error: impl Into<String>) -> (StatusCode, Json<Self>) {
        Self::with_status(StatusCode::INTERNAL_SERVER_ERROR, error)
    }
}
