//! Mapping of deployer errors onto HTTP responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::errors::DeployerError;

/// Body of every error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub detail: String,
}

impl DeployerError {
    /// HTTP status answered for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            DeployerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            DeployerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            DeployerError::StackNotFound(_) => StatusCode::NOT_FOUND,
            DeployerError::StackNotRunning(_) => StatusCode::CONFLICT,
            DeployerError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DeployerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let detail = match &self {
            DeployerError::StackNotFound(_) => "stack not found".to_string(),
            DeployerError::StackNotRunning(_) => "stack not running".to_string(),
            DeployerError::SecretStoreAuth(_) => "secret store authentication failed".to_string(),
            e if status == StatusCode::INTERNAL_SERVER_ERROR => {
                error!("Request failed: {}", e);
                "internal error".to_string()
            }
            e => e.to_string(),
        };

        (status, Json(ErrorResponse { ok: false, detail })).into_response()
    }
}
