//! HTTP request handlers

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;

use crate::errors::DeployerError;
use crate::models::deployment::{DeployRequest, DeployResult};
use crate::server::extract::SourceIp;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Header carrying the hex HMAC of the request
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "deployer".to_string(),
        version: version_info().version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    Json(version_info())
}

/// Trigger a deploy of the stack named in the path
pub async fn deploy_stack_handler(
    State(state): State<Arc<ServerState>>,
    Path(stack): Path<String>,
    SourceIp(source_ip): SourceIp,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, DeployerError> {
    let request = DeployRequest {
        stack,
        raw_body: body.to_vec(),
        signature: signature(&headers),
        source_ip,
    };
    let result = state.orchestrator.deploy(request).await?;
    Ok(deploy_response(result))
}

/// Trigger a deploy of the stack named in the JSON body
pub async fn deploy_body_handler(
    State(state): State<Arc<ServerState>>,
    SourceIp(source_ip): SourceIp,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, DeployerError> {
    let signature = signature(&headers);
    let result = state
        .orchestrator
        .deploy_json(&body, signature.as_deref(), &source_ip)
        .await?;
    Ok(deploy_response(result))
}

fn signature(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
}

fn deploy_response(result: DeployResult) -> (StatusCode, Json<DeployResult>) {
    let status = if result.ok {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(result))
}
