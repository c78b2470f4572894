//! Request extractors

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap},
};

use crate::server::state::ServerState;

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Identity of the caller used for rate limiting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceIp(pub String);

impl FromRequestParts<Arc<ServerState>> for SourceIp {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ServerState>,
    ) -> Result<Self, Self::Rejection> {
        if state.trust_proxy_headers {
            if let Some(forwarded) = first_forwarded_for(&parts.headers) {
                return Ok(SourceIp(forwarded));
            }
        }

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Ok(SourceIp(peer))
    }
}

fn first_forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get(FORWARDED_FOR)?
        .to_str()
        .ok()?
        .split(',')
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}
