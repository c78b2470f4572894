//! Server state

use std::sync::Arc;

use crate::deploy::orchestrator::DeployOrchestrator;

/// Server state shared across handlers
pub struct ServerState {
    pub orchestrator: Arc<DeployOrchestrator>,

    /// Take the source identity from `X-Forwarded-For`
    pub trust_proxy_headers: bool,
}

impl ServerState {
    pub fn new(orchestrator: Arc<DeployOrchestrator>, trust_proxy_headers: bool) -> Self {
        Self {
            orchestrator,
            trust_proxy_headers,
        }
    }
}
