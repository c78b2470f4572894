//! Stack lookup and eligibility checks

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tokio::fs;
use tracing::{debug, info};

use crate::deploy::executor::{CommandSpec, StepExecutor};
use crate::errors::DeployerError;
use crate::models::deployment::{StackContext, StepName, StepResult};

/// Compose file names looked up in a stack directory, in order
pub const COMPOSE_FILE_NAMES: [&str; 4] = [
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];

/// Per-stack registry credentials directory
pub const REGISTRY_AUTH_DIR: &str = ".docker";

/// Upper bound on stack name length
pub const MAX_STACK_NAME_LENGTH: usize = 128;

static STACK_NAME_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").ok());

/// Reject names that are empty, too long or contain anything but `[A-Za-z0-9_-]`
pub fn validate_stack_name(name: &str) -> Result<(), DeployerError> {
    let valid = name.len() <= MAX_STACK_NAME_LENGTH
        && STACK_NAME_PATTERN
            .as_ref()
            .is_some_and(|re| re.is_match(name));
    if valid {
        Ok(())
    } else {
        Err(DeployerError::InvalidRequest("invalid stack name".to_string()))
    }
}

/// Result of the running-services inspection
#[derive(Debug, Clone)]
pub struct RunningCheck {
    /// The inspection, recorded as the pipeline's `status` step
    pub status: StepResult,

    /// Services reported as running
    pub services: Vec<String>,
}

/// Maps stack names onto directories under the stacks root
pub struct StackResolver {
    stacks_root: PathBuf,
    compose_bin: String,
    status_timeout: Duration,
    executor: Arc<StepExecutor>,
}

impl StackResolver {
    pub fn new(
        stacks_root: PathBuf,
        compose_bin: String,
        status_timeout: Duration,
        executor: Arc<StepExecutor>,
    ) -> Self {
        Self {
            stacks_root,
            compose_bin,
            status_timeout,
            executor,
        }
    }

    /// Validate the name and find the stack directory and its compose file
    pub async fn locate(&self, name: &str) -> Result<StackContext, DeployerError> {
        validate_stack_name(name)?;

        let root = fs::canonicalize(&self.stacks_root)
            .await
            .map_err(|e| DeployerError::Internal(format!("stacks root missing: {}", e)))?;

        let candidate = root.join(name);
        let is_dir = fs::metadata(&candidate)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(DeployerError::StackNotFound(name.to_string()));
        }

        // A symlinked stack directory must not lead outside the root.
        let root_path = fs::canonicalize(&candidate).await?;
        if !root_path.starts_with(&root) || root_path == root {
            return Err(DeployerError::InvalidRequest("invalid stack path".to_string()));
        }

        let compose_file = find_compose_file(&root_path)
            .await
            .ok_or_else(|| DeployerError::InvalidRequest("compose file missing".to_string()))?;

        let mut env_override = HashMap::new();
        let auth_dir = root_path.join(REGISTRY_AUTH_DIR);
        if exists(&auth_dir.join("config.json")).await {
            debug!("Using registry credentials from {}", auth_dir.display());
            env_override.insert(
                "DOCKER_CONFIG".to_string(),
                auth_dir.to_string_lossy().into_owned(),
            );
        }

        Ok(StackContext {
            name: name.to_string(),
            root_path,
            compose_file,
            env_override,
        })
    }

    /// Ask compose which services of the stack are running.
    ///
    /// A successful inspection that lists no services means the stack is
    /// stopped or decommissioned; it is never started from cold.
    pub async fn check_running(&self, stack: &StackContext) -> Result<RunningCheck, DeployerError> {
        let spec = CommandSpec::compose(
            &self.compose_bin,
            StepName::Status,
            stack.root_path.clone(),
            HashMap::new(),
        );
        let output = self
            .executor
            .run(StepName::Status, &spec, self.status_timeout, &[])
            .await;

        let services: Vec<String> = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        if output.result.ok && services.is_empty() {
            info!("Stack {} has no running services, refusing to deploy", stack.name);
            return Err(DeployerError::StackNotRunning(stack.name.clone()));
        }

        Ok(RunningCheck {
            status: output.result,
            services,
        })
    }
}

async fn find_compose_file(dir: &Path) -> Option<PathBuf> {
    for name in COMPOSE_FILE_NAMES {
        let path = dir.join(name);
        if exists(&path).await {
            return Some(path);
        }
    }
    None
}

async fn exists(path: &Path) -> bool {
    fs::metadata(path).await.is_ok()
}
