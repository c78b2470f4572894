//! Deployment models

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One stage of the fixed update pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepName {
    /// List the services currently running
    Status,

    /// Validate and render the compose configuration
    Config,

    /// Pull images
    Pull,

    /// Recreate changed containers
    Up,
}

impl StepName {
    /// Execution order of the pipeline
    pub const SEQUENCE: [StepName; 4] = [
        StepName::Status,
        StepName::Config,
        StepName::Pull,
        StepName::Up,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::Status => "status",
            StepName::Config => "config",
            StepName::Pull => "pull",
            StepName::Up => "up",
        }
    }

    /// Arguments passed after `<bin> compose`
    pub fn compose_args(&self) -> &'static [&'static str] {
        match self {
            StepName::Status => &["ps", "--status=running", "--services"],
            StepName::Config => &["config"],
            StepName::Pull => &["pull"],
            StepName::Up => &["up", "-d", "--remove-orphans"],
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single pipeline step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub name: StepName,
    pub ok: bool,
    pub duration_ms: u64,
    /// Last characters of the combined, sanitized output
    pub tail: String,
    pub exit_code: i32,
}

/// Aggregated result of one deploy request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployResult {
    pub ok: bool,
    pub stack: String,
    pub deploy_id: String,
    pub steps: Vec<StepResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DeployResult {
    /// Build the result from the steps attempted so far.
    ///
    /// `ok` holds only when at least one step ran and all of them succeeded.
    pub fn from_steps(
        deploy_id: String,
        stack: &str,
        steps: Vec<StepResult>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let ok = !steps.is_empty() && steps.iter().all(|s| s.ok);
        Self {
            ok,
            stack: stack.to_string(),
            deploy_id,
            steps,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// The step that stopped the pipeline, if any
    pub fn failed_step(&self) -> Option<&StepResult> {
        self.steps.iter().find(|s| !s.ok)
    }
}

/// An inbound deploy call
#[derive(Debug, Clone)]
pub struct DeployRequest {
    /// Stack name taken from the URL path
    pub stack: String,

    /// Exact request body bytes
    pub raw_body: Vec<u8>,

    /// Value of the `X-Signature` header
    pub signature: Option<String>,

    /// Identity used for rate limiting
    pub source_ip: String,
}

/// Body accepted by `POST /deploy`
#[derive(Debug, Clone, Deserialize)]
pub struct DeployPayload {
    #[serde(default)]
    pub stack: Option<serde_json::Value>,
}

impl DeployPayload {
    /// Stack named by the body; scalars are taken by their text form
    pub fn stack_name(&self) -> Option<String> {
        let name = match self.stack.as_ref()? {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            _ => return None,
        };
        (!name.is_empty()).then_some(name)
    }
}

/// Everything needed to run compose commands against one stack
#[derive(Debug, Clone)]
pub struct StackContext {
    pub name: String,

    /// `<stacks_root>/<name>`, canonicalized
    pub root_path: PathBuf,

    /// Compose file found in the stack directory
    pub compose_file: PathBuf,

    /// Variables layered over the process environment for mutating steps
    pub env_override: HashMap<String, String>,
}
