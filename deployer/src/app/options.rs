//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::models::deployment::StepName;
use crate::storage::settings::Settings;

/// Main application options
#[derive(Debug)]
pub struct AppOptions {
    /// HMAC key shared with webhook callers
    pub deploy_secret: SecretString,

    /// Directory holding one sub-directory per stack
    pub stacks_root: PathBuf,

    /// Server configuration
    pub server: ServerOptions,

    /// Rate limiting of deploy requests
    pub rate_limit: RateLimitOptions,

    /// Pipeline execution settings
    pub pipeline: PipelineOptions,

    /// Secret store access; `None` disables secret injection
    pub secret_store: Option<SecretStoreOptions>,

    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,
}

impl AppOptions {
    /// Build options from loaded settings
    pub fn from_settings(settings: Settings) -> Self {
        Self {
            deploy_secret: settings.deploy_secret,
            stacks_root: settings.stacks_root,
            server: ServerOptions {
                host: settings.host,
                port: settings.port,
                trust_proxy_headers: settings.trust_proxy_headers,
            },
            rate_limit: RateLimitOptions {
                limit: settings.rate_limit_per_window,
                window: Duration::from_secs(settings.rate_limit_window_secs),
            },
            pipeline: PipelineOptions {
                timeouts: StepTimeouts {
                    status: Duration::from_secs(settings.status_timeout_secs),
                    config: Duration::from_secs(settings.config_timeout_secs),
                    pull: Duration::from_secs(settings.pull_timeout_secs),
                    up: Duration::from_secs(settings.up_timeout_secs),
                },
                tail_limit: settings.tail_limit,
                compose_bin: settings.compose_bin,
            },
            secret_store: settings.vault.map(|vault| SecretStoreOptions {
                addr: vault.addr,
                role_id: vault.role_id,
                secret_id: vault.secret_id,
                kv_mount: vault.kv_mount,
                shared_paths: vault.shared_paths,
            }),
            lifecycle: LifecycleOptions::default(),
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Use the first `X-Forwarded-For` entry as the source identity
    pub trust_proxy_headers: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            trust_proxy_headers: false,
        }
    }
}

/// Fixed window rate limit options
#[derive(Debug, Clone, Copy)]
pub struct RateLimitOptions {
    /// Requests allowed per source per window
    pub limit: u32,

    /// Window length
    pub window: Duration,
}

impl Default for RateLimitOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            window: Duration::from_secs(60),
        }
    }
}

/// Per-step timeouts
#[derive(Debug, Clone, Copy)]
pub struct StepTimeouts {
    pub status: Duration,
    pub config: Duration,
    pub pull: Duration,
    pub up: Duration,
}

impl StepTimeouts {
    pub fn for_step(&self, step: StepName) -> Duration {
        match step {
            StepName::Status => self.status,
            StepName::Config => self.config,
            StepName::Pull => self.pull,
            StepName::Up => self.up,
        }
    }
}

impl Default for StepTimeouts {
    fn default() -> Self {
        Self {
            status: Duration::from_secs(60),
            config: Duration::from_secs(120),
            pull: Duration::from_secs(600),
            up: Duration::from_secs(600),
        }
    }
}

/// Pipeline execution options
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Timeout of each step
    pub timeouts: StepTimeouts,

    /// Characters of output kept per step
    pub tail_limit: usize,

    /// Program invoked as `<compose_bin> compose ...`
    pub compose_bin: String,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            timeouts: StepTimeouts::default(),
            tail_limit: 2000,
            compose_bin: "docker".to_string(),
        }
    }
}

/// Secret store options
#[derive(Debug)]
pub struct SecretStoreOptions {
    /// Base address, e.g. `https://vault.internal:8200`
    pub addr: String,
    pub role_id: SecretString,
    pub secret_id: SecretString,

    /// KV v2 mount point
    pub kv_mount: String,

    /// Paths merged before the stack's own path
    pub shared_paths: Vec<String>,
}
