//! Settings read from the process environment

use std::path::PathBuf;
use std::str::FromStr;

use secrecy::SecretString;

use crate::errors::DeployerError;
use crate::logs::{LogFormat, LogLevel};

/// Deployer settings
///
/// The shared secret and the stacks root are mandatory: loading fails when
/// either is missing, since an empty secret would let any signature pass.
#[derive(Debug)]
pub struct Settings {
    /// HMAC key shared with webhook callers
    pub deploy_secret: SecretString,

    /// Directory holding one sub-directory per stack
    pub stacks_root: PathBuf,

    /// Requests allowed per source within one window
    pub rate_limit_per_window: u32,

    /// Rate limit window length in seconds
    pub rate_limit_window_secs: u64,

    pub status_timeout_secs: u64,
    pub config_timeout_secs: u64,
    pub pull_timeout_secs: u64,
    pub up_timeout_secs: u64,

    /// Characters of command output kept per step
    pub tail_limit: usize,

    /// Program invoked as `<compose_bin> compose ...`
    pub compose_bin: String,

    pub host: String,
    pub port: u16,

    /// Take the source identity from `X-Forwarded-For`
    pub trust_proxy_headers: bool,

    pub log_level: LogLevel,
    pub log_format: LogFormat,

    /// Secret store access, present only when fully configured
    pub vault: Option<VaultSettings>,
}

/// Secret store settings
#[derive(Debug)]
pub struct VaultSettings {
    pub addr: String,
    pub role_id: SecretString,
    pub secret_id: SecretString,
    pub kv_mount: String,
    pub shared_paths: Vec<String>,
}

impl Settings {
    /// Load settings from the process environment
    pub fn from_env() -> Result<Self, DeployerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, DeployerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let deploy_secret = get("DEPLOY_SECRET")
            .map(SecretString::from)
            .ok_or_else(|| {
                DeployerError::Config("DEPLOY_SECRET must be set (fail-closed)".to_string())
            })?;

        let stacks_root = get("STACKS_ROOT")
            .map(PathBuf::from)
            .ok_or_else(|| DeployerError::Config("STACKS_ROOT must be set".to_string()))?;
        if !stacks_root.is_dir() {
            return Err(DeployerError::Config(format!(
                "Stacks root not found: {}",
                stacks_root.display()
            )));
        }

        let vault = match (get("VAULT_ADDR"), get("VAULT_ROLE_ID"), get("VAULT_SECRET_ID")) {
            (Some(addr), Some(role_id), Some(secret_id)) => Some(VaultSettings {
                addr,
                role_id: SecretString::from(role_id),
                secret_id: SecretString::from(secret_id),
                kv_mount: get("VAULT_KV_MOUNT").unwrap_or_else(|| "kv".to_string()),
                shared_paths: get("VAULT_SHARED_PATHS")
                    .map(|v| {
                        v.split(',')
                            .map(|p| p.trim().trim_matches('/').to_string())
                            .filter(|p| !p.is_empty())
                            .collect()
                    })
                    .unwrap_or_default(),
            }),
            _ => None,
        };

        Ok(Self {
            deploy_secret,
            stacks_root,
            rate_limit_per_window: parse_or(&get, "RATE_LIMIT_PER_MIN", 10)?,
            rate_limit_window_secs: parse_or(&get, "RATE_LIMIT_WINDOW_SECS", 60)?,
            status_timeout_secs: parse_or(&get, "STATUS_TIMEOUT", 60)?,
            config_timeout_secs: parse_or(&get, "CONFIG_TIMEOUT", 120)?,
            pull_timeout_secs: parse_or(&get, "PULL_TIMEOUT", 600)?,
            up_timeout_secs: parse_or(&get, "UP_TIMEOUT", 600)?,
            tail_limit: parse_or(&get, "TAIL_LIMIT", 2000)?,
            compose_bin: get("COMPOSE_BIN").unwrap_or_else(|| "docker".to_string()),
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&get, "PORT", 8000)?,
            trust_proxy_headers: parse_or(&get, "TRUST_PROXY_HEADERS", false)?,
            log_level: parse_or(&get, "LOG_LEVEL", LogLevel::Info)?,
            log_format: parse_or(&get, "LOG_FORMAT", LogFormat::Json)?,
            vault,
        })
    }

    /// Whether secrets are injected into deploys
    pub fn secrets_enabled(&self) -> bool {
        self.vault.is_some()
    }
}

fn parse_or<G, T>(get: &G, key: &str, default: T) -> Result<T, DeployerError>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| DeployerError::Config(format!("Invalid {}={}: {}", key, raw, e))),
        None => Ok(default),
    }
}
