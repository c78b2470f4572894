//! Resolves the secrets a stack's compose file actually references

use std::collections::{BTreeSet, HashMap};
use std::iter;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::deploy::compose::referenced_variables_in;
use crate::errors::{DeployerError, SecretStoreError};
use crate::secrets::{secret_path, SecretStore};

/// Fetches a stack's secrets and keeps only the referenced ones
pub struct SecretResolver {
    store: Arc<dyn SecretStore>,
    shared_paths: Vec<String>,
}

impl SecretResolver {
    /// `shared_paths` are read before the stack path; the stack path wins on collisions
    pub fn new(store: Arc<dyn SecretStore>, shared_paths: Vec<String>) -> Self {
        Self {
            store,
            shared_paths,
        }
    }

    /// Secrets to inject for `stack`, limited to variables used in `compose_file`.
    ///
    /// A rejected login aborts the deploy. An unreachable store or an empty
    /// path only degrades to injecting nothing.
    pub async fn resolve_secrets(
        &self,
        stack: &str,
        compose_file: &Path,
    ) -> Result<HashMap<String, String>, DeployerError> {
        let wanted = referenced_variables_in(compose_file).await;
        if wanted.is_empty() {
            debug!("Compose file of {} references no variables, skipping secret store", stack);
            return Ok(HashMap::new());
        }

        // A fresh token per resolution; nothing is cached between deploys.
        let token = match self.store.login().await {
            Ok(token) => token,
            Err(SecretStoreError::Auth(msg)) => {
                return Err(DeployerError::SecretStoreAuth(msg));
            }
            Err(e) => {
                warn!("Secret store unavailable, deploying {} without secrets: {}", stack, e);
                return Ok(HashMap::new());
            }
        };

        let stack_path = secret_path(stack);
        let mut fetched = HashMap::new();
        for path in self
            .shared_paths
            .iter()
            .map(String::as_str)
            .chain(iter::once(stack_path.as_str()))
        {
            match self.store.read(&token, path).await {
                Ok(secrets) => {
                    if !secrets.is_empty() {
                        info!("[{}] Loaded {} secrets from {}", stack, secrets.len(), path);
                    }
                    fetched.extend(secrets);
                }
                Err(e) => warn!("[{}] Failed to read secrets at {}: {}", stack, path, e),
            }
        }

        if fetched.is_empty() {
            warn!("[{}] No secrets found at {}", stack, stack_path);
        }

        let injected = filter_secrets(fetched, &wanted);
        info!(
            "[{}] Injecting {} of {} referenced variables from the secret store",
            stack,
            injected.len(),
            wanted.len()
        );
        Ok(injected)
    }
}

/// Keep only the entries whose key is in `wanted`
pub fn filter_secrets(
    fetched: HashMap<String, String>,
    wanted: &BTreeSet<String>,
) -> HashMap<String, String> {
    fetched
        .into_iter()
        .filter(|(key, _)| wanted.contains(key))
        .collect()
}
