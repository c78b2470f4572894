//! Secret injection from an external key/value store

pub mod resolver;
pub mod vault;

use std::collections::HashMap;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::errors::SecretStoreError;

/// Key/value secret source with short-lived token authentication
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Exchange the role credentials for a fresh token
    async fn login(&self) -> Result<SecretString, SecretStoreError>;

    /// Read every key stored at `path`; an absent path is an empty map
    async fn read(
        &self,
        token: &SecretString,
        path: &str,
    ) -> Result<HashMap<String, String>, SecretStoreError>;
}

/// Store path of a stack: every `-` becomes a path separator
pub fn secret_path(stack: &str) -> String {
    stack.replace('-', "/")
}
