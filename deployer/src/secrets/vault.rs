//! Vault client: AppRole login and KV v2 reads

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info};
use url::Url;

use crate::app::options::SecretStoreOptions;
use crate::errors::{DeployerError, SecretStoreError};
use crate::secrets::SecretStore;

/// Header carrying the client token
const TOKEN_HEADER: &str = "X-Vault-Token";

/// HTTP client for a Vault compatible secret store
pub struct VaultClient {
    client: Client,
    base_url: Url,
    kv_mount: String,
    role_id: SecretString,
    secret_id: SecretString,
}

#[derive(Deserialize)]
struct LoginResponse {
    auth: LoginAuth,
}

#[derive(Deserialize)]
struct LoginAuth {
    client_token: String,
    #[serde(default)]
    lease_duration: u64,
}

#[derive(Deserialize)]
struct KvResponse {
    data: KvData,
}

#[derive(Deserialize)]
struct KvData {
    #[serde(default)]
    data: HashMap<String, Value>,
}

impl VaultClient {
    /// Create a client for the configured store
    pub fn new(options: SecretStoreOptions) -> Result<Self, DeployerError> {
        let mut addr = options.addr.trim().to_string();
        if !addr.ends_with('/') {
            addr.push('/');
        }
        let base_url = Url::parse(&addr)
            .map_err(|e| DeployerError::Config(format!("Invalid VAULT_ADDR {}: {}", addr, e)))?;

        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            base_url,
            kv_mount: options.kv_mount.trim_matches('/').to_string(),
            role_id: options.role_id,
            secret_id: options.secret_id,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, SecretStoreError> {
        self.base_url
            .join(path)
            .map_err(|e| SecretStoreError::Unavailable(format!("invalid url {}: {}", path, e)))
    }
}

#[async_trait]
impl SecretStore for VaultClient {
    async fn login(&self) -> Result<SecretString, SecretStoreError> {
        let url = self.endpoint("v1/auth/approle/login")?;
        debug!("POST {} (approle login)", url);

        let body = serde_json::json!({
            "role_id": self.role_id.expose_secret(),
            "secret_id": self.secret_id.expose_secret(),
        });

        let response = self.client.post(url).json(&body).send().await?;

        let status = response.status();
        if matches!(
            status,
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            let body = response.text().await.unwrap_or_default();
            error!("Vault authentication failed: {} - {}", status, body);
            return Err(SecretStoreError::Auth(format!("{}: {}", status, body)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SecretStoreError::Unavailable(format!("{}: {}", status, body)));
        }

        let login: LoginResponse = response.json().await?;
        info!(
            "Vault authenticated successfully (lease {}s)",
            login.auth.lease_duration
        );
        Ok(SecretString::from(login.auth.client_token))
    }

    async fn read(
        &self,
        token: &SecretString,
        path: &str,
    ) -> Result<HashMap<String, String>, SecretStoreError> {
        let url = self.endpoint(&format!(
            "v1/{}/data/{}",
            self.kv_mount,
            path.trim_matches('/')
        ))?;
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .header(TOKEN_HEADER, token.expose_secret())
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!("No secrets stored at {}", path);
            return Ok(HashMap::new());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SecretStoreError::Unavailable(format!("{}: {}", status, body)));
        }

        let kv: KvResponse = response.json().await?;
        Ok(kv
            .data
            .data
            .into_iter()
            .filter_map(|(key, value)| match value {
                Value::Null => None,
                Value::String(s) => Some((key, s)),
                other => Some((key, other.to_string())),
            })
            .collect())
    }
}
