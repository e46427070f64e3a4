//! Secrets (component J). A `SecretStore` supplies a flat map of secrets
//! merged into every target's variables, with secret keys overriding file
//! keys on collision.

use std::collections::BTreeMap;
use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{DeployerError, Result};
use crate::settings::VaultConfig;

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn load(&self) -> Result<BTreeMap<String, Value>>;
}

/// No secrets configured (`settings.vault` absent).
#[derive(Debug, Default)]
pub struct NoopSecretStore;

#[async_trait]
impl SecretStore for NoopSecretStore {
    async fn load(&self) -> Result<BTreeMap<String, Value>> {
        Ok(BTreeMap::new())
    }
}

#[derive(Debug, Deserialize)]
struct AppRoleLoginResponse {
    auth: AppRoleAuth,
}

#[derive(Debug, Deserialize)]
struct AppRoleAuth {
    client_token: String,
}

#[derive(Debug, Deserialize)]
struct KvV2ReadResponse {
    data: KvV2Data,
}

#[derive(Debug, Deserialize)]
struct KvV2Data {
    data: BTreeMap<String, Value>,
}

/// A HashiCorp Vault AppRole + KV v2 secret store, authenticating once at
/// construction and reading every configured path eagerly.
pub struct VaultSecretStore {
    keys: BTreeMap<String, Value>,
}

impl VaultSecretStore {
    pub async fn discover(config: &VaultConfig, secret_id: &str) -> Result<Self> {
        if let Some(keys) = test_secret_override() {
            return Ok(Self { keys });
        }

        let client = reqwest::Client::new();
        let login_url = format!("{}/v1/auth/approle/login", config.url.trim_end_matches('/'));
        let login: AppRoleLoginResponse = client
            .post(&login_url)
            .json(&serde_json::json!({"role_id": config.role_id, "secret_id": secret_id}))
            .send()
            .await
            .map_err(|err| DeployerError::Secret(format!("vault approle login failed: {err}")))?
            .error_for_status()
            .map_err(|err| DeployerError::Secret(format!("vault approle login failed: {err}")))?
            .json()
            .await
            .map_err(|err| DeployerError::Secret(format!("invalid vault login response: {err}")))?;

        let mut keys = BTreeMap::new();
        for path in &config.paths {
            let read_url = format!(
                "{}/v1/{}/data/{}",
                config.url.trim_end_matches('/'),
                config.mount_point,
                path
            );
            let response: KvV2ReadResponse = client
                .get(&read_url)
                .header("X-Vault-Token", &login.auth.client_token)
                .send()
                .await
                .map_err(|err| DeployerError::Secret(format!("vault read of {path} failed: {err}")))?
                .error_for_status()
                .map_err(|err| DeployerError::Secret(format!("vault read of {path} failed: {err}")))?
                .json()
                .await
                .map_err(|err| DeployerError::Secret(format!("invalid vault read response for {path}: {err}")))?;
            keys.extend(response.data.data);
        }

        Ok(Self { keys })
    }
}

#[async_trait]
impl SecretStore for VaultSecretStore {
    async fn load(&self) -> Result<BTreeMap<String, Value>> {
        Ok(self.keys.clone())
    }
}

/// Test-only override letting unit tests exercise `VaultSecretStore` paths
/// without a live Vault server.
fn test_secret_store() -> &'static Mutex<Option<BTreeMap<String, Value>>> {
    static TEST_SECRET_STORE: OnceLock<Mutex<Option<BTreeMap<String, Value>>>> = OnceLock::new();
    TEST_SECRET_STORE.get_or_init(|| Mutex::new(None))
}

fn test_secret_override() -> Option<BTreeMap<String, Value>> {
    test_secret_store().lock().unwrap().clone()
}

pub fn set_test_secrets(keys: BTreeMap<String, Value>) {
    *test_secret_store().lock().unwrap() = Some(keys);
}

pub fn clear_test_secrets() {
    *test_secret_store().lock().unwrap() = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn noop_store_returns_empty_map() {
        let store = NoopSecretStore;
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn vault_store_uses_test_override_when_present() {
        clear_test_secrets();
        let mut keys = BTreeMap::new();
        keys.insert("ANANKE_CONNECTOR_PASSWORD_admin".to_string(), json!("hunter2"));
        set_test_secrets(keys.clone());

        let config = VaultConfig {
            role_id: "role".into(),
            paths: vec!["net/creds".into()],
            url: "https://vault.example.net".into(),
            mount_point: "secret".into(),
        };
        let store = VaultSecretStore::discover(&config, "secret-id").await.unwrap();
        assert_eq!(store.load().await.unwrap(), keys);
        clear_test_secrets();
    }
}
