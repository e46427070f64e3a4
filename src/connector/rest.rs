//! Vendor REST service backends (component D). Each backend implements the
//! same shape: fetch the service catalog, match the candidate pack's
//! endpoints against an existing service, and either update, delete-then-
//! recreate, or create.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::compile::ConfigPack;
use crate::error::{DeployerError, Result};

use super::{Connector, GetFormat};

/// Trims `elements` trailing path segments off `url`, mirroring
/// `AnankeRestResource.trim_url` in the original: the generated pack path
/// carries one segment (a discriminator not meaningful to the wire call)
/// that must be stripped before use as the catalog/collection URL.
pub fn trim_url(url: &str, elements: usize) -> String {
    let mut trimmed = url.to_string();
    for _ in 0..elements {
        if let Some(idx) = trimmed.rfind('/') {
            trimmed.truncate(idx);
        }
    }
    trimmed
}

fn transport_err(path: &str, err: impl std::fmt::Display) -> DeployerError {
    DeployerError::Transport { path: path.to_string(), reason: err.to_string() }
}

fn unsupported(op: &str) -> DeployerError {
    DeployerError::Other(format!("{op} is not supported by this REST connector"))
}

/// A port-circuit-style vendor: port+VLAN tuple matching, bandwidth drift
/// triggers delete-and-poll-for-confirmation before recreating.
pub struct PortCircuitBackend {
    client: Client,
    bearer_token: String,
    delete_confirm_retries: u32,
    delete_confirm_interval: Duration,
}

impl PortCircuitBackend {
    pub fn new(bearer_token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            bearer_token: bearer_token.into(),
            delete_confirm_retries: 10,
            delete_confirm_interval: Duration::from_secs(1),
        }
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.bearer_auth(&self.bearer_token)
    }

    fn configured_ports(content: &Value) -> Vec<(String, Option<Value>)> {
        content
            .get("interfaces")
            .and_then(Value::as_array)
            .map(|ports| {
                ports
                    .iter()
                    .map(|port| {
                        (
                            port.get("port_circuit_id").and_then(Value::as_str).unwrap_or_default().to_string(),
                            port.get("vlan").cloned().filter(|v| !v.is_null()),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn process_service_match(&self, pack: &ConfigPack, service_list: &[Value]) -> Result<Value> {
        let configured_ports = Self::configured_ports(&pack.content);
        let configured_bandwidth = pack.content.pointer("/bandwidth/speed").cloned();

        for service in service_list {
            let service_ports = Self::configured_ports(service);
            if configured_ports.len() != service_ports.len() {
                continue;
            }
            let matches = configured_ports.iter().all(|entry| service_ports.contains(entry));
            if !matches {
                continue;
            }
            let service_bandwidth = service.pointer("/bandwidth/speed").cloned();
            if configured_bandwidth != service_bandwidth {
                let Some(circuit_id) = service.get("vc_circuit_id").and_then(Value::as_str) else {
                    break;
                };
                let delete_url = format!("{}/{}", pack.path, circuit_id);
                self.authorized(self.client.delete(&delete_url))
                    .send()
                    .await
                    .map_err(|err| transport_err(&delete_url, err))?;

                for _ in 0..self.delete_confirm_retries {
                    let body: Value = self
                        .authorized(self.client.get(&delete_url))
                        .send()
                        .await
                        .map_err(|err| transport_err(&delete_url, err))?
                        .json()
                        .await
                        .unwrap_or(Value::Null);
                    let confirmed = body
                        .get("message")
                        .and_then(Value::as_str)
                        .map(|m| m.contains("Virtual circuit not found"))
                        .unwrap_or(false);
                    if confirmed {
                        break;
                    }
                    tokio::time::sleep(self.delete_confirm_interval).await;
                }
            }
            break;
        }

        let create_url = format!("{}/backbone", pack.path);
        let response = self
            .authorized(self.client.post(&create_url).json(&pack.content))
            .send()
            .await
            .map_err(|err| transport_err(&create_url, err))?;
        if !response.status().is_success() {
            return Err(transport_err(&create_url, response.status()));
        }
        response.json().await.map_err(|err| transport_err(&create_url, err))
    }
}

#[async_trait]
impl Connector for PortCircuitBackend {
    async fn set_config(&self, pack: &ConfigPack) -> Result<Value> {
        let catalog_path = trim_url(&pack.path, 1);
        let catalog: Vec<Value> = self
            .authorized(self.client.get(&catalog_path))
            .send()
            .await
            .map_err(|err| transport_err(&catalog_path, err))?
            .json()
            .await
            .map_err(|err| transport_err(&catalog_path, err))?;
        let mut pack = pack.clone();
        pack.path = catalog_path;
        self.process_service_match(&pack, &catalog).await
    }

    async fn get(&self, _path: &str, _operational: bool, _oneline: bool, _include_meta: bool, _format: GetFormat) -> Result<Value> {
        Err(unsupported("get"))
    }

    async fn capabilities(&self) -> Result<Value> {
        Ok(json!({}))
    }
}

/// A virtual-cross-connect-style vendor: aEnd/bEnd productUid+vlan
/// matching, PUT to update, reformatted POST purchase body to create.
pub struct VirtualCrossConnectBackend {
    client: Client,
    products_url: String,
    token_endpoint: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<String>>,
}

impl VirtualCrossConnectBackend {
    pub fn new(
        products_url: impl Into<String>,
        token_endpoint: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            products_url: products_url.into(),
            token_endpoint: token_endpoint.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token: Mutex::new(None),
        }
    }

    async fn bearer_token(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }
        let response: Value = self
            .client
            .post(&self.token_endpoint)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|err| transport_err(&self.token_endpoint, err))?
            .json()
            .await
            .map_err(|err| transport_err(&self.token_endpoint, err))?;
        let token = response
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| transport_err(&self.token_endpoint, "no access_token in response"))?
            .to_string();
        *guard = Some(token.clone());
        Ok(token)
    }

    fn endpoint_tuple(product_uid: &str, vlan: &Value) -> (String, Value) {
        (product_uid.to_string(), vlan.clone())
    }

    fn configured_endpoints(content: &Value) -> Option<[(String, Value); 2]> {
        let a_uid = content.get("aEndProductUid")?.as_str()?.to_string();
        let a_vlan = content.get("aEndVlan")?.clone();
        let b_uid = content.get("bEndProductUid")?.as_str()?.to_string();
        let b_vlan = content.get("bEndVlan")?.clone();
        Some([(a_uid, a_vlan), (b_uid, b_vlan)])
    }

    fn purchase_body(pack: &ConfigPack) -> Value {
        let content = &pack.content;
        let mut b_end = json!({
            "productUid": content.get("bEndProductUid"),
            "vlan": pack.original_content.get("bEndVlan"),
        });
        if let Some(pairing_key) = content.get("pairingKey") {
            b_end["partnerConfig"] = json!({"connectType": "GOOGLE", "pairingKey": pairing_key});
        }
        json!([{
            "productUid": content.get("aEndProductUid"),
            "associatedVxcs": [{
                "productName": content.get("name"),
                "rateLimit": content.get("rateLimit"),
                "aEnd": {"vlan": content.get("aEndVlan")},
                "bEnd": b_end,
            }]
        }])
    }

    async fn process_service_match(&self, pack: &ConfigPack, service_list: &[Value]) -> Result<Value> {
        let token = self.bearer_token().await?;
        let Some([a, b]) = Self::configured_endpoints(&pack.content) else {
            return Err(DeployerError::Render("pack content missing aEnd/bEnd fields".into()));
        };
        let configured: Vec<_> = vec![
            Self::endpoint_tuple(&a.0, &a.1),
            Self::endpoint_tuple(&b.0, &b.1),
        ];

        for service in service_list {
            let Some(service_uid) = service.get("productUid").and_then(Value::as_str) else { continue };
            let a_end = service.pointer("/aEnd");
            let b_end = service.pointer("/bEnd");
            let service_endpoints = match (a_end, b_end) {
                (Some(a_end), Some(b_end)) => vec![
                    (a_end.get("productUid").and_then(Value::as_str).unwrap_or_default().to_string(), a_end.get("vlan").cloned().unwrap_or(Value::Null)),
                    (b_end.get("productUid").and_then(Value::as_str).unwrap_or_default().to_string(), b_end.get("vlan").cloned().unwrap_or(Value::Null)),
                ],
                _ => continue,
            };
            if configured.iter().all(|c| service_endpoints.contains(c)) {
                let update_url = format!("{}/{}", pack.path, service_uid);
                let response = self
                    .client
                    .put(&update_url)
                    .bearer_auth(&token)
                    .json(&pack.content)
                    .send()
                    .await
                    .map_err(|err| transport_err(&update_url, err))?;
                return response.json().await.map_err(|err| transport_err(&update_url, err));
            }
        }

        let purchase_url = format!("{}/networkdesign/buy", trim_url(&pack.path, 2));
        let response = self
            .client
            .post(&purchase_url)
            .bearer_auth(&token)
            .json(&Self::purchase_body(pack))
            .send()
            .await
            .map_err(|err| transport_err(&purchase_url, err))?;
        response.json().await.map_err(|err| transport_err(&purchase_url, err))
    }
}

#[async_trait]
impl Connector for VirtualCrossConnectBackend {
    async fn set_config(&self, pack: &ConfigPack) -> Result<Value> {
        let token = self.bearer_token().await?;
        let catalog: Value = self
            .client
            .get(&self.products_url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|err| transport_err(&self.products_url, err))?
            .json()
            .await
            .map_err(|err| transport_err(&self.products_url, err))?;
        let service_list: Vec<Value> = catalog
            .get("data")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|product| product.get("associatedVxcs").and_then(Value::as_array))
            .flatten()
            .cloned()
            .collect();
        let mut pack = pack.clone();
        pack.path = trim_url(&pack.path, 1);
        self.process_service_match(&pack, &service_list).await
    }

    async fn get(&self, _path: &str, _operational: bool, _oneline: bool, _include_meta: bool, _format: GetFormat) -> Result<Value> {
        Err(unsupported("get"))
    }

    async fn capabilities(&self) -> Result<Value> {
        Ok(json!({}))
    }
}
