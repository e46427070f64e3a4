//! gNMI device backend (component D), built on the vendored `gnmi.proto`
//! surface (Capabilities/Get/Set) compiled by `build.rs`.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_stream::StreamExt;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};
use tonic::Request;

use crate::compile::ConfigPack;
use crate::error::{DeployerError, Result};
use crate::settings::WriteMethod;
use crate::telemetry::{TelemetryPoller, Update as TelemetryUpdate};

use super::{GetFormat, Connector};

mod proto {
    tonic::include_proto!("gnmi");
}

use proto::g_nmi_client::GNmiClient;
use proto::subscribe_request::Request as SubscribeRequestKind;
use proto::subscribe_response::Response as SubscribeResponseKind;
use proto::subscription::SubscriptionMode;
use proto::subscription_list::Mode as SubscriptionListMode;
use proto::{
    CapabilityRequest, GetRequest, Path, PathElem, SetRequest, Subscription, SubscribeRequest,
    SubscriptionList, TypedValue, Update,
};

const GNMI_RETRYABLE_FAULT: &str = "'YANG framework' detected the 'fatal' condition 'Operation failed'";

fn parse_path(path: &str) -> Path {
    let elems = path
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|segment| PathElem { name: segment.to_string(), key: Default::default() })
        .collect();
    Path { elem: elems, origin: String::new(), target: String::new() }
}

fn update_for(path: &str, content: &Value) -> Result<Update> {
    let json_bytes = serde_json::to_vec(content)?;
    Ok(Update {
        path: Some(parse_path(path)),
        val: Some(TypedValue {
            value: Some(proto::typed_value::Value::JsonIetfVal(json_bytes)),
        }),
    })
}

/// Seam the Set RPC is sent through, so `set_config`'s retry-on-fault logic
/// (spec.md §8 Scenario 6) can be exercised against a stub instead of a live
/// tonic `Channel`.
#[async_trait]
trait SetTransport: Send + Sync {
    async fn channel(&self) -> Result<Channel>;
    async fn set(&self, request: Request<SetRequest>) -> std::result::Result<(), tonic::Status>;
}

struct ChannelTransport {
    host: String,
    port: u16,
    tls_server_override: Option<String>,
    cert_path: Option<PathBuf>,
    channel: Mutex<Option<Channel>>,
}

impl ChannelTransport {
    fn new(
        host: impl Into<String>,
        port: u16,
        tls_server_override: Option<String>,
        cert_path: Option<PathBuf>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            tls_server_override,
            cert_path,
            channel: Mutex::new(None),
        }
    }
}

#[async_trait]
impl SetTransport for ChannelTransport {
    async fn channel(&self) -> Result<Channel> {
        let mut guard = self.channel.lock().await;
        if let Some(channel) = guard.as_ref() {
            return Ok(channel.clone());
        }

        let uri = format!("https://{}:{}", self.host, self.port);
        let mut endpoint = Endpoint::from_shared(uri.clone())
            .map_err(|err| DeployerError::Transport { path: uri.clone(), reason: err.to_string() })?;

        if let Some(cert_path) = &self.cert_path {
            let pem = std::fs::read(cert_path)?;
            let mut tls = ClientTlsConfig::new().ca_certificate(Certificate::from_pem(pem));
            if let Some(server_name) = &self.tls_server_override {
                tls = tls.domain_name(server_name.clone());
            }
            endpoint = endpoint
                .tls_config(tls)
                .map_err(|err| DeployerError::Transport { path: uri.clone(), reason: err.to_string() })?;
        }

        let channel = endpoint
            .connect()
            .await
            .map_err(|err| DeployerError::Transport { path: uri, reason: err.to_string() })?;
        *guard = Some(channel.clone());
        Ok(channel)
    }

    async fn set(&self, request: Request<SetRequest>) -> std::result::Result<(), tonic::Status> {
        let channel = self
            .channel()
            .await
            .map_err(|err| tonic::Status::unavailable(err.to_string()))?;
        GNmiClient::new(channel).set(request).await?;
        Ok(())
    }
}

pub struct GnmiConnector {
    target_id: String,
    username: String,
    password: String,
    transport: Arc<dyn SetTransport>,
}

impl GnmiConnector {
    pub fn new(
        target_id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
        tls_server_override: Option<String>,
        cert_path: Option<PathBuf>,
    ) -> Self {
        Self {
            target_id: target_id.into(),
            username: username.into(),
            password: password.into(),
            transport: Arc::new(ChannelTransport::new(host, port, tls_server_override, cert_path)),
        }
    }

    #[cfg(test)]
    fn with_transport(
        target_id: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        transport: Arc<dyn SetTransport>,
    ) -> Self {
        Self {
            target_id: target_id.into(),
            username: username.into(),
            password: password.into(),
            transport,
        }
    }

    async fn client(&self) -> Result<GNmiClient<Channel>> {
        Ok(GNmiClient::new(self.transport.channel().await?))
    }

    fn auth_request<T>(&self, message: T) -> Result<Request<T>> {
        let mut request = Request::new(message);
        let username = self.username.parse().map_err(|_| DeployerError::Credential {
            target: self.target_id.clone(),
            reason: "username is not valid gRPC metadata (must be ASCII)".into(),
        })?;
        let password = self.password.parse().map_err(|_| DeployerError::Credential {
            target: self.target_id.clone(),
            reason: "password is not valid gRPC metadata (must be ASCII)".into(),
        })?;
        request.metadata_mut().insert("username", username);
        request.metadata_mut().insert("password", password);
        Ok(request)
    }

    async fn set_once(&self, pack: &ConfigPack) -> std::result::Result<(), tonic::Status> {
        let update = update_for(&pack.path, &pack.content).map_err(|err| {
            tonic::Status::internal(format!("could not encode config content: {err}"))
        })?;
        let mut request = SetRequest::default();
        match pack.write_method {
            WriteMethod::Replace => request.replace = vec![update],
            WriteMethod::Update => request.update = vec![update],
        }
        let request = self
            .auth_request(request)
            .map_err(|err| tonic::Status::invalid_argument(err.to_string()))?;
        self.transport.set(request).await
    }
}

#[async_trait]
impl Connector for GnmiConnector {
    async fn set_config(&self, pack: &ConfigPack) -> Result<Value> {
        match self.set_once(pack).await {
            Ok(()) => Ok(serde_json::json!({"path": pack.path, "status": "ok"})),
            Err(status) if status.message().contains(GNMI_RETRYABLE_FAULT) => {
                tracing::warn!(path = %pack.path, "caught gNMI fault, retrying once");
                self.set_once(pack).await.map_err(|err| DeployerError::Transport {
                    path: pack.path.clone(),
                    reason: err.to_string(),
                })?;
                Ok(serde_json::json!({"path": pack.path, "status": "ok", "retried": true}))
            }
            Err(status) => Err(DeployerError::Transport {
                path: pack.path.clone(),
                reason: status.to_string(),
            }),
        }
    }

    async fn get(
        &self,
        path: &str,
        operational: bool,
        oneline: bool,
        include_meta: bool,
        format: GetFormat,
    ) -> Result<Value> {
        if matches!(format, GetFormat::Yaml) && oneline {
            return Err(DeployerError::Other("YAML not supported in oneline mode".into()));
        }
        let request = GetRequest {
            path: vec![parse_path(path)],
            r#type: if operational { 0 } else { 1 },
            encoding: 4,
        };
        let mut client = self.client().await?;
        let response = client
            .get(self.auth_request(request)?)
            .await
            .map_err(|err| DeployerError::Transport { path: path.to_string(), reason: err.to_string() })?
            .into_inner();

        let mut values = Vec::new();
        for notification in response.notification {
            for update in notification.update {
                let Some(val) = update.val else { continue };
                let decoded: Value = match val.value {
                    Some(proto::typed_value::Value::JsonIetfVal(bytes))
                    | Some(proto::typed_value::Value::JsonVal(bytes)) => {
                        serde_json::from_slice(&bytes)?
                    }
                    Some(proto::typed_value::Value::StringVal(s)) => Value::String(s),
                    Some(proto::typed_value::Value::IntVal(i)) => Value::from(i),
                    Some(proto::typed_value::Value::UintVal(u)) => Value::from(u),
                    Some(proto::typed_value::Value::BoolVal(b)) => Value::from(b),
                    _ => Value::Null,
                };
                if include_meta {
                    values.push(serde_json::json!({"path": update.path, "val": decoded}));
                } else {
                    values.push(decoded);
                }
            }
        }
        Ok(Value::Array(values))
    }

    async fn capabilities(&self) -> Result<Value> {
        let mut client = self.client().await?;
        let response = client
            .capabilities(self.auth_request(CapabilityRequest {})?)
            .await
            .map_err(|err| DeployerError::Transport {
                path: self.target_id.clone(),
                reason: err.to_string(),
            })?
            .into_inner();
        Ok(serde_json::json!({
            "gnmi_version": response.g_nmi_version,
            "supported_encodings": response.supported_encodings,
            "supported_models": response
                .supported_models
                .into_iter()
                .map(|m| serde_json::json!({"name": m.name, "organization": m.organization, "version": m.version}))
                .collect::<Vec<_>>(),
        }))
    }
}

/// Polls a target's gNMI state via a fresh `Subscribe` RPC in `POLL` mode
/// per call, collecting every `Notification.update` until `sync_response`.
/// The vendored `gnmi.proto` surface has no "poll trigger" message, so unlike
/// `pygnmi`'s persistent poll-mode stream (`subscribe/telemetry.py`) each
/// `poll()` opens and tears down its own stream rather than reusing one
/// across calls (see DESIGN.md).
#[async_trait]
impl TelemetryPoller for GnmiConnector {
    async fn poll(&self, paths: &[String]) -> Result<Vec<TelemetryUpdate>> {
        let subscriptions = paths
            .iter()
            .map(|path| Subscription {
                path: Some(parse_path(path)),
                mode: SubscriptionMode::Sample as i32,
                sample_interval: 0,
                suppress_redundant: false,
                heartbeat_interval: 0,
            })
            .collect();

        let request = SubscribeRequest {
            request: Some(SubscribeRequestKind::Subscribe(SubscriptionList {
                prefix: None,
                subscription: subscriptions,
                qos: None,
                mode: SubscriptionListMode::Poll as i32,
                allow_aggregation: false,
                use_models: vec![],
                encoding: 4,
                updates_only: false,
            })),
        };

        let mut client = self.client().await?;
        let outbound = tokio_stream::iter(vec![request]);
        let mut inbound = client
            .subscribe(self.auth_request(outbound)?)
            .await
            .map_err(|err| DeployerError::Transport {
                path: self.target_id.clone(),
                reason: err.to_string(),
            })?
            .into_inner();

        let mut updates = Vec::new();
        while let Some(response) = inbound.next().await {
            let response = response.map_err(|err| DeployerError::Transport {
                path: self.target_id.clone(),
                reason: err.to_string(),
            })?;
            match response.response {
                Some(SubscribeResponseKind::Update(notification)) => {
                    for update in notification.update {
                        let Some(val) = update.val else { continue };
                        let path_str = update
                            .path
                            .map(|p| {
                                p.elem.into_iter().map(|e| e.name).collect::<Vec<_>>().join("/")
                            })
                            .unwrap_or_default();
                        let decoded: Value = match val.value {
                            Some(proto::typed_value::Value::JsonIetfVal(bytes))
                            | Some(proto::typed_value::Value::JsonVal(bytes)) => {
                                serde_json::from_slice(&bytes)?
                            }
                            Some(proto::typed_value::Value::StringVal(s)) => Value::String(s),
                            Some(proto::typed_value::Value::IntVal(i)) => Value::from(i),
                            Some(proto::typed_value::Value::UintVal(u)) => Value::from(u),
                            Some(proto::typed_value::Value::BoolVal(b)) => Value::from(b),
                            _ => Value::Null,
                        };
                        updates.push((format!("/{path_str}"), decoded));
                    }
                }
                Some(SubscribeResponseKind::SyncResponse(_)) => break,
                _ => {}
            }
        }
        Ok(updates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::compile::{Config, ConfigPack};
    use crate::response::Priority;

    #[test]
    fn parse_path_splits_on_slashes() {
        let path = parse_path("/interfaces/interface");
        assert_eq!(path.elem.len(), 2);
        assert_eq!(path.elem[0].name, "interfaces");
        assert_eq!(path.elem[1].name, "interface");
    }

    #[test]
    fn update_for_encodes_json_ietf() {
        let update = update_for("/a", &serde_json::json!({"x": 1})).unwrap();
        assert!(update.path.is_some());
        assert!(matches!(
            update.val.unwrap().value,
            Some(proto::typed_value::Value::JsonIetfVal(_))
        ));
    }

    /// Stub transport: first `set` call fails with the retryable fault
    /// status, every call after succeeds.
    struct FlakyTransport {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl SetTransport for FlakyTransport {
        async fn channel(&self) -> Result<Channel> {
            unreachable!("set_once never asks the transport for a channel directly")
        }

        async fn set(&self, _request: Request<SetRequest>) -> std::result::Result<(), tonic::Status> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(tonic::Status::internal(GNMI_RETRYABLE_FAULT))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn set_config_retries_once_on_retryable_fault_then_succeeds() {
        let connector = GnmiConnector::with_transport(
            "dev1",
            "user",
            "pass",
            Arc::new(FlakyTransport { attempts: AtomicUsize::new(0) }),
        );

        let config = Config {
            target_id: "dev1".to_string(),
            sections: BTreeSet::new(),
            packs: vec![ConfigPack {
                path: "/interfaces".to_string(),
                original_content: serde_json::json!({}),
                content: serde_json::json!({"a": 1}),
                write_method: WriteMethod::Replace,
                tags: BTreeSet::new(),
            }],
        };

        let response = crate::connector::deploy(
            "dev1",
            &serde_json::json!({}),
            &config,
            &connector,
            None,
            None,
        )
        .await;

        assert_eq!(response.output.len(), 1);
        assert!(response.messages.iter().all(|m| m.priority != Priority::Error));
    }
}
