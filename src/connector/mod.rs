//! Connector Abstraction (component D): a uniform interface over
//! heterogeneous deploy/get backends, plus the shared deploy contract every
//! backend runs through.

pub mod credentials;
pub mod gnmi;
pub mod rest;
pub mod transform;

use async_trait::async_trait;
use serde_json::Value;

use crate::compile::{Config, ConfigPack};
use crate::error::Result;
use crate::response::{Response, ResponseMessage};
use crate::settings::{Settings, WriteMethod};
use crate::value;
use transform::{Transform, TransformRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetFormat {
    Json,
    Yaml,
}

/// A live or lazily-opened session to one target.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn set_config(&self, pack: &ConfigPack) -> Result<Value>;
    async fn get(
        &self,
        path: &str,
        operational: bool,
        oneline: bool,
        include_meta: bool,
        format: GetFormat,
    ) -> Result<Value>;
    /// Devices only; services return an empty document.
    async fn capabilities(&self) -> Result<Value>;
}

/// Whether a registered transform applies to this target, per invariant 1:
/// true iff a transform plugin matching `platform.os` or `service-id` is
/// registered and `settings.transforms.module-directory` is configured.
pub fn resolve_transform<'r>(
    settings: &Settings,
    variables: &Value,
    registry: &'r TransformRegistry,
) -> Option<&'r dyn Transform> {
    settings.transforms.as_ref()?.module_directory.as_ref()?;
    let platform_id = value::get_str_path(variables, &["platform", "os"])
        .or_else(|| value::get_str_path(variables, &["service-id"]))?;
    registry.get(platform_id)
}

/// Runs the shared per-pack deploy contract (spec.md §4.D) against an
/// already-built connector.
pub async fn deploy(
    target_id: &str,
    variables: &Value,
    config: &Config,
    connector: &dyn Connector,
    transform: Option<&dyn Transform>,
    write_method_override: Option<WriteMethod>,
) -> Response {
    let mut response = Response::new(target_id);
    let disable_set =
        value::get_bool_path(variables, &["management", "disable-set"]).unwrap_or(false);

    for original_pack in &config.packs {
        let mut pack = original_pack.clone();
        if let Some(write_method) = write_method_override {
            pack.write_method = write_method;
        }

        let path = pack.path.clone();
        let pack = match transform {
            Some(transform) => match transform.transform(pack) {
                Ok(Some(pack)) => pack,
                Ok(None) => continue,
                Err(err) => {
                    response
                        .messages
                        .push(ResponseMessage::error(format!("transform for {path} failed: {err}")));
                    continue;
                }
            },
            None => pack,
        };

        response.body.push(serde_json::json!({
            "path": pack.path,
            "write-method": pack.write_method.as_str(),
            "content": pack.content,
        }));

        if pack.tags.contains("dry-run") {
            response.messages.push(ResponseMessage::info("Config dry-run"));
            continue;
        }

        if disable_set {
            response
                .messages
                .push(ResponseMessage::warning("Write disabled, skipping"));
            return response;
        }

        match connector.set_config(&pack).await {
            Ok(output) => {
                response.output.push(output);
                response.messages.push(ResponseMessage::info(format!(
                    "Config for {} pushed to device",
                    pack.path
                )));
            }
            Err(err) => {
                response
                    .messages
                    .push(ResponseMessage::error(format!("Config for {} failed: {err}", pack.path)));
            }
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::Config;
    use crate::settings::WriteMethod;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StubConnector {
        calls: AtomicUsize,
        fail_on: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Connector for StubConnector {
        async fn set_config(&self, pack: &ConfigPack) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on.lock().unwrap().contains(&pack.path) {
                return Err(crate::error::DeployerError::Transport {
                    path: pack.path.clone(),
                    reason: "boom".into(),
                });
            }
            Ok(json!({"ok": true}))
        }

        async fn get(&self, _: &str, _: bool, _: bool, _: bool, _: GetFormat) -> Result<Value> {
            unimplemented!()
        }

        async fn capabilities(&self) -> Result<Value> {
            unimplemented!()
        }
    }

    fn pack(path: &str) -> ConfigPack {
        ConfigPack {
            path: path.to_string(),
            original_content: json!({}),
            content: json!({}),
            write_method: WriteMethod::Replace,
            tags: BTreeSet::new(),
        }
    }

    #[tokio::test]
    async fn disable_set_returns_early_without_remaining_bodies() {
        let connector = StubConnector { calls: AtomicUsize::new(0), fail_on: Mutex::new(vec![]) };
        let config = Config {
            target_id: "dev1".into(),
            sections: BTreeSet::new(),
            packs: vec![pack("/a"), pack("/b")],
        };
        let variables = json!({"management": {"disable-set": true}});
        let response = deploy("dev1", &variables, &config, &connector, None, None).await;
        assert_eq!(response.body.len(), 1);
        assert_eq!(connector.calls.load(Ordering::SeqCst), 0);
        assert_eq!(response.messages[0].text, "Write disabled, skipping");
    }

    #[tokio::test]
    async fn per_pack_transport_failure_does_not_abort_remaining_packs() {
        let connector = StubConnector {
            calls: AtomicUsize::new(0),
            fail_on: Mutex::new(vec!["/a".to_string()]),
        };
        let config = Config {
            target_id: "dev1".into(),
            sections: BTreeSet::new(),
            packs: vec![pack("/a"), pack("/b")],
        };
        let response = deploy("dev1", &json!({}), &config, &connector, None, None).await;
        assert_eq!(response.body.len(), 2);
        assert_eq!(connector.calls.load(Ordering::SeqCst), 2);
        assert!(response.messages.iter().any(|m| m.text.contains("failed")));
        assert!(response.messages.iter().any(|m| m.text.contains("pushed")));
    }

    #[tokio::test]
    async fn dry_run_tag_skips_wire_call() {
        let connector = StubConnector { calls: AtomicUsize::new(0), fail_on: Mutex::new(vec![]) };
        let mut dry_pack = pack("/a");
        dry_pack.tags.insert("dry-run".to_string());
        let config = Config {
            target_id: "dev1".into(),
            sections: BTreeSet::new(),
            packs: vec![dry_pack],
        };
        let response = deploy("dev1", &json!({}), &config, &connector, None, None).await;
        assert_eq!(connector.calls.load(Ordering::SeqCst), 0);
        assert_eq!(response.messages[0].text, "Config dry-run");
    }

    #[tokio::test]
    async fn write_method_override_replaces_every_pack() {
        let connector = StubConnector { calls: AtomicUsize::new(0), fail_on: Mutex::new(vec![]) };
        let config = Config {
            target_id: "dev1".into(),
            sections: BTreeSet::new(),
            packs: vec![pack("/a")],
        };
        let response = deploy(
            "dev1",
            &json!({}),
            &config,
            &connector,
            None,
            Some(WriteMethod::Update),
        )
        .await;
        assert_eq!(response.body[0]["write-method"], "update");
    }
}
