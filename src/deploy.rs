//! Deploy Engine (component E). Builds one connector per target and runs
//! the shared deploy contract (`connector::deploy`) for every target
//! concurrently, replacing the original's `ProcessPoolExecutor` fan-out with
//! a `tokio::task` fan-out bounded by a wall-clock timeout (spec.md §9).

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::compile::Config;
use crate::connector::credentials;
use crate::connector::gnmi::GnmiConnector;
use crate::connector::rest::{PortCircuitBackend, VirtualCrossConnectBackend};
use crate::connector::transform::TransformRegistry;
use crate::connector::{resolve_transform, Connector};
use crate::error::{DeployerError, Result};
use crate::response::Response;
use crate::settings::{Settings, WriteMethod};
use crate::value;

/// Everything a single target's deploy needs: the connector it talks to and
/// the compiled config to push. Whether a transform applies is resolved
/// against the shared `TransformRegistry` at deploy time (see `run_deploy`),
/// not stored here, since the registry owns the `Transform` trait objects.
pub struct DeployTarget {
    pub target_id: String,
    pub variables: Value,
    pub config: Config,
    pub connector: Arc<dyn Connector>,
}

/// Builds the connector for one target, matching `Dispatch.build_targets`
/// (devices always get `GnmiDevice`; services pick a backend from
/// `variables.service-id`, mirroring `connectors/services.py`'s concrete
/// subclasses).
pub fn build_connector(
    target_id: &str,
    settings: &Settings,
    variables: &Value,
) -> Result<Arc<dyn Connector>> {
    if let Some(service_id) = value::get_str_path(variables, &["service-id"]) {
        return build_service_connector(target_id, service_id, variables);
    }

    let credentials = credentials::get_connector_credentials(variables, settings)?;
    let port = value::get_i64_path(variables, &["management", "gnmi-port"])
        .map(|p| p as u16)
        .unwrap_or(50051);
    let tls_server_override =
        value::get_str_path(variables, &["management", "tls-server"]).map(str::to_string);
    let cert_path = credentials::resolve_certificate(settings, variables)?;

    Ok(Arc::new(GnmiConnector::new(
        target_id,
        target_id,
        port,
        credentials.username,
        credentials.password,
        tls_server_override,
        cert_path,
    )))
}

fn var_str(variables: &Value, key: &str) -> Result<String> {
    value::get_str_path(variables, &[key]).map(str::to_string).ok_or_else(|| {
        DeployerError::Credential {
            target: key.to_string(),
            reason: format!("{key} not present in target variables"),
        }
    })
}

fn build_service_connector(
    target_id: &str,
    service_id: &str,
    variables: &Value,
) -> Result<Arc<dyn Connector>> {
    match service_id {
        "packetfabric" => {
            let token = var_str(variables, "ANANKE_PACKETFABRIC_API_KEY")?;
            Ok(Arc::new(PortCircuitBackend::new(token)))
        }
        "megaport" => {
            let client_id = var_str(variables, "ANANKE_MEGAPORT_CLIENT_ID")?;
            let client_secret = var_str(variables, "ANANKE_MEGAPORT_CLIENT_SECRET")?;
            Ok(Arc::new(VirtualCrossConnectBackend::new(
                "https://api-staging.megaport.com/v2/products",
                "https://api-staging.megaport.com/oauth2/token",
                client_id,
                client_secret,
            )))
        }
        other => Err(DeployerError::Config(format!(
            "target {target_id} has unrecognized service-id '{other}'"
        ))),
    }
}

/// Builds a `DeployTarget` for one resolved target id, combining the
/// compiled config with its connector.
pub fn build_target(
    target_id: String,
    config: Config,
    settings: &Settings,
    variables: Value,
) -> Result<DeployTarget> {
    let connector = build_connector(&target_id, settings, &variables)?;
    Ok(DeployTarget { target_id, variables, config, connector })
}

/// Runs the shared deploy contract for every target concurrently, bounded by
/// `timeout`. A target whose pack list is empty still produces a `Response`
/// with no messages.
pub async fn run_deploy(
    targets: Vec<DeployTarget>,
    settings: Arc<Settings>,
    transform_registry: Arc<TransformRegistry>,
    write_method_override: Option<WriteMethod>,
    timeout: Duration,
) -> Result<Vec<Response>> {
    let fan_out = async {
        let mut set = tokio::task::JoinSet::new();
        for target in targets {
            let settings = Arc::clone(&settings);
            let transform_registry = Arc::clone(&transform_registry);
            set.spawn(async move {
                let transform = resolve_transform(&settings, &target.variables, &transform_registry);
                crate::connector::deploy(
                    &target.target_id,
                    &target.variables,
                    &target.config,
                    target.connector.as_ref(),
                    transform,
                    write_method_override,
                )
                .await
            });
        }
        let mut responses = Vec::new();
        while let Some(joined) = set.join_next().await {
            responses.push(joined.map_err(|err| DeployerError::Other(err.to_string()))?);
        }
        Ok(responses)
    };

    match tokio::time::timeout(timeout, fan_out).await {
        Ok(result) => result,
        Err(_) => Err(DeployerError::DeployTimedOut(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{CertificateConfig, Settings};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn empty_settings() -> Settings {
        Settings {
            domain_name: None,
            username: Some("admin".to_string()),
            certificate: None,
            transforms: None,
            priority: vec![],
            write_methods: BTreeMap::new(),
            merge_bindings: BTreeMap::new(),
            vault: None,
            post_checks: Default::default(),
        }
    }

    #[test]
    fn builds_gnmi_connector_for_device_with_management_vars() {
        std::env::set_var("ANANKE_CONNECTOR_PASSWORD", "hunter2");
        let settings = empty_settings();
        let variables = json!({"management": {"gnmi-port": 57400}});
        let connector = build_connector("dev1", &settings, &variables);
        assert!(connector.is_ok());
        std::env::remove_var("ANANKE_CONNECTOR_PASSWORD");
    }

    #[test]
    fn unrecognized_service_id_is_a_config_error() {
        let settings = empty_settings();
        let variables = json!({"service-id": "mystery-vendor"});
        let err = build_connector("svc1", &settings, &variables).unwrap_err();
        assert!(matches!(err, DeployerError::Config(_)));
    }

    #[test]
    fn missing_cert_config_is_unused_ignore() {
        let _ = CertificateConfig { directory: None, name: None };
    }
}
