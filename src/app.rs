//! Orchestration (replaces the original `actions/ananke_cli.py` adapter plus
//! `struct/dispatch.py`'s `Dispatch` object): wires the Settings loader,
//! Target Resolver, Config Compiler, Deploy Engine, Status Checker, and
//! Notifications together behind the two CLI subcommands.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::compile::{self, merge::MergeRegistry};
use crate::config::{Cli, Command, GetArgs, SetArgs};
use crate::connector::gnmi::GnmiConnector;
use crate::connector::transform::TransformRegistry;
use crate::connector::{credentials, GetFormat};
use crate::deploy;
use crate::error::{DeployerError, Result};
use crate::notify::{Notifier, SlackNotifier};
use crate::response::Response;
use crate::secrets::{NoopSecretStore, SecretStore, VaultSecretStore};
use crate::settings::{self, Settings, TargetKind, TargetVars};
use crate::target;
use crate::telemetry::{CheckResults, StatusCheck, TelemetryPoller};
use crate::value;

/// A reasonable wall-clock ceiling on the deploy fan-out; the original had
/// none (it polled `ProcessPoolExecutor` results for up to 200s and raised),
/// kept here as the closest analog (spec.md §9).
const DEPLOY_TIMEOUT: Duration = Duration::from_secs(200);

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Set(args) => run_set(args).await,
        Command::Get(args) => run_get(args).await,
    }
}

async fn build_secret_store(settings: &Settings) -> Result<Box<dyn SecretStore>> {
    match &settings.vault {
        Some(vault) => {
            let secret_id = std::env::var("ANANKE_VAULT_SECRET").map_err(|_| {
                DeployerError::Secret(
                    "ANANKE_VAULT_SECRET env variable must be populated for vault use".into(),
                )
            })?;
            Ok(Box::new(VaultSecretStore::discover(vault, &secret_id).await?))
        }
        None => Ok(Box::new(NoopSecretStore)),
    }
}

fn target_tokens(args: &SetArgs) -> BTreeMap<Option<String>, BTreeSet<String>> {
    let sections: BTreeSet<String> = args.sections.iter().cloned().collect();
    let tokens = args.target_tokens();
    if tokens.is_empty() {
        let mut map = BTreeMap::new();
        map.insert(None, sections);
        return map;
    }
    let mut map = BTreeMap::new();
    for token in tokens {
        map.insert(Some(token), sections.clone());
    }
    map
}

/// Applies secrets over a target's own variables, secret keys winning on
/// collision (mirrors `target_vars.update(self.secrets)`, a shallow
/// top-level override, not a deep merge).
fn apply_secrets(variables: &mut Value, secrets: &BTreeMap<String, Value>) {
    if let Some(map) = variables.as_object_mut() {
        for (key, val) in secrets {
            map.insert(key.clone(), val.clone());
        }
    }
}

async fn run_set(args: SetArgs) -> Result<()> {
    args.validate()?;

    let config_dir = settings::config_dir()?;
    let settings = Settings::load(&config_dir)?;
    let known = settings::load_target_vars(&config_dir)?;
    let secret_store = build_secret_store(&settings).await?;
    let secrets = secret_store.load().await?;

    let tokens = target_tokens(&args);
    let resolved = target::resolve(&tokens, &known, settings.domain_name.as_deref());

    let merge_registry = MergeRegistry::new();
    let write_method_override = args.write_method()?;

    let mut targets = Vec::new();
    for (qualified_id, sections) in &resolved {
        let short_id = target::short_id(qualified_id).to_string();
        let Some(target_vars) = known.get(&short_id) else {
            tracing::warn!(target = %qualified_id, "resolved target has no known vars, skipping");
            continue;
        };

        let mut variables = target_vars.variables.clone();
        apply_secrets(&mut variables, &secrets);
        let roles = target_vars.roles();
        let is_service = target_vars.kind == TargetKind::Service;

        let mut config = compile::compile(
            &config_dir,
            &short_id,
            is_service,
            &settings,
            &variables,
            &roles,
            sections,
            &merge_registry,
        )?;

        if args.dry_run {
            for pack in config.packs.iter_mut() {
                pack.tags.insert("dry-run".to_string());
            }
        }

        let target = deploy::build_target(qualified_id.clone(), config, &settings, variables)?;
        targets.push(target);
    }

    let settings = Arc::new(settings);
    let transform_registry = Arc::new(TransformRegistry::new());

    let responses = deploy::run_deploy(
        targets,
        Arc::clone(&settings),
        Arc::clone(&transform_registry),
        write_method_override,
        DEPLOY_TIMEOUT,
    )
    .await?;

    print_deploy_results(&responses, args.debug, args.dry_run);

    if args.post_checks > 0 && !args.dry_run {
        run_post_checks(&args, &settings, &known, &resolved, &secrets).await?;
    }

    Ok(())
}

fn print_deploy_results(responses: &[Response], debug: bool, dry_run: bool) {
    for response in responses {
        println!("target: {}", response.source);
        if dry_run || debug {
            println!("config: {}", serde_json::to_string_pretty(&response.body).unwrap_or_default());
        }
        if debug {
            println!(
                "device response: {}",
                serde_json::to_string_pretty(&response.output).unwrap_or_default()
            );
            for message in &response.messages {
                println!("message: {}", message.text);
            }
        } else if let Some(worst) = response.worst_message() {
            use crate::response::Priority;
            let message = match worst.priority {
                Priority::Error => "One or more config sections failed".to_string(),
                Priority::Warning | Priority::Info => worst.text.clone(),
            };
            println!("message: {message}");
        } else {
            println!("message: Config section(s) pushed to device");
        }
    }
}

/// Builds a `TelemetryPoller` for one target, reusing the same
/// connector-selection rule as the deploy path (gNMI devices only; services
/// have no telemetry poller and are excluded from post-checks).
fn build_poller(target_id: &str, settings: &Settings, variables: &Value) -> Result<Arc<dyn TelemetryPoller>> {
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

async fn run_post_checks(
    args: &SetArgs,
    settings: &Settings,
    known: &BTreeMap<String, TargetVars>,
    resolved: &BTreeMap<String, BTreeSet<String>>,
    secrets: &BTreeMap<String, Value>,
) -> Result<()> {
    if settings.post_checks.paths.is_empty() {
        return Err(DeployerError::Config("No paths specified for post-checks".into()));
    }

    let mut check_targets = Vec::new();
    for qualified_id in resolved.keys() {
        let short_id = target::short_id(qualified_id).to_string();
        let Some(target_vars) = known.get(&short_id) else { continue };
        if target_vars.kind == TargetKind::Service {
            continue;
        }
        let mut variables = target_vars.variables.clone();
        apply_secrets(&mut variables, secrets);
        if value::get_bool_path(&variables, &["management", "disable-set"]).unwrap_or(false) {
            continue;
        }
        let poller = build_poller(qualified_id, settings, &variables)?;
        check_targets.push((qualified_id.clone(), poller));
    }

    let status_check = StatusCheck::build(check_targets, settings.post_checks.paths.clone()).await?;

    let post_check_interval = args.post_check_interval.unwrap_or(10);
    let diff_tolerance = args.diff_tolerance.unwrap_or(10);
    tokio::time::sleep(Duration::from_secs(post_check_interval)).await;

    let slack_webhook = std::env::var("ANANKE_SLACK_WEBHOOK")
        .ok()
        .or_else(|| settings.post_checks.slack_webhook.clone());
    let notifier = slack_webhook.filter(|_| args.slack_post_checks).map(SlackNotifier::new);

    let mut history: Vec<CheckResults> = Vec::new();
    let total = args.post_checks as usize;
    for check_number in 0..total {
        let results = status_check.poll(Some(diff_tolerance)).await?;
        history.push(results);
        println!("Post check {}/{}", check_number + 1, total);
        for (host, diffs) in &history[check_number] {
            println!("  {host}:");
            if diffs.is_empty() {
                println!("    \u{2705} No diffs");
            } else {
                for diff in diffs {
                    println!("    - {diff:?}");
                }
            }
        }
        if let Some(notifier) = &notifier {
            notifier.notify_check(&history, check_number, total).await?;
        }
        if check_number + 1 < total {
            tokio::time::sleep(Duration::from_secs(post_check_interval)).await;
        }
    }

    Ok(())
}

async fn run_get(args: GetArgs) -> Result<()> {
    let config_dir = settings::config_dir()?;
    let settings = Settings::load(&config_dir)?;
    let known = settings::load_target_vars(&config_dir)?;

    let short_id = target::short_id(&args.hostname).to_string();
    let target_vars = known.get(&short_id).ok_or_else(|| {
        DeployerError::Config(format!("'{}' does not appear to be a device", args.hostname))
    })?;

    let qualified_id = match &settings.domain_name {
        Some(domain) if !domain.is_empty() => format!("{short_id}.{domain}"),
        _ => short_id.clone(),
    };

    let connector = deploy::build_connector(&qualified_id, &settings, &target_vars.variables)?;
    let output = connector
        .get(&args.path, args.operational, args.oneline, false, GetFormat::Json)
        .await?;
    if args.oneline {
        println!("{output}");
    } else {
        println!("{}", serde_json::to_string_pretty(&output).unwrap_or_default());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_tokens_defaults_to_none_token_when_no_targets_given() {
        let args = SetArgs {
            targets: vec![],
            sections: vec!["iface".to_string()],
            method: None,
            debug: false,
            dry_run: false,
            post_checks: 0,
            post_check_interval: None,
            diff_tolerance: None,
            slack_post_checks: false,
        };
        let tokens = target_tokens(&args);
        assert_eq!(tokens.get(&None).unwrap(), &BTreeSet::from(["iface".to_string()]));
    }

    #[test]
    fn target_tokens_one_entry_per_explicit_target() {
        let args = SetArgs {
            targets: vec!["dev1".to_string(), "dev2".to_string()],
            sections: vec![],
            method: None,
            debug: false,
            dry_run: false,
            post_checks: 0,
            post_check_interval: None,
            diff_tolerance: None,
            slack_post_checks: false,
        };
        let tokens = target_tokens(&args);
        assert!(tokens.contains_key(&Some("dev1".to_string())));
        assert!(tokens.contains_key(&Some("dev2".to_string())));
    }

    #[test]
    fn apply_secrets_overrides_on_collision() {
        let mut variables = serde_json::json!({"a": 1, "b": 2});
        let mut secrets = BTreeMap::new();
        secrets.insert("a".to_string(), serde_json::json!(99));
        apply_secrets(&mut variables, &secrets);
        assert_eq!(variables["a"], 99);
        assert_eq!(variables["b"], 2);
    }
}
