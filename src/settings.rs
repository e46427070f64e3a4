//! Settings & Variables Loader (component A).
//!
//! Reads the one global `settings.yaml` and every per-target `vars.yaml`
//! rooted under `ANANKE_CONFIG`, and merges secrets fetched once at startup
//! into each target's variables map (secret keys win on collision).

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use walkdir::WalkDir;

use crate::error::{DeployerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMethod {
    Replace,
    Update,
}

impl WriteMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMethod::Replace => "replace",
            WriteMethod::Update => "update",
        }
    }
}

impl std::str::FromStr for WriteMethod {
    type Err = DeployerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "replace" => Ok(WriteMethod::Replace),
            "update" => Ok(WriteMethod::Update),
            other => Err(DeployerError::Config(format!(
                "unknown write method '{other}', must be 'replace' or 'update'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CertificateConfig {
    pub directory: Option<PathBuf>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergeBindingSpec {
    /// Name of a registered `MergeBinding`. Kept as `object` to mirror the
    /// original settings.yaml shape (`{binding, object}`); `binding` names a
    /// module path in the original Python implementation and has no
    /// equivalent here since bindings are registered explicitly in Rust
    /// (see `compile::merge::MergeRegistry`).
    #[serde(default)]
    pub binding: Option<String>,
    pub object: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VaultConfig {
    #[serde(rename = "role-id")]
    pub role_id: String,
    pub paths: Vec<String>,
    pub url: String,
    #[serde(rename = "mount-point")]
    pub mount_point: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostChecksConfig {
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(rename = "slack-webhook", default)]
    pub slack_webhook: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransformsConfig {
    #[serde(rename = "module-directory", default)]
    pub module_directory: Option<PathBuf>,
}

/// Process-wide, immutable-after-load settings document (`settings.yaml`).
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(rename = "domain-name", default)]
    pub domain_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub certificate: Option<CertificateConfig>,
    #[serde(default)]
    pub transforms: Option<TransformsConfig>,
    #[serde(default)]
    pub priority: Vec<String>,
    #[serde(rename = "write-methods")]
    pub write_methods: BTreeMap<String, WriteMethod>,
    #[serde(rename = "merge-bindings", default)]
    pub merge_bindings: BTreeMap<String, MergeBindingSpec>,
    #[serde(default)]
    pub vault: Option<VaultConfig>,
    #[serde(rename = "post-checks", default)]
    pub post_checks: PostChecksConfig,
}

impl Settings {
    pub fn default_write_method(&self) -> Result<WriteMethod> {
        self.write_methods.get("default").copied().ok_or_else(|| {
            DeployerError::Config("settings.write-methods.default is required".into())
        })
    }

    pub fn write_method_for(&self, path: &str) -> Result<WriteMethod> {
        Ok(self
            .write_methods
            .get(path)
            .copied()
            .unwrap_or(self.default_write_method()?))
    }

    pub fn load(config_dir: &Path) -> Result<Self> {
        let settings_path = config_dir.join("settings.yaml");
        let text = std::fs::read_to_string(&settings_path).map_err(|err| {
            DeployerError::Config(format!(
                "failed to read {}: {err}",
                settings_path.display()
            ))
        })?;
        let settings: Settings = serde_yaml_bw::from_str(&text)
            .map_err(|err| DeployerError::Config(format!("invalid settings.yaml: {err}")))?;
        // Fail fast: default write method must be present.
        settings.default_write_method()?;
        Ok(settings)
    }
}

/// The kind of a target, derived from whether its variables carry
/// `platform.os` (device) or `service-id` (service).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Device,
    Service,
}

/// Per-target variables document, loaded from `devices/<id>/vars.yaml` or
/// `services/<id>/vars.yaml`.
#[derive(Debug, Clone)]
pub struct TargetVars {
    pub id: String,
    pub kind: TargetKind,
    pub variables: Value,
}

impl TargetVars {
    pub fn roles(&self) -> Vec<String> {
        crate::value::get(&self.variables, "roles")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn platform_os(&self) -> Option<&str> {
        crate::value::get_str_path(&self.variables, &["platform", "os"])
    }

    pub fn service_id(&self) -> Option<&str> {
        crate::value::get_str_path(&self.variables, &["service-id"])
    }
}

/// Loads every `devices/<id>/vars.yaml` and `services/<id>/vars.yaml` under
/// `config_dir`, keyed by target id.
pub fn load_target_vars(config_dir: &Path) -> Result<BTreeMap<String, TargetVars>> {
    let mut out = BTreeMap::new();
    for (subdir, kind) in [("devices", TargetKind::Device), ("services", TargetKind::Service)] {
        let root = config_dir.join(subdir);
        if !root.is_dir() {
            tracing::warn!(
                "no {subdir} directory found under {}; skipping",
                config_dir.display()
            );
            continue;
        }
        for entry in WalkDir::new(&root).min_depth(2).max_depth(2) {
            let entry = entry.map_err(|err| DeployerError::Io(err.into()))?;
            if entry.file_name() != "vars.yaml" {
                continue;
            }
            let id = entry
                .path()
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|s| s.to_str())
                .ok_or_else(|| {
                    DeployerError::Config(format!(
                        "could not derive target id from {}",
                        entry.path().display()
                    ))
                })?
                .to_string();
            let text = std::fs::read_to_string(entry.path())?;
            let variables: Value = serde_yaml_bw::from_str(&text).map_err(|err| {
                DeployerError::Config(format!("invalid {}: {err}", entry.path().display()))
            })?;
            out.insert(id.clone(), TargetVars { id, kind, variables });
        }
    }
    Ok(out)
}

pub fn config_dir() -> Result<PathBuf> {
    env::var("ANANKE_CONFIG")
        .map(PathBuf::from)
        .map_err(|_| DeployerError::Config("ANANKE_CONFIG environment variable must be set".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_settings_without_default_write_method() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("settings.yaml"),
            "priority: []\nwrite-methods: {}\n",
        )
        .unwrap();
        let err = Settings::load(dir.path()).unwrap_err();
        assert!(format!("{err}").contains("write-methods.default"));
    }

    #[test]
    fn loads_minimal_settings() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("settings.yaml"),
            "priority: [\"/a\"]\nwrite-methods:\n  default: replace\n",
        )
        .unwrap();
        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(settings.priority, vec!["/a".to_string()]);
        assert_eq!(settings.default_write_method().unwrap(), WriteMethod::Replace);
    }
}
