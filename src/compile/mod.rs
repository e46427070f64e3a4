//! Config Compiler (component C).
//!
//! For one target, discovers applicable `*.yaml.j2` template files, renders
//! them against the target's variables, collects `path -> fragment`
//! mappings, merges multi-fragment paths, orders the result by priority, and
//! attaches a write method per path.

pub mod merge;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use minijinja::Environment;
use serde_json::Value;
use walkdir::WalkDir;

use crate::error::{DeployerError, Result};
use crate::settings::{Settings, WriteMethod};
use merge::MergeRegistry;

pub const TEMPLATE_SUFFIX: &str = ".yaml.j2";

/// The atomic unit of deployment: one addressable fragment of config.
#[derive(Debug, Clone)]
pub struct ConfigPack {
    pub path: String,
    pub original_content: Value,
    pub content: Value,
    pub write_method: WriteMethod,
    pub tags: BTreeSet<String>,
}

impl ConfigPack {
    fn new(path: String, content: Value, write_method: WriteMethod) -> Self {
        Self {
            path,
            original_content: content.clone(),
            content,
            write_method,
            tags: BTreeSet::new(),
        }
    }
}

/// A compiled, ordered set of packs for one target.
#[derive(Debug, Clone)]
pub struct Config {
    pub target_id: String,
    pub sections: BTreeSet<String>,
    pub packs: Vec<ConfigPack>,
}

fn discover_files(config_dir: &Path, target_id: &str, roles: &[String]) -> Vec<PathBuf> {
    let mut all_files = Vec::new();
    for entry in WalkDir::new(config_dir).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_file() && path.to_string_lossy().ends_with(TEMPLATE_SUFFIX) {
            all_files.push(path.to_path_buf());
        }
    }

    let parent_name = |file: &Path| -> Option<String> {
        file.parent()
            .and_then(|p| p.file_name())
            .and_then(|s| s.to_str())
            .map(str::to_string)
    };

    let host_files: Vec<_> = all_files
        .iter()
        .filter(|f| parent_name(f).as_deref() == Some(target_id))
        .cloned()
        .collect();
    let role_files: Vec<_> = all_files
        .iter()
        .filter(|f| parent_name(f).map(|p| roles.iter().any(|r| r == &p)).unwrap_or(false))
        .cloned()
        .collect();
    let dir_files: Vec<_> = all_files
        .iter()
        .filter(|f| parent_name(f).as_deref() == Some("all"))
        .cloned()
        .collect();

    host_files
        .into_iter()
        .chain(role_files)
        .chain(dir_files)
        .collect()
}

/// Returns `Some(platform_suffix)` if `file`'s stem carries a `_<platform>`
/// suffix, else `None`. Splits on the first underscore (matching
/// `struct/config.py`'s greedy `_(.*)\.yaml\.j2` regex), so a stem with more
/// than one underscore keeps everything after the first as the suffix.
fn platform_suffix(file: &Path) -> Option<String> {
    let name = file.file_name()?.to_str()?;
    let stem = name.strip_suffix(TEMPLATE_SUFFIX)?;
    let (_, suffix) = stem.split_once('_')?;
    Some(suffix.to_string())
}

fn is_applicable(file: &Path, is_service: bool, platform_os: Option<&str>) -> bool {
    let Some(suffix) = platform_suffix(file) else {
        return true;
    };
    if is_service {
        return false;
    }
    platform_os == Some(suffix.as_str())
}

fn render_file(env: &Environment<'_>, file: &Path, variables: &Value) -> Result<Value> {
    let text = std::fs::read_to_string(file)?;
    let rendered = env
        .render_str(&text, variables)
        .map_err(|err| DeployerError::Render(format!("{}: {err}", file.display())))?;
    let value: Value = serde_yaml_bw::from_str(&rendered)
        .map_err(|err| DeployerError::Yaml(format!("{}: {err}", file.display())))?;
    Ok(value)
}

fn resolve_sections(
    sections: &BTreeSet<String>,
    file_paths: &IndexMap<String, Vec<String>>,
) -> BTreeSet<String> {
    let mut resolved = BTreeSet::new();
    for section in sections {
        if section.ends_with(TEMPLATE_SUFFIX) {
            if let Some(paths) = file_paths.get(section) {
                resolved.extend(paths.iter().cloned());
            }
        } else {
            resolved.insert(section.clone());
        }
    }
    resolved
}

/// Compile one target's config.
pub fn compile(
    config_dir: &Path,
    target_id: &str,
    is_service: bool,
    settings: &Settings,
    variables: &Value,
    roles: &[String],
    sections: &BTreeSet<String>,
    merge_registry: &MergeRegistry,
) -> Result<Config> {
    let platform_os = crate::value::get_str_path(variables, &["platform", "os"]);
    let files = discover_files(config_dir, target_id, roles);

    let env = Environment::new();
    let mut mapping: IndexMap<String, Vec<Value>> = IndexMap::new();
    let mut file_paths: IndexMap<String, Vec<String>> = IndexMap::new();

    for file in &files {
        if !is_applicable(file, is_service, platform_os) {
            tracing::debug!(file = %file.display(), "platform suffix does not match, skipping");
            continue;
        }
        let rendered = render_file(&env, file, variables)?;
        let Some(object) = rendered.as_object() else {
            continue;
        };
        let file_name = file
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        for (path, content) in object {
            file_paths.entry(file_name.clone()).or_default().push(path.clone());
            mapping.entry(path.clone()).or_default().push(content.clone());
        }
    }

    let resolved_sections = resolve_sections(sections, &file_paths);

    for (path, fragments) in mapping.iter_mut() {
        if fragments.len() <= 1 {
            continue;
        }
        tracing::info!(path, "more than one config element found, merging");
        let binding_name = settings.merge_bindings.get(path).map(|spec| spec.object.as_str());
        match binding_name.and_then(|name| merge_registry.get(name)) {
            Some(binding) => {
                let merged = binding.merge(fragments)?;
                *fragments = vec![merged];
            }
            None => {
                tracing::warn!(
                    path,
                    "multiple entries but no registered merge binding, one entry may overwrite the other"
                );
                fragments.truncate(1);
            }
        }
    }

    let mut packs = Vec::new();
    for priority_path in &settings.priority {
        if let Some(fragments) = mapping.get(priority_path) {
            let write_method = settings.write_method_for(priority_path)?;
            packs.push(ConfigPack::new(priority_path.clone(), fragments[0].clone(), write_method));
        }
    }
    if !resolved_sections.is_empty() {
        packs.retain(|pack| resolved_sections.iter().any(|section| pack.path.contains(section.as_str())));
    }

    for (path, fragments) in &mapping {
        if settings.priority.iter().any(|p| p == path) {
            continue;
        }
        let write_method = settings.write_method_for(path)?;
        if resolved_sections.is_empty() {
            packs.push(ConfigPack::new(path.clone(), fragments[0].clone(), write_method));
        } else if resolved_sections.iter().any(|section| path.contains(section.as_str())) {
            packs.push(ConfigPack::new(path.clone(), fragments[0].clone(), write_method));
        }
    }

    if !resolved_sections.is_empty() && packs.is_empty() {
        tracing::warn!(
            target_id,
            sections = ?resolved_sections,
            "could not find match for target given sections in configured paths or files, skipping"
        );
    }

    Ok(Config {
        target_id: target_id.to_string(),
        sections: resolved_sections,
        packs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn settings_with_priority(priority: Vec<&str>) -> Settings {
        let mut write_methods = BTreeMap::new();
        write_methods.insert("default".to_string(), WriteMethod::Replace);
        Settings {
            domain_name: None,
            username: None,
            certificate: None,
            transforms: None,
            priority: priority.into_iter().map(str::to_string).collect(),
            write_methods,
            merge_bindings: BTreeMap::new(),
            vault: None,
            post_checks: Default::default(),
        }
    }

    #[test]
    fn platform_suffix_filters_device_files() {
        let path = PathBuf::from("/cfg/all/interfaces_ios-xr.yaml.j2");
        assert!(is_applicable(&path, false, Some("ios-xr")));
        assert!(!is_applicable(&path, false, Some("nx-os")));
        assert!(!is_applicable(&path, true, Some("ios-xr")));
    }

    #[test]
    fn unsuffixed_files_are_always_applicable() {
        let path = PathBuf::from("/cfg/all/interfaces.yaml.j2");
        assert!(is_applicable(&path, true, None));
        assert!(is_applicable(&path, false, Some("ios-xr")));
    }

    #[test]
    fn platform_suffix_splits_on_first_underscore() {
        // "mgmt_interfaces_nx-os.yaml.j2" -> suffix "interfaces_nx-os", not
        // "nx-os": a stem with more than one underscore is not applicable to
        // a device whose platform id only matches the trailing segment.
        let path = PathBuf::from("/cfg/all/mgmt_interfaces_nx-os.yaml.j2");
        assert_eq!(platform_suffix(&path).as_deref(), Some("interfaces_nx-os"));
        assert!(!is_applicable(&path, false, Some("nx-os")));
        assert!(is_applicable(&path, false, Some("interfaces_nx-os")));
    }

    #[test]
    fn discovers_host_role_and_all_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("jfk-spine05")).unwrap();
        std::fs::create_dir_all(dir.path().join("spine")).unwrap();
        std::fs::create_dir_all(dir.path().join("all")).unwrap();
        std::fs::write(dir.path().join("jfk-spine05/host.yaml.j2"), "{}").unwrap();
        std::fs::write(dir.path().join("spine/role.yaml.j2"), "{}").unwrap();
        std::fs::write(dir.path().join("all/common.yaml.j2"), "{}").unwrap();

        let files = discover_files(dir.path(), "jfk-spine05", &["spine".to_string()]);
        let names: Vec<_> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["host.yaml.j2", "role.yaml.j2", "common.yaml.j2"]);
    }

    #[test]
    fn compiles_packs_in_priority_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("all")).unwrap();
        std::fs::write(
            dir.path().join("all/iface.yaml.j2"),
            "/interfaces/eth0:\n  mtu: {{ mtu }}\n/system/hostname:\n  name: {{ id }}\n",
        )
        .unwrap();

        let settings = settings_with_priority(vec!["/system/hostname"]);
        let variables = json!({"mtu": 9000, "id": "jfk-spine05"});
        let registry = MergeRegistry::new();

        let config = compile(
            dir.path(),
            "jfk-spine05",
            false,
            &settings,
            &variables,
            &[],
            &BTreeSet::new(),
            &registry,
        )
        .unwrap();

        assert_eq!(config.packs[0].path, "/system/hostname");
        assert_eq!(config.packs[1].path, "/interfaces/eth0");
    }

    #[test]
    fn section_filter_with_no_match_yields_empty_pack_list() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("all")).unwrap();
        std::fs::write(dir.path().join("all/iface.yaml.j2"), "/interfaces/eth0:\n  mtu: 9000\n").unwrap();

        let settings = settings_with_priority(vec![]);
        let registry = MergeRegistry::new();
        let mut sections = BTreeSet::new();
        sections.insert("/bgp".to_string());

        let config = compile(
            dir.path(),
            "jfk-spine05",
            false,
            &settings,
            &json!({}),
            &[],
            &sections,
            &registry,
        )
        .unwrap();
        assert!(config.packs.is_empty());
    }
}
