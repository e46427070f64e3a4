//! Status Checker (component F). Establishes a subscription per target,
//! snapshots initial state, polls on a schedule, normalizes vendor-specific
//! response shapes, and diffs against the snapshot with numeric tolerance.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::{DeployerError, Result};

/// One telemetry update as returned by a poll: a path and its value tree.
pub type Update = (String, Value);

/// Abstraction over "poll this target's configured paths once", so the
/// checker can be exercised against a stub in tests instead of a live gNMI
/// subscription (component D's `GnmiConnector` implements this against the
/// real wire).
#[async_trait]
pub trait TelemetryPoller: Send + Sync {
    async fn poll(&self, paths: &[String]) -> Result<Vec<Update>>;
}

/// A single changed leaf within a path's structural diff.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeafChange {
    pub within: String,
    pub old: Value,
    pub new: Value,
}

/// Outcome of diffing one path between the initial snapshot and a later poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "UPPERCASE")]
pub enum PathDiff {
    Removed,
    Added { value: Value },
    Changed { changes: Vec<LeafChange> },
}

/// `hostname -> (path, diff)` results for one post-check poll, matching the
/// shape `StatusCheck.poll()` accumulates in `original_source`.
pub type CheckResults = BTreeMap<String, Vec<(String, PathDiff)>>;

/// Splits an aggregate per-top-level-path response into one synthetic update
/// per entity, matching NX-OS's unified shape onto the per-entity shape
/// IOS-XR already returns (spec.md §4.F).
pub fn split_unified_responses(updates: Vec<Update>) -> Vec<Update> {
    let mut out = Vec::new();
    for (path, val) in &updates {
        match path.trim_start_matches('/') {
            "network-instances" => split_network_instances(val, &mut out),
            "interfaces" => split_interfaces(val, &mut out),
            "lldp" => split_lldp(val, &mut out),
            _ => {}
        }
    }
    if out.is_empty() {
        updates
    } else {
        out
    }
}

fn split_network_instances(val: &Value, out: &mut Vec<Update>) {
    let Some(instances) = val.pointer("/network-instance").and_then(Value::as_array) else {
        return;
    };
    for instance in instances {
        let Some(inst_name) = instance.get("name").and_then(Value::as_str) else { continue };
        let inst_prefix =
            format!("network-instances/network-instance[name={inst_name}]/");
        let Some(protocols) = instance.pointer("/protocols/protocol").and_then(Value::as_array)
        else {
            continue;
        };
        for protocol in protocols {
            let identifier = protocol.get("identifier").and_then(Value::as_str).unwrap_or_default();
            let name = protocol.get("name").and_then(Value::as_str).unwrap_or_default();
            let prot_prefix = format!(
                "{inst_prefix}protocols/protocol[identifier={identifier}][name={name}]/"
            );
            let Some(neighbors) =
                protocol.pointer("/bgp/neighbors/neighbor").and_then(Value::as_array)
            else {
                continue;
            };
            for neighbor in neighbors {
                let addr = neighbor.get("neighbor-address").and_then(Value::as_str).unwrap_or_default();
                if let Some(afi_safis) =
                    neighbor.pointer("/afi-safis/afi-safi").and_then(Value::as_array)
                {
                    for afi_safi in afi_safis {
                        let afi_name =
                            afi_safi.get("afi-safi-name").and_then(Value::as_str).unwrap_or_default();
                        let path = format!(
                            "{prot_prefix}bgp/neighbors/neighbor[neighbor-address={addr}]/afi-safis/afi-safi[afi-safi-name={afi_name}]//state"
                        );
                        out.push((path, afi_safi.clone()));
                    }
                } else {
                    let path = format!(
                        "{prot_prefix}bgp/neighbors/neighbor[neighbor-address={addr}]/state"
                    );
                    out.push((path, neighbor.clone()));
                }
            }
        }
    }
}

fn split_interfaces(val: &Value, out: &mut Vec<Update>) {
    let Some(interfaces) = val.pointer("/interface").and_then(Value::as_array) else {
        return;
    };
    for interface in interfaces {
        let name = interface.get("name").and_then(Value::as_str).unwrap_or_default();
        let path = if interface.get("ethernet").is_some() {
            format!("interfaces/interface[name={name}]")
        } else {
            format!("interfaces/interface[name={name}]/state")
        };
        out.push((path, interface.clone()));
    }
}

fn split_lldp(val: &Value, out: &mut Vec<Update>) {
    let Some(interfaces) = val.pointer("/interfaces/interface").and_then(Value::as_array) else {
        return;
    };
    for interface in interfaces {
        let if_name = interface.get("name").and_then(Value::as_str).unwrap_or_default();
        let Some(neighbors) = interface.pointer("/neighbors/neighbor").and_then(Value::as_array)
        else {
            continue;
        };
        for neighbor in neighbors {
            let id = neighbor.get("id").and_then(Value::as_str).unwrap_or_default();
            let path = format!(
                "lldp/interfaces/interface[name={if_name}]//neighbors/neighbor[id={id}]/state"
            );
            out.push((path, neighbor.clone()));
        }
    }
}

/// Reduces a BGP neighbor update to `{neighbor-address, session-state}` plus
/// `enabled`/`description`/`peer-as` if present (spec.md §4.F).
pub fn format_bgp_peer(val: &Value) -> Value {
    let state = val.get("state").unwrap_or(val);
    let Some(addr) = state.get("neighbor-address").or_else(|| val.get("neighbor-address")) else {
        return val.clone();
    };
    let session_state = state
        .get("session-state")
        .and_then(Value::as_str)
        .map(|s| if s == "ESTABLISHED" { "UP" } else { "DOWN" })
        .unwrap_or("DOWN");
    let mut out = serde_json::json!({
        "neighbor-address": addr,
        "session-state": session_state,
    });
    for key in ["enabled", "description", "peer-as"] {
        if let Some(v) = state.get(key) {
            out[key] = v.clone();
        }
    }
    out
}

fn sanitize_counters(counters: &Value) -> Value {
    let mut out = serde_json::Map::new();
    if let Some(map) = counters.as_object() {
        for (key, value) in map {
            if key.contains("err") || key.contains("discard") {
                out.insert(key.clone(), value.clone());
            }
        }
    }
    Value::Object(out)
}

/// Reduces an interface update to `{name, admin-status, oper-status,
/// counters}`, with `counters` restricted to keys containing `err` or
/// `discard` (spec.md §4.F).
pub fn format_interface(val: &Value) -> Value {
    let state = val.get("state").unwrap_or(val);
    let Some(name) = state.get("name") else { return val.clone() };
    let oper_status = state.get("oper-status").and_then(Value::as_str).unwrap_or("DOWN");
    let admin_status = state.get("admin-status").cloned().unwrap_or(Value::Null);
    let mut out = serde_json::json!({
        "name": name,
        "admin-status": admin_status,
        "oper-status": oper_status,
    });
    if let Some(counters) = state.get("counters") {
        out["counters"] = sanitize_counters(counters);
    }
    out
}

fn normalize(path: &str, val: &Value) -> Value {
    if path.starts_with("network-instances") {
        format_bgp_peer(val)
    } else if path.starts_with("interfaces") {
        format_interface(val)
    } else {
        val.clone()
    }
}

/// Runs response splitting then per-entity normalization, producing the
/// `path -> merged value` map a poll contributes (spec.md §4.F).
pub fn populate_state(updates: Vec<Update>) -> BTreeMap<String, Value> {
    let mut state = BTreeMap::new();
    for (path, val) in split_unified_responses(updates) {
        let normalized = normalize(&path, &val);
        state.insert(path, normalized);
    }
    state
}

fn is_number(value: &Value) -> Option<f64> {
    value.as_f64()
}

/// Structural diff between `old` and `new`, honoring a percent tolerance on
/// numeric leaves: a numeric leaf is unchanged iff `|new-old| <= t/100*|old|`
/// (spec.md §8).
pub fn diff_values(old: &Value, new: &Value, tolerance_pct: Option<u8>, prefix: &str, out: &mut Vec<LeafChange>) {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for (key, new_value) in new_map {
                let within = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
                match old_map.get(key) {
                    Some(old_value) => diff_values(old_value, new_value, tolerance_pct, &within, out),
                    None => out.push(LeafChange { within, old: Value::Null, new: new_value.clone() }),
                }
            }
            for key in old_map.keys() {
                if !new_map.contains_key(key) {
                    let within = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
                    out.push(LeafChange { within, old: old_map[key].clone(), new: Value::Null });
                }
            }
        }
        (Value::Array(old_list), Value::Array(new_list)) => {
            for (idx, new_value) in new_list.iter().enumerate() {
                let within = format!("{prefix}[{idx}]");
                match old_list.get(idx) {
                    Some(old_value) => diff_values(old_value, new_value, tolerance_pct, &within, out),
                    None => out.push(LeafChange { within, old: Value::Null, new: new_value.clone() }),
                }
            }
            for idx in new_list.len()..old_list.len() {
                out.push(LeafChange {
                    within: format!("{prefix}[{idx}]"),
                    old: old_list[idx].clone(),
                    new: Value::Null,
                });
            }
        }
        (old_leaf, new_leaf) => {
            if let (Some(old_n), Some(new_n)) = (is_number(old_leaf), is_number(new_leaf)) {
                let within_tolerance = match tolerance_pct {
                    Some(t) if old_n != 0.0 => (new_n - old_n).abs() <= (t as f64 / 100.0) * old_n.abs(),
                    Some(_) => new_n == old_n,
                    None => old_n == new_n,
                };
                if !within_tolerance {
                    out.push(LeafChange { within: prefix.to_string(), old: old_leaf.clone(), new: new_leaf.clone() });
                }
            } else if old_leaf != new_leaf {
                out.push(LeafChange { within: prefix.to_string(), old: old_leaf.clone(), new: new_leaf.clone() });
            }
        }
    }
}

/// Subscribes to one target's configured telemetry paths, snapshots initial
/// state, and diffs subsequent polls against it.
pub struct CheckSubscriber {
    poller: Arc<dyn TelemetryPoller>,
    paths: Vec<String>,
    initial_state: BTreeMap<String, Value>,
}

impl CheckSubscriber {
    pub async fn new(poller: Arc<dyn TelemetryPoller>, paths: Vec<String>) -> Result<Self> {
        if paths.is_empty() {
            return Err(DeployerError::Config("no post-check paths provided".into()));
        }
        let initial = poller.poll(&paths).await?;
        Ok(Self { poller, paths, initial_state: populate_state(initial) })
    }

    pub async fn diff_from_initial(&self, tolerance_pct: Option<u8>) -> Result<Vec<(String, PathDiff)>> {
        let poll_state = populate_state(self.poller.poll(&self.paths).await?);
        let mut diffs = Vec::new();

        for path in self.initial_state.keys() {
            if !poll_state.contains_key(path) {
                diffs.push((path.clone(), PathDiff::Removed));
            }
        }
        for (path, new_value) in &poll_state {
            match self.initial_state.get(path) {
                Some(old_value) => {
                    let mut changes = Vec::new();
                    diff_values(old_value, new_value, tolerance_pct, "", &mut changes);
                    if !changes.is_empty() {
                        diffs.push((path.clone(), PathDiff::Changed { changes }));
                    }
                }
                None => diffs.push((path.clone(), PathDiff::Added { value: new_value.clone() })),
            }
        }
        Ok(diffs)
    }
}

/// Fleet-level status check: one `CheckSubscriber` per eligible target, all
/// polled concurrently (spec.md §4.F, "a fleet-level check runs all targets
/// in parallel").
pub struct StatusCheck {
    subscribers: BTreeMap<String, Arc<CheckSubscriber>>,
}

impl StatusCheck {
    pub async fn build(targets: Vec<(String, Arc<dyn TelemetryPoller>)>, paths: Vec<String>) -> Result<Self> {
        let mut subscribers = BTreeMap::new();
        for (target_id, poller) in targets {
            let subscriber = CheckSubscriber::new(poller, paths.clone()).await?;
            subscribers.insert(target_id, Arc::new(subscriber));
        }
        Ok(Self { subscribers })
    }

    pub async fn poll(&self, tolerance_pct: Option<u8>) -> Result<CheckResults> {
        let mut results = CheckResults::new();
        let mut set = tokio::task::JoinSet::new();
        for (target_id, subscriber) in &self.subscribers {
            let target_id = target_id.clone();
            let subscriber = Arc::clone(subscriber);
            set.spawn(async move {
                let diffs = subscriber.diff_from_initial(tolerance_pct).await;
                (target_id, diffs)
            });
        }
        while let Some(joined) = set.join_next().await {
            let (target_id, diffs) = joined.map_err(|err| DeployerError::Other(err.to_string()))?;
            results.insert(target_id, diffs?);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct StubPoller {
        polls: Mutex<Vec<Vec<Update>>>,
    }

    #[async_trait]
    impl TelemetryPoller for StubPoller {
        async fn poll(&self, _paths: &[String]) -> Result<Vec<Update>> {
            let mut polls = self.polls.lock().unwrap();
            if polls.len() > 1 {
                Ok(polls.remove(0))
            } else {
                Ok(polls[0].clone())
            }
        }
    }

    #[test]
    fn session_state_normalization_scenario() {
        let update = json!({"neighbor-address": "1.2.3.4", "state": {"session-state": "ESTABLISHED"}});
        let normalized = format_bgp_peer(&update);
        assert_eq!(normalized, json!({"neighbor-address": "1.2.3.4", "session-state": "UP"}));
    }

    #[test]
    fn session_state_down_when_not_established() {
        let update = json!({"neighbor-address": "1.2.3.4", "state": {"session-state": "IDLE"}});
        let normalized = format_bgp_peer(&update);
        assert_eq!(normalized["session-state"], "DOWN");
    }

    #[test]
    fn interface_counters_filtered_to_err_and_discard() {
        let update = json!({
            "name": "eth0",
            "admin-status": "UP",
            "oper-status": "UP",
            "counters": {"in-errors": 1, "in-discards": 2, "in-octets": 9000},
        });
        let normalized = format_interface(&update);
        assert_eq!(normalized["counters"], json!({"in-errors": 1, "in-discards": 2}));
    }

    #[tokio::test]
    async fn tolerance_scenario_suppresses_small_numeric_drift() {
        let poller = Arc::new(StubPoller {
            polls: Mutex::new(vec![
                vec![("/p".to_string(), json!({"bytes": 1000}))],
                vec![("/p".to_string(), json!({"bytes": 1050}))],
            ]),
        });
        let subscriber = CheckSubscriber::new(poller, vec!["/p".to_string()]).await.unwrap();
        let diffs = subscriber.diff_from_initial(Some(10)).await.unwrap();
        assert!(diffs.is_empty());
    }

    #[tokio::test]
    async fn tolerance_scenario_reports_drift_outside_tolerance() {
        let poller = Arc::new(StubPoller {
            polls: Mutex::new(vec![
                vec![("/p".to_string(), json!({"bytes": 1000}))],
                vec![("/p".to_string(), json!({"bytes": 1050}))],
            ]),
        });
        let subscriber = CheckSubscriber::new(poller, vec!["/p".to_string()]).await.unwrap();
        let diffs = subscriber.diff_from_initial(Some(4)).await.unwrap();
        assert_eq!(diffs.len(), 1);
        let PathDiff::Changed { changes } = &diffs[0].1 else { panic!("expected Changed") };
        assert_eq!(changes[0].old, json!(1000));
        assert_eq!(changes[0].new, json!(1050));
    }

    #[tokio::test]
    async fn diff_symmetry_with_zero_tolerance_and_unchanged_state() {
        let poller = Arc::new(StubPoller {
            polls: Mutex::new(vec![vec![("/p".to_string(), json!({"bytes": 1000}))]]),
        });
        let subscriber = CheckSubscriber::new(poller, vec!["/p".to_string()]).await.unwrap();
        let diffs = subscriber.diff_from_initial(Some(0)).await.unwrap();
        assert!(diffs.is_empty());
    }

    #[tokio::test]
    async fn removed_and_added_paths_are_reported() {
        let poller = Arc::new(StubPoller {
            polls: Mutex::new(vec![
                vec![("/a".to_string(), json!({"x": 1}))],
                vec![("/b".to_string(), json!({"x": 1}))],
            ]),
        });
        let subscriber = CheckSubscriber::new(poller, vec!["/a".to_string(), "/b".to_string()]).await.unwrap();
        let diffs = subscriber.diff_from_initial(None).await.unwrap();
        assert!(diffs.contains(&("/a".to_string(), PathDiff::Removed)));
        assert!(matches!(
            diffs.iter().find(|(p, _)| p == "/b"),
            Some((_, PathDiff::Added { .. }))
        ));
    }

    #[test]
    fn splits_network_instances_into_per_neighbor_updates() {
        let aggregate = json!({
            "network-instance": [{
                "name": "default",
                "protocols": {"protocol": [{
                    "identifier": "BGP",
                    "name": "bgp",
                    "bgp": {"neighbors": {"neighbor": [
                        {"neighbor-address": "1.2.3.4", "state": {"session-state": "ESTABLISHED"}}
                    ]}}
                }]}
            }]
        });
        let split = split_unified_responses(vec![("network-instances".to_string(), aggregate)]);
        assert_eq!(split.len(), 1);
        assert!(split[0].0.contains("neighbor[neighbor-address=1.2.3.4]"));
    }
}
