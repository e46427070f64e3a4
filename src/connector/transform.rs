//! Transform plugins (part of component D).
//!
//! The original ships transforms as Python modules discovered by directory
//! scan and invoked by name. Here each platform gets an explicit `Transform`
//! implementation, registered by the platform/service id it applies to
//! (dashes replaced by underscores, matching the original naming rule).

use std::collections::HashMap;

use crate::compile::ConfigPack;
use crate::error::Result;
use crate::settings::WriteMethod;

/// A per-pack mutation hook. Returning `Ok(None)` drops the pack.
pub trait Transform: Send + Sync {
    fn transform(&self, pack: ConfigPack) -> Result<Option<ConfigPack>>;
}

/// Registry of transforms, keyed by platform/service id with `-` replaced by
/// `_`, matching the original module-naming convention.
pub struct TransformRegistry {
    transforms: HashMap<String, Box<dyn Transform>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        let mut transforms: HashMap<String, Box<dyn Transform>> = HashMap::new();
        transforms.insert("cisco_nxos".to_string(), Box::new(CiscoNxos));
        transforms.insert("megaport".to_string(), Box::new(MegaportPassthrough));
        Self { transforms }
    }

    pub fn register(&mut self, platform_id: &str, transform: Box<dyn Transform>) {
        self.transforms.insert(platform_id.replace('-', "_"), transform);
    }

    /// Whether a transform is registered for `platform_id` (already
    /// dash-normalized by the caller is not required; this does it).
    pub fn contains(&self, platform_id: &str) -> bool {
        self.transforms.contains_key(&platform_id.replace('-', "_"))
    }

    pub fn get(&self, platform_id: &str) -> Option<&dyn Transform> {
        self.transforms
            .get(&platform_id.replace('-', "_"))
            .map(|t| t.as_ref())
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Strips the `iana-if-type` namespace pyangbind-style OpenConfig emitters
/// add to interface types, and (in `update` write mode) reduces any
/// port-channel member interface to just its aggregate-id, since NX-OS
/// rejects other fields on those interfaces outside of a full `replace`.
#[derive(Debug, Default)]
pub struct CiscoNxos;

impl Transform for CiscoNxos {
    fn transform(&self, mut pack: ConfigPack) -> Result<Option<ConfigPack>> {
        if pack.path != "openconfig:/interfaces" {
            return Ok(Some(pack));
        }
        let Some(interfaces) = pack
            .content
            .get_mut("openconfig-interfaces:interface")
            .and_then(|v| v.as_array_mut())
        else {
            return Ok(Some(pack));
        };

        for interface in interfaces.iter_mut() {
            if let Some(iface_type) = interface
                .pointer_mut("/config/type")
                .and_then(|v| v.as_str().map(str::to_string))
            {
                if let Some(slot) = interface.pointer_mut("/config/type") {
                    *slot = serde_json::Value::String(
                        iface_type.replace("iana-if-type:l2vlan", "l2vlan"),
                    );
                }
            }

            if pack.write_method == WriteMethod::Replace {
                continue;
            }
            if interface.get("openconfig-if-ethernet:ethernet").is_some() {
                let name = interface.get("name").cloned();
                let aggr_id = interface
                    .pointer("/openconfig-if-ethernet:ethernet/config/openconfig-if-aggregate:aggregate-id")
                    .cloned();
                if let (Some(name), Some(aggr_id)) = (name, aggr_id) {
                    *interface = serde_json::json!({
                        "name": name,
                        "openconfig-if-ethernet:ethernet": {
                            "config": {"openconfig-if-aggregate:aggregate-id": aggr_id}
                        }
                    });
                }
            }
        }
        Ok(Some(pack))
    }
}

/// No-op transform registered for services that need `config_transform` to
/// read `true` (e.g. to exercise the hook in tests) without mutating
/// anything.
#[derive(Debug, Default)]
pub struct MegaportPassthrough;

impl Transform for MegaportPassthrough {
    fn transform(&self, pack: ConfigPack) -> Result<Option<ConfigPack>> {
        Ok(Some(pack))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn pack(content: serde_json::Value, write_method: WriteMethod) -> ConfigPack {
        ConfigPack {
            path: "openconfig:/interfaces".to_string(),
            original_content: content.clone(),
            content,
            write_method,
            tags: BTreeSet::new(),
        }
    }

    #[test]
    fn strips_iana_namespace_from_interface_type() {
        let content = json!({
            "openconfig-interfaces:interface": [
                {"name": "eth0", "config": {"type": "iana-if-type:l2vlan"}}
            ]
        });
        let result = CiscoNxos.transform(pack(content, WriteMethod::Replace)).unwrap().unwrap();
        assert_eq!(
            result.content["openconfig-interfaces:interface"][0]["config"]["type"],
            "l2vlan"
        );
    }

    #[test]
    fn reduces_port_channel_member_to_aggregate_id_in_update_mode() {
        let content = json!({
            "openconfig-interfaces:interface": [
                {
                    "name": "eth1",
                    "config": {"type": "ethernetCsmacd"},
                    "openconfig-if-ethernet:ethernet": {
                        "config": {"openconfig-if-aggregate:aggregate-id": "Po1"}
                    }
                }
            ]
        });
        let result = CiscoNxos.transform(pack(content, WriteMethod::Update)).unwrap().unwrap();
        let iface = &result.content["openconfig-interfaces:interface"][0];
        assert_eq!(iface["name"], "eth1");
        assert!(iface.get("config").is_none());
    }

    #[test]
    fn registry_resolves_by_dash_normalized_platform_id() {
        let registry = TransformRegistry::new();
        assert!(registry.contains("cisco-nxos"));
        assert!(registry.get("cisco-nxos").is_some());
        assert!(!registry.contains("junos"));
    }
}
