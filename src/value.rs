//! Small helpers over the dynamic `serde_json::Value` tree that templates,
//! merge bindings, transforms, and telemetry normalization all operate on.
//!
//! Per the redesign direction in SPEC_FULL.md §9 ("dynamic YAML typing"), YAML
//! documents are never bound to a fixed Rust struct on the way in -- they are
//! parsed into `Value` and stay that way until they are serialized back out on
//! the wire.

use serde_json::Value;

/// Look up a dot-free, single-level key, treating everything else as absent.
pub fn get<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.as_object().and_then(|map| map.get(key))
}

/// Look up a nested key path (e.g. `["management", "disable-set"]`).
pub fn get_path<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for segment in path {
        current = get(current, segment)?;
    }
    Some(current)
}

pub fn get_bool_path(value: &Value, path: &[&str]) -> Option<bool> {
    get_path(value, path).and_then(Value::as_bool)
}

pub fn get_str_path<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    get_path(value, path).and_then(Value::as_str)
}

pub fn get_i64_path(value: &Value, path: &[&str]) -> Option<i64> {
    get_path(value, path).and_then(Value::as_i64)
}

/// Recursively merge `overlay` onto `base`, with `overlay` winning on leaf
/// conflicts. Mapping keys union; list-valued keys whose elements are
/// mappings carrying a `name` key merge by that discriminator (matching
/// list entries recurse, distinct ones are appended) -- list entries without
/// a `name` discriminator are replaced wholesale by the overlay's list.
/// This is the structural equivalent of loading two fragments into one YANG
/// list container and letting the later one win on leaf conflicts while
/// distinct list entries coexist (scenario 4 in SPEC_FULL.md §8).
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (Value::Array(base_list), Value::Array(overlay_list)) => {
            if list_is_named(base_list) && list_is_named(overlay_list) {
                merge_named_list(base_list, overlay_list);
            } else {
                *base_list = overlay_list.clone();
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}

fn list_is_named(list: &[Value]) -> bool {
    !list.is_empty() && list.iter().all(|entry| get(entry, "name").is_some())
}

fn merge_named_list(base_list: &mut Vec<Value>, overlay_list: &[Value]) {
    for overlay_entry in overlay_list {
        let name = get(overlay_entry, "name");
        let existing = base_list
            .iter_mut()
            .find(|entry| get(entry, "name") == name);
        match existing {
            Some(entry) => deep_merge(entry, overlay_entry),
            None => base_list.push(overlay_entry.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merges_named_list_entries_by_discriminator() {
        let mut base = json!({"n": [{"name": "A", "x": 1}]});
        let overlay = json!({"n": [{"name": "B", "x": 2}]});
        deep_merge(&mut base, &overlay);
        assert_eq!(base, json!({"n": [{"name": "A", "x": 1}, {"name": "B", "x": 2}]}));
    }

    #[test]
    fn later_leaf_wins_on_conflict() {
        let mut base = json!({"a": {"b": 1}});
        let overlay = json!({"a": {"b": 2}});
        deep_merge(&mut base, &overlay);
        assert_eq!(base, json!({"a": {"b": 2}}));
    }

    #[test]
    fn unnamed_lists_replace_wholesale() {
        let mut base = json!({"a": [1, 2, 3]});
        let overlay = json!({"a": [9]});
        deep_merge(&mut base, &overlay);
        assert_eq!(base, json!({"a": [9]}));
    }
}
