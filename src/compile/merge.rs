//! Schema-aware path merging (component C.1), replacing the pyangbind-based
//! merge in the original implementation with an explicit registry of named
//! bindings.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::Result;
use crate::value::deep_merge;

/// A schema object fragments can be merged against. Implementations receive
/// every fragment seen for one path, in discovery order, and return the
/// single merged fragment that should replace them.
pub trait MergeBinding: Send + Sync {
    fn merge(&self, fragments: &[Value]) -> Result<Value>;
}

/// Merges mapping fragments key-by-key, recursing into nested mappings and
/// concatenating list-valued keys whose elements carry a `name`
/// discriminator. Later fragments win on leaf conflicts. This is the
/// built-in binding registered under the name `"deep-object-merge"`.
#[derive(Debug, Default)]
pub struct DeepObjectMerge;

impl MergeBinding for DeepObjectMerge {
    fn merge(&self, fragments: &[Value]) -> Result<Value> {
        let mut merged = fragments[0].clone();
        for fragment in &fragments[1..] {
            deep_merge(&mut merged, fragment);
        }
        Ok(merged)
    }
}

/// Registry of named merge bindings, keyed by the name given in
/// `settings.merge-bindings[path].object`.
pub struct MergeRegistry {
    bindings: HashMap<String, Box<dyn MergeBinding>>,
}

impl MergeRegistry {
    /// A registry carrying only the built-in bindings.
    pub fn new() -> Self {
        let mut bindings: HashMap<String, Box<dyn MergeBinding>> = HashMap::new();
        bindings.insert("deep-object-merge".to_string(), Box::new(DeepObjectMerge));
        Self { bindings }
    }

    pub fn register(&mut self, name: impl Into<String>, binding: Box<dyn MergeBinding>) {
        self.bindings.insert(name.into(), binding);
    }

    pub fn get(&self, name: &str) -> Option<&dyn MergeBinding> {
        self.bindings.get(name).map(|b| b.as_ref())
    }
}

impl Default for MergeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deep_object_merge_combines_fragments_in_order() {
        let binding = DeepObjectMerge;
        let fragments = vec![json!({"a": 1, "b": {"c": 1}}), json!({"b": {"c": 2, "d": 3}})];
        let merged = binding.merge(&fragments).unwrap();
        assert_eq!(merged, json!({"a": 1, "b": {"c": 2, "d": 3}}));
    }

    #[test]
    fn registry_resolves_builtin_by_name() {
        let registry = MergeRegistry::new();
        assert!(registry.get("deep-object-merge").is_some());
        assert!(registry.get("nonexistent").is_none());
    }
}
