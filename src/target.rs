//! Target Resolver (component B).
//!
//! Expands user-supplied role/host/service tokens to a concrete set of
//! targets, each tagged with its requested sections.

use std::collections::{BTreeMap, BTreeSet};

use crate::settings::TargetVars;

/// Expand `tokens` (host id, role name, literal `"all"`, or `None` meaning
/// "every known target") into `target_id -> sections`, applying the domain
/// suffix where configured. Expansion rules are applied in the order given
/// in SPEC_FULL.md §4.B; an unknown token is logged and skipped.
pub fn resolve(
    tokens: &BTreeMap<Option<String>, BTreeSet<String>>,
    known: &BTreeMap<String, TargetVars>,
    domain: Option<&str>,
) -> BTreeMap<String, BTreeSet<String>> {
    let mut roles: BTreeSet<String> = BTreeSet::new();
    for target_vars in known.values() {
        roles.extend(target_vars.roles());
    }

    let mut out: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    // Rule 1: the `None` token expands to every known target.
    if let Some(sections) = tokens.get(&None) {
        for id in known.keys() {
            union_insert(&mut out, qualify(id, domain), sections.clone());
        }
    }

    for (token, sections) in tokens {
        let Some(token) = token else { continue };

        // Rule 2: "all" expands to every device (and service), each
        // carrying the sections of the "all" entry.
        if token == "all" {
            for id in known.keys() {
                union_insert(&mut out, qualify(id, domain), sections.clone());
            }
            continue;
        }

        // Rule 3: a token matching a known target id is taken verbatim.
        if known.contains_key(token) {
            union_insert(&mut out, qualify(token, domain), sections.clone());
            continue;
        }

        // Rule 4: a token matching a role expands to every target whose
        // `roles` list contains that role.
        if roles.contains(token) {
            for (id, target_vars) in known {
                if target_vars.roles().iter().any(|role| role == token) {
                    union_insert(&mut out, qualify(id, domain), sections.clone());
                }
            }
            continue;
        }

        // Rule 5: unknown token, skipped.
        tracing::warn!(
            "'{token}' does not appear to be a device, service, or role; skipping"
        );
    }

    out
}

fn qualify(id: &str, domain: Option<&str>) -> String {
    match domain {
        Some(domain) if !domain.is_empty() => format!("{id}.{domain}"),
        _ => id.to_string(),
    }
}

fn union_insert(out: &mut BTreeMap<String, BTreeSet<String>>, id: String, sections: BTreeSet<String>) {
    out.entry(id).or_default().extend(sections);
}

/// Strip a domain suffix back off a qualified target id, mirroring
/// `Config.target_id = target_id.split(".")[0]` in the original.
pub fn short_id(target_id: &str) -> &str {
    target_id.split('.').next().unwrap_or(target_id)
}
