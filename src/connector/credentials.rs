//! Credential and TLS material resolution (part of component D, invariants
//! 2-3).

use std::path::PathBuf;

use serde_json::Value;

use crate::error::{DeployerError, Result};
use crate::settings::Settings;

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn var_str(variables: &Value, key: &str) -> Option<String> {
    crate::value::get_str_path(variables, &[key]).map(str::to_string)
}

/// Password precedence: `variables.ANANKE_CONNECTOR_PASSWORD_<username>` =>
/// `variables.ANANKE_CONNECTOR_PASSWORD` => the same two in the environment.
pub fn get_password(username: &str, variables: &Value) -> Result<String> {
    let scoped_key = format!("ANANKE_CONNECTOR_PASSWORD_{username}");
    if let Some(password) = var_str(variables, &scoped_key) {
        return Ok(password);
    }
    if let Some(password) = var_str(variables, "ANANKE_CONNECTOR_PASSWORD") {
        return Ok(password);
    }
    if let Some(password) = env_var(&scoped_key) {
        return Ok(password);
    }
    if let Some(password) = env_var("ANANKE_CONNECTOR_PASSWORD") {
        return Ok(password);
    }
    Err(DeployerError::Credential {
        target: username.to_string(),
        reason: format!("could not derive password for username {username}"),
    })
}

/// Username precedence: `settings.username` => `variables.ANANKE_CONNECTOR_USERNAME`
/// => env `ANANKE_CONNECTOR_USERNAME`.
pub fn get_connector_credentials(variables: &Value, settings: &Settings) -> Result<Credentials> {
    let username = settings
        .username
        .clone()
        .or_else(|| var_str(variables, "ANANKE_CONNECTOR_USERNAME"))
        .or_else(|| env_var("ANANKE_CONNECTOR_USERNAME"))
        .ok_or_else(|| DeployerError::Credential {
            target: "<unresolved>".to_string(),
            reason: "could not determine username from settings, variables, or environment"
                .to_string(),
        })?;
    let password = get_password(&username, variables)?;
    Ok(Credentials { username, password })
}

/// Resolves the TLS certificate file to use, or `None` if the connector
/// should be marked insecure. `env.ANANKE_CERTIFICATE_DIR` overrides
/// `settings.certificate.directory`; the file name comes from
/// `variables.management.certificate` if set, else `settings.certificate.name`.
/// A configured-but-missing file is a fail-fast error.
pub fn resolve_certificate(settings: &Settings, variables: &Value) -> Result<Option<PathBuf>> {
    let dir = env_var("ANANKE_CERTIFICATE_DIR")
        .map(PathBuf::from)
        .or_else(|| settings.certificate.as_ref().and_then(|c| c.directory.clone()));
    let Some(dir) = dir else {
        return Ok(None);
    };

    let name = crate::value::get_str_path(variables, &["management", "certificate"])
        .map(str::to_string)
        .or_else(|| settings.certificate.as_ref().and_then(|c| c.name.clone()));
    let Some(name) = name else {
        return Ok(None);
    };

    let candidate = dir.join(&name);
    if !candidate.is_file() {
        return Err(DeployerError::Credential {
            target: name.clone(),
            reason: format!("configured certificate {name} not found in {}", dir.display()),
        });
    }
    Ok(Some(candidate))
}
