use thiserror::Error;

/// Error taxonomy for the deployer, mirroring the layers in which failures
/// can occur: configuration/settings, credentials, config compilation,
/// transport, and the deploy-bound watchdog. Per-pack transport failures are
/// never surfaced as this error type at the `deploy()` boundary -- they
/// become `ResponseMessage`s instead (see `response`).
#[derive(Debug, Error)]
pub enum DeployerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("credential error for {target}: {reason}")]
    Credential { target: String, reason: String },

    #[error("secret store error: {0}")]
    Secret(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("template render error: {0}")]
    Render(String),

    #[error("YAML error: {0}")]
    Yaml(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transport error for {path}: {reason}")]
    Transport { path: String, reason: String },

    #[error("deploy did not complete within {0:?}")]
    DeployTimedOut(std::time::Duration),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, DeployerError>;
