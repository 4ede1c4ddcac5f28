//! Error types for the operator deployer

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Error variants are named with the `Error` suffix where they wrap a lower
/// level error (e.g., `KubeError`, `YamlError`) to keep call sites readable.
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Invalid scope/operation combination or an unexpected environment.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A required manifest template could not be located or read.
    #[error("Fatal install error for {}: {reason}", path.display())]
    FatalInstall { path: PathBuf, reason: String },

    #[error("Malformed manifest: {0}")]
    MalformedManifest(String),

    #[error(
        "Timeout after {timeout:?} waiting for {description}{}",
        last_error.as_ref().map(|e| format!(" (last error: {e})")).unwrap_or_default()
    )]
    Timeout {
        description: String,
        timeout: Duration,
        last_error: Option<String>,
    },

    #[error("Invalid lifecycle transition: event {event} is not allowed in state {state}")]
    InvalidTransition { state: String, event: String },
}

impl Error {
    /// Shorthand for a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    /// Check if this is a Kubernetes 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::KubeError(kube::Error::Api(e)) if e.code == 404)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
