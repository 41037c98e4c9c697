//! Error types for the Kata operator
//!
//! Errors are grouped by how the reconciler reacts to them: transient store
//! errors are retried quickly and configuration errors back off so an
//! operator can fix the cluster. Local defects are not retried at all.

use std::time::Duration;

use thiserror::Error;

/// Requeue delay for configuration problems the operator has to fix.
pub const CONFIG_ERROR_BACKOFF: Duration = Duration::from_secs(15);

/// Requeue delay for transient API failures.
pub const TRANSIENT_ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },

    #[error(
        "No suitable nodes found for kata installation matching {selector}. \
         Please make sure to label the nodes with labels specified in kataConfigPoolSelector"
    )]
    EmptyNodePool { selector: String },

    #[error("Machine config pool {0} not found")]
    PoolNotFound(String),

    #[error(
        "Existing pods using runtime class {runtime_class} found ({pods}). \
         Please delete the pods manually for KataConfig deletion to proceed"
    )]
    RuntimeInUse { runtime_class: String, pods: String },

    #[error("Failed to render CRI-O drop-in: {0}")]
    TemplateError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn already_exists(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::KubeError(kube::Error::Api(e)) => e.code == 404,
            _ => false,
        }
    }

    pub fn is_already_exists(&self) -> bool {
        match self {
            Error::AlreadyExists { .. } => true,
            Error::KubeError(kube::Error::Api(e)) => e.code == 409 && e.reason == "AlreadyExists",
            _ => false,
        }
    }

    /// Whether retrying the same pass can succeed without outside help.
    pub fn is_retriable(&self) -> bool {
        self.requeue_after().is_some()
    }

    /// Requeue delay the controller applies after this error, or `None` when
    /// the error comes from a local defect that no retry can fix.
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            Error::EmptyNodePool { .. }
            | Error::PoolNotFound(_)
            | Error::RuntimeInUse { .. }
            | Error::ConfigError(_) => Some(CONFIG_ERROR_BACKOFF),
            Error::TemplateError(_) | Error::SerializationError(_) => None,
            _ => Some(TRANSIENT_ERROR_BACKOFF),
        }
    }

    /// Short label used for metrics and events.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "kube",
            Error::NotFound { .. } => "not_found",
            Error::AlreadyExists { .. } => "already_exists",
            Error::EmptyNodePool { .. } => "empty_node_pool",
            Error::PoolNotFound(_) => "pool_not_found",
            Error::RuntimeInUse { .. } => "runtime_in_use",
            Error::TemplateError(_) => "template",
            Error::SerializationError(_) => "serialization",
            Error::ConfigError(_) => "config",
        }
    }
}
