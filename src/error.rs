//! Error types for the workload apps operator

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Operator configuration is invalid or incomplete
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Input from a cluster or release could not be used as-is
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// A collaborator could not find something that may appear later
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    /// An object we are waiting on is still present
    #[error("{0} still persists")]
    NotDeleted(String),

    /// The kube-rs finalizer helper failed to add or remove its token
    #[error("Finalizer error: {0}")]
    FinalizerError(String),

    /// HTTP request to a catalog failed
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// YAML (de)serialization error
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// True for collaborator not-found signals and for API 404 responses.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::KubeError(e) => is_kube_not_found(e),
            _ => false,
        }
    }

    /// Whether a quick requeue is likely to succeed
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::KubeError(_) | Error::HttpError(_) => true,
            Error::NotFound { .. } | Error::NotDeleted(_) | Error::FinalizerError(_) => true,
            Error::ConfigError(_)
            | Error::ValidationError(_)
            | Error::SerializationError(_)
            | Error::YamlError(_) => false,
        }
    }

    /// Short label for the error metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "kube",
            Error::ConfigError(_) => "config",
            Error::ValidationError(_) => "validation",
            Error::NotFound { .. } => "not_found",
            Error::NotDeleted(_) => "not_deleted",
            Error::FinalizerError(_) => "finalizer",
            Error::HttpError(_) => "http",
            Error::SerializationError(_) | Error::YamlError(_) => "serialization",
        }
    }
}

pub fn is_kube_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

pub fn is_kube_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists")
}

impl From<kube::runtime::finalizer::Error<Error>> for Error {
    fn from(err: kube::runtime::finalizer::Error<Error>) -> Self {
        use kube::runtime::finalizer::Error as FinalizerError;
        match err {
            FinalizerError::ApplyFailed(e) | FinalizerError::CleanupFailed(e) => e,
            other => Error::FinalizerError(other.to_string()),
        }
    }
}
