use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Stale write to {0}: object was modified concurrently")]
    StaleWrite(String),

    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object store error: {0}")]
    Store(String),

    #[error("Reconciliation superseded by a newer event")]
    Superseded,

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Kubernetes error: {0}")]
    KubernetesError(#[from] kube::error::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether re-fetching and retrying may succeed.
    ///
    /// `NotFound` only comes from updates whose target was deleted after it
    /// was read, which is a lost race like any other stale write.
    pub fn is_transient(&self) -> bool {
        match self {
            CoreError::StaleWrite(_)
            | CoreError::AlreadyExists(_)
            | CoreError::NotFound(_)
            | CoreError::Store(_) => true,
            CoreError::KubernetesError(kube::Error::Api(response)) => {
                response.code == 409 || response.code == 429 || response.code >= 500
            }
            CoreError::KubernetesError(kube::Error::HyperError(_))
            | CoreError::KubernetesError(kube::Error::Service(_)) => true,
            _ => false,
        }
    }
}
