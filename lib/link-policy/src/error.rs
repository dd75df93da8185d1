use thiserror::Error;

pub type Result<T> = std::result::Result<T, PolicyError>;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Invalid pattern: {0:?}")]
    InvalidPattern(String),

    #[error("Invalid action: {0:?}")]
    InvalidAction(String),

    #[error("Unknown load-balancing strategy: {0}")]
    UnknownStrategy(String),

    #[error("Failed to read rule snapshot {path}: {source}")]
    SnapshotIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid rule snapshot: {0}")]
    Snapshot(#[from] serde_yaml::Error),
}
