use workflow_persist::PersistError;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to initialize logging: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
