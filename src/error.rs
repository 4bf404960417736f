use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("runtime error: {0}")]
    Runtime(#[from] crate::runtime::RuntimeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("task rejected by policy: {0}")]
    PolicyRejected(String),

    #[error("database label not configured: {0}")]
    DatabaseNotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("server call failed: {0}")]
    ServerCall(String),

    #[error("{0}")]
    Other(String),
}

impl Serialize for NodeError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type NodeResult<T> = Result<T, NodeError>;
