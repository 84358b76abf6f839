use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid interface spec {spec:?}: {reason}")]
    InterfaceSpec { spec: String, reason: String },

    #[error("invalid intent: {0}")]
    Intent(String),

    #[error("kernel route operation failed: {0}")]
    Kernel(String),

    #[error("config: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
