use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SiftError {
    #[error("unknown filter id: {0}")]
    UnknownFilter(String),
    #[error("invalid chain configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid settings for filter '{id}': {source}")]
    FilterSettings {
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to read word store {path}: {source}")]
    StoreRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("word store {path} is corrupt: {source}")]
    StoreParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write word store {path}: {source}")]
    StoreWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
