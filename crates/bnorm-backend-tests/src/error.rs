use std::path::PathBuf;

use thiserror::Error;

/// Harness configuration and dispatch errors.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("unknown batch-norm API version {0:?}")]
    UnknownApiVersion(String),
    #[error("unknown tensor layout {0:?}")]
    UnknownLayout(String),
    #[error("failed to read tolerance config {}: {source}", path.display())]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse tolerance config {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
