use std::path::PathBuf;

use thiserror::Error;

/// Credential and keystore errors.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("keystore I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("keystore parse failed: {0}")]
    Parse(String),

    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("stored public key does not match secret key")]
    KeyMismatch,
}

impl KeyError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        KeyError::Io {
            path: path.into(),
            source,
        }
    }
}
