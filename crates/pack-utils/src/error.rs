use std::path::PathBuf;

/// Base error type for pack-utils operations.
#[derive(Debug, thiserror::Error)]
pub enum UtilError {
    #[error("pack is already held by '{path}'")]
    AlreadyHeld { path: PathBuf },

    #[error("unable to create keep file '{path}': {source}")]
    CreateKeep {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
