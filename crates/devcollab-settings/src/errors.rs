use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not valid JSON: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The merged document does not fit [`crate::Settings`].
    #[error("settings have the wrong shape: {0}")]
    Shape(#[from] serde_json::Error),

    #[error("invalid settings value: {0}")]
    InvalidValue(String),

    /// The habitus signing key is unusable; tokens could be forged with it.
    #[error("habitus.jwtSecret {0}")]
    WeakJwtSecret(String),
}

pub type Result<T> = std::result::Result<T, SettingsError>;
