//! Error types for the settings store.

use thiserror::Error;

/// Errors from reading or writing the settings document.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Settings file parse error at {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("Failed to serialize settings: {0}")]
    Serialize(serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
