//! File-backed settings store with atomic writes.
//!
//! The document lives at `<root>/mcp_settings.json`. There is no
//! in-memory cache: every read hits the disk, so concurrent
//! control-plane handlers always see the latest write.

use crate::error::SettingsError;
use crate::types::McpSettings;
use serde::Serialize;
use std::path::{Path, PathBuf};

const SETTINGS_FILE: &str = "mcp_settings.json";

/// Store for the settings document.
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    /// Create a store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            path: root.into().join(SETTINGS_FILE),
        }
    }

    /// The path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document, creating it with the empty default if absent.
    pub async fn load(&self) -> Result<McpSettings, SettingsError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => serde_json::from_str(&data).map_err(|source| SettingsError::Parse {
                path: self.path.display().to_string(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let defaults = McpSettings::default();
                self.save(&defaults).await?;
                Ok(defaults)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Persist the document (atomic write: .tmp → rename).
    pub async fn save(&self, settings: &McpSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = to_pretty_json(settings).map_err(SettingsError::Serialize)?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    /// Read-modify-write convenience; returns the document as written.
    pub async fn update<F>(&self, mutate: F) -> Result<McpSettings, SettingsError>
    where
        F: FnOnce(&mut McpSettings),
    {
        let mut settings = self.load().await?;
        mutate(&mut settings);
        self.save(&settings).await?;
        Ok(settings)
    }
}

/// Serialize with 4-space indentation, matching the document's on-disk
/// convention.
fn to_pretty_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut serializer)?;
    Ok(String::from_utf8(buf).expect("serde_json emits utf-8"))
}
