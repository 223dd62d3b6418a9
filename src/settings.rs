//! Settings that survive a restart
//!
//! Stored as `settings.json` in the data directory. A missing or corrupt
//! file yields defaults; writes go through a temp file and a rename.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::Result;

const FILE_NAME: &str = "settings.json";

/// Persisted flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Forward transcripts to room clients
    pub debug_enabled: bool,
}

/// Partial update; absent fields are left alone
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct SettingsPatch {
    pub debug_enabled: Option<bool>,
}

impl Settings {
    #[must_use]
    pub fn apply(mut self, patch: SettingsPatch) -> Self {
        if let Some(debug_enabled) = patch.debug_enabled {
            self.debug_enabled = debug_enabled;
        }
        self
    }
}

/// File-backed settings cache
#[derive(Debug)]
pub struct SettingsStore {
    path: Option<PathBuf>,
    current: RwLock<Settings>,
}

impl SettingsStore {
    /// Load settings from `data_dir`, falling back to defaults
    pub async fn open(data_dir: &Path) -> Self {
        let path = data_dir.join(FILE_NAME);
        let current = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "corrupt settings file, using defaults");
                Settings::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Settings::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read settings, using defaults");
                Settings::default()
            }
        };

        tracing::debug!(path = %path.display(), ?current, "settings loaded");
        Self {
            path: Some(path),
            current: RwLock::new(current),
        }
    }

    /// Settings that are never written to disk
    #[must_use]
    pub fn in_memory(settings: Settings) -> Self {
        Self {
            path: None,
            current: RwLock::new(settings),
        }
    }

    pub async fn get(&self) -> Settings {
        *self.current.read().await
    }

    /// Apply a patch and persist the result
    ///
    /// # Errors
    ///
    /// Returns error if the settings file cannot be written; the in-memory
    /// value is left unchanged in that case
    pub async fn update(&self, patch: SettingsPatch) -> Result<Settings> {
        let mut current = self.current.write().await;
        let next = current.apply(patch);

        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let tmp = path.with_extension("json.tmp");
            tokio::fs::write(&tmp, serde_json::to_vec_pretty(&next)?).await?;
            tokio::fs::rename(&tmp, path).await?;
        }

        *current = next;
        tracing::info!(debug_enabled = next.debug_enabled, "settings updated");
        Ok(next)
    }
}
