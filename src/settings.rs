use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock};

use crate::config::{ConfigPatch, TrackerConfig};
use crate::error::TelemetryError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StoredSettings {
    tracker: TrackerConfig,
    /// Ground-truth reading taken when the previous session was finalized.
    last_session_end_xp: Option<f64>,
}

/// JSON-file backed settings collaborator.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<StoredSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let mut data: StoredSettings = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            StoredSettings::default()
        };

        let (tracker, rejected) = data.tracker.clone().validated();
        for err in &rejected {
            warn!("stored setting replaced with default: {err}");
        }
        data.tracker = tracker;

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn tracker(&self) -> TrackerConfig {
        self.read().tracker.clone()
    }

    /// Merge and persist. Rejected fields are returned and not written.
    pub fn update_tracker(&self, patch: &ConfigPatch) -> Result<Vec<TelemetryError>> {
        let mut guard = self.write();
        let rejected = guard.tracker.apply(patch);
        self.persist(&guard)?;
        Ok(rejected)
    }

    pub fn last_session_end_xp(&self) -> Option<f64> {
        self.read().last_session_end_xp
    }

    pub fn set_last_session_end_xp(&self, xp: f64) -> Result<()> {
        let mut guard = self.write();
        guard.last_session_end_xp = Some(xp);
        self.persist(&guard)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StoredSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StoredSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn persist(&self, data: &StoredSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibrated_rate_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let store = SettingsStore::new(path.clone()).unwrap();
        let rejected = store
            .update_tracker(&ConfigPatch {
                xp_per_kill: Some(0.0731),
                tempo_window: Some(3),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(rejected.len(), 1);
        store.set_last_session_end_xp(88.5).unwrap();

        let reloaded = SettingsStore::new(path).unwrap();
        assert_eq!(reloaded.tracker().xp_per_kill, 0.0731);
        assert_eq!(reloaded.tracker().tempo_window, 50);
        assert_eq!(reloaded.last_session_end_xp(), Some(88.5));
    }

    #[test]
    fn corrupt_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        let store = SettingsStore::new(path).unwrap();
        assert_eq!(store.tracker(), TrackerConfig::default());
    }
}
