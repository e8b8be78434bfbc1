use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{Config, ThresholdPreset};

/// The small persisted subset of configuration: wake model, threshold
/// preset, custom threshold, attention toggles, thinking-sound toggle.
/// Everything else in `Config` lives only in the config file / hub entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    pub wake_word_threshold_preset: ThresholdPreset,
    pub custom_threshold: f32,
    pub vision_enabled: bool,
    pub attention_required: bool,
    pub enable_thinking_sound: bool,
}

impl From<&Config> for Preferences {
    fn from(cfg: &Config) -> Self {
        Self {
            wake_word_threshold_preset: cfg.wake_word_threshold_preset,
            custom_threshold: cfg.custom_threshold,
            vision_enabled: cfg.vision_enabled,
            attention_required: cfg.attention_required,
            enable_thinking_sound: cfg.enable_thinking_sound,
        }
    }
}

impl Preferences {
    pub fn apply_to(&self, cfg: &mut Config) {
        cfg.wake_word_threshold_preset = self.wake_word_threshold_preset;
        cfg.custom_threshold = self.custom_threshold;
        cfg.vision_enabled = self.vision_enabled;
        cfg.attention_required = self.attention_required;
        cfg.enable_thinking_sound = self.enable_thinking_sound;
    }

    pub fn load(path: &Path) -> Option<Self> {
        let text = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&text) {
            Ok(prefs) => Some(prefs),
            Err(e) => {
                log::warn!("preferences file {} is corrupt: {e}", path.display());
                None
            }
        }
    }

    /// Atomic write: serialize to `<path>.tmp`, fsync, then rename over
    /// `path`. A crash mid-write leaves the old file intact, never a
    /// half-written one.
    pub fn save_atomic(&self, path: &Path) -> std::io::Result<()> {
        let tmp_path: PathBuf = {
            let mut p = path.to_path_buf();
            let file_name = format!(
                "{}.tmp",
                path.file_name().and_then(|n| n.to_str()).unwrap_or("preferences.json")
            );
            p.set_file_name(file_name);
            p
        };

        let json = serde_json::to_string_pretty(self)
            .expect("Preferences always serializes to JSON");

        {
            let mut f = File::create(&tmp_path)?;
            f.write_all(json.as_bytes())?;
            f.sync_all()?;
        }
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    pub fn path_next_to(config_path: &Path) -> PathBuf {
        config_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("preferences.json")
    }
}

impl Default for Preferences {
    fn default() -> Self {
        Preferences::from(&Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_through_atomic_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("preferences.json");

        let mut prefs = Preferences::default();
        prefs.attention_required = false;
        prefs.custom_threshold = 0.33;
        prefs.save_atomic(&path).unwrap();

        assert!(!dir.path().join("preferences.json.tmp").exists());
        let loaded = Preferences::load(&path).unwrap();
        assert_eq!(loaded, prefs);
    }

    #[test]
    fn repeated_saves_never_leave_a_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("preferences.json");
        for i in 0..5 {
            let mut prefs = Preferences::default();
            prefs.custom_threshold = 0.1 * i as f32;
            prefs.save_atomic(&path).unwrap();
            assert!(Preferences::load(&path).is_some());
        }
    }

    #[test]
    fn corrupt_file_loads_as_none_rather_than_panicking() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("preferences.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(Preferences::load(&path).is_none());
    }
}
