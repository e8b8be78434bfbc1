use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;

pub const DEFAULT_CONFIG_PATH: &str = "/home/user/linux-voice-assistant/config.json";
pub const DEFAULT_HUB_PORT: u16 = 6053;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for `{key}`: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Named wake-word threshold presets. `Custom` defers to
/// `custom_threshold`; `ModelDefault` defers to the model's own built-in
/// default, resolved by the scorer rather than here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdPreset {
    ModelDefault,
    Strict,
    Default,
    Sensitive,
    VerySensitive,
    Custom,
}

impl ThresholdPreset {
    /// `None` for presets that don't carry a fixed value (`ModelDefault`,
    /// `Custom`); the caller resolves those against the model or
    /// `custom_threshold` respectively.
    pub fn fixed_value(self) -> Option<f32> {
        match self {
            ThresholdPreset::Strict => Some(0.60),
            ThresholdPreset::Default => Some(0.50),
            ThresholdPreset::Sensitive => Some(0.45),
            ThresholdPreset::VerySensitive => Some(0.40),
            ThresholdPreset::ModelDefault | ThresholdPreset::Custom => None,
        }
    }

    pub const OPTIONS: &'static [&'static str] = &[
        "model_default",
        "strict",
        "default",
        "sensitive",
        "very_sensitive",
        "custom",
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceSensorModel {
    L0x,
    L1x,
}

/// The full recognized-option configuration set, loaded once at startup
/// and republished as a fresh `Arc` after every mutation — "centralize as an
/// immutable snapshot", per the Design Notes, rather than a hidden mutable
/// singleton.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub wake_word_detection: bool,
    pub distance_activation: bool,
    pub distance_activation_threshold_mm: u32,
    pub distance_sensor_model: DistanceSensorModel,
    pub vision_enabled: bool,
    pub attention_required: bool,
    pub vision_cooldown_s: f64,
    pub vision_min_confidence: f32,
    pub engaged_vad_window_s: f64,
    pub wake_word_threshold_preset: ThresholdPreset,
    pub custom_threshold: f32,
    pub enable_thinking_sound: bool,
    pub sound_path_activate: PathBuf,
    pub sound_path_thinking: PathBuf,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub gpio_enabled: bool,
    pub wakeword_models_dir: PathBuf,
    pub control_socket_dir: PathBuf,
    pub hub_host: String,
    pub hub_port: u16,
    pub vision_fallback_on_error: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wake_word_detection: true,
            distance_activation: false,
            distance_activation_threshold_mm: 150,
            distance_sensor_model: DistanceSensorModel::L1x,
            vision_enabled: false,
            attention_required: true,
            vision_cooldown_s: 4.0,
            vision_min_confidence: 0.60,
            engaged_vad_window_s: 2.5,
            wake_word_threshold_preset: ThresholdPreset::Default,
            custom_threshold: 0.50,
            enable_thinking_sound: true,
            sound_path_activate: PathBuf::from("sounds/activate.wav"),
            sound_path_thinking: PathBuf::from("sounds/thinking.wav"),
            input_device: None,
            output_device: None,
            gpio_enabled: false,
            wakeword_models_dir: PathBuf::from("models"),
            control_socket_dir: PathBuf::from(lva_ipc::sockets::DEFAULT_IPC_DIR),
            hub_host: "0.0.0.0".to_string(),
            hub_port: DEFAULT_HUB_PORT,
            vision_fallback_on_error: true,
        }
    }
}

impl Config {
    /// Effective wake-word threshold for a preset/custom pair, resolving
    /// `Custom` against `custom_threshold`. `ModelDefault` is left to the
    /// caller, which knows the model's own default.
    pub fn effective_threshold(&self, model_default: f32) -> f32 {
        match self.wake_word_threshold_preset {
            ThresholdPreset::ModelDefault => model_default,
            ThresholdPreset::Custom => self.custom_threshold,
            other => other.fixed_value().unwrap_or(model_default),
        }
    }

    /// Loads from `path`, falling back to `DEFAULT_CONFIG_PATH` (or
    /// `LVA_CONFIG_PATH` if set) when `path` is `None`. Missing files produce
    /// defaults with a warning rather than refusing to start — only a
    /// present-but-invalid file is fatal.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path);
        let text = match std::fs::read_to_string(&resolved) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!(
                    "config file {} not found, using defaults",
                    resolved.display()
                );
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: resolved,
                    source,
                })
            }
        };

        let raw: Value = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: resolved.clone(),
            source,
        })?;
        Self::from_json_value(raw, &resolved)
    }

    fn from_json_value(raw: Value, path: &Path) -> Result<Self, ConfigError> {
        let Value::Object(map) = raw else {
            return Err(ConfigError::Parse {
                path: path.to_path_buf(),
                source: serde::de::Error::custom("config root must be a JSON object"),
            });
        };

        let known: std::collections::HashSet<&str> = [
            "wake_word_detection",
            "distance_activation",
            "distance_activation_threshold_mm",
            "distance_sensor_model",
            "vision_enabled",
            "attention_required",
            "vision_cooldown_s",
            "vision_min_confidence",
            "engaged_vad_window_s",
            "wake_word_threshold_preset",
            "custom_threshold",
            "enable_thinking_sound",
            "sound_path_activate",
            "sound_path_thinking",
            "input_device",
            "output_device",
            "gpio_enabled",
            "wakeword_models_dir",
            "control_socket_dir",
            "hub_host",
            "hub_port",
            "vision_fallback_on_error",
        ]
        .into_iter()
        .collect();

        for key in map.keys() {
            if !known.contains(key.as_str()) {
                log::warn!("ignoring unknown config key `{key}` in {}", path.display());
            }
        }

        let filtered: serde_json::Map<String, Value> = map
            .into_iter()
            .filter(|(k, _)| known.contains(k.as_str()))
            .collect();

        // Missing keys fall back to `Config::default()`'s values by merging
        // onto a defaulted map rather than relying solely on serde(default),
        // so a config that only overrides one field keeps every other
        // documented default.
        let mut merged = serde_json::to_value(Config::default()).expect("Config always serializes");
        if let Value::Object(defaults) = &mut merged {
            for (k, v) in filtered {
                defaults.insert(k, v);
            }
        }

        serde_json::from_value(merged).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn resolve_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    std::env::var_os("LVA_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// A publish/subscribe handle for the immutable `Arc<Config>` snapshot: the
/// event loop is the sole writer, every other task holds a `watch::Receiver`
/// and always reads the latest published snapshot (Design Notes: "Global
/// mutable configuration ... centralize as an immutable snapshot").
#[derive(Clone)]
pub struct ConfigHandle {
    tx: Arc<watch::Sender<Arc<Config>>>,
}

impl ConfigHandle {
    pub fn new(initial: Config) -> (Self, watch::Receiver<Arc<Config>>) {
        let (tx, rx) = watch::channel(Arc::new(initial));
        (Self { tx: Arc::new(tx) }, rx)
    }

    pub fn current(&self) -> Arc<Config> {
        self.tx.borrow().clone()
    }

    /// Applies `mutate` to a clone of the current snapshot and republishes
    /// the result. Returns the new snapshot.
    pub fn mutate(&self, mutate: impl FnOnce(&mut Config)) -> Arc<Config> {
        let mut next = (*self.tx.borrow()).as_ref().clone();
        mutate(&mut next);
        let next = Arc::new(next);
        let _ = self.tx.send(next.clone());
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = Config::load(Some(Path::new("/nonexistent/path/config.json"))).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn unknown_keys_are_ignored_missing_keys_default() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"{{"vision_enabled": true, "totally_made_up_key": 42}}"#
        )
        .unwrap();
        let cfg = Config::load(Some(f.path())).unwrap();
        assert!(cfg.vision_enabled);
        assert_eq!(
            cfg.engaged_vad_window_s,
            Config::default().engaged_vad_window_s
        );
    }

    #[test]
    fn invalid_json_is_an_error() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "not json at all").unwrap();
        assert!(Config::load(Some(f.path())).is_err());
    }

    #[test]
    fn effective_threshold_resolves_custom_and_preset() {
        let mut cfg = Config::default();
        cfg.wake_word_threshold_preset = ThresholdPreset::Custom;
        cfg.custom_threshold = 0.77;
        assert_eq!(cfg.effective_threshold(0.5), 0.77);

        cfg.wake_word_threshold_preset = ThresholdPreset::Strict;
        assert_eq!(cfg.effective_threshold(0.5), 0.60);

        cfg.wake_word_threshold_preset = ThresholdPreset::ModelDefault;
        assert_eq!(cfg.effective_threshold(0.42), 0.42);
    }

    #[test]
    fn config_handle_publishes_mutations() {
        let (handle, rx) = ConfigHandle::new(Config::default());
        assert!(!rx.borrow().vision_enabled);
        handle.mutate(|c| c.vision_enabled = true);
        assert!(rx.borrow().vision_enabled);
    }
}
