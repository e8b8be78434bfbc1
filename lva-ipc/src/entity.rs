use serde::{Deserialize, Serialize};

/// Re-architected per the Design Notes: a static registry of tagged variants
/// rather than runtime-tagged dynamic dispatch. Each variant carries its
/// current value inline; metadata (unit/min/max/options) lives alongside.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityValue {
    Switch { on: bool },
    Select { value: String, options: Vec<String> },
    Number { value: f64, min: f64, max: f64, unit: Option<String> },
    Sensor { value: SensorValue, unit: Option<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SensorValue {
    Text(String),
    Number(f64),
}

/// A single hub-exposed control surface, keyed by a stable entity id such as
/// `switch.vision_enabled`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    pub key: String,
    pub value: EntityValue,
}

impl Entity {
    pub fn switch(key: &str, on: bool) -> Self {
        Self {
            key: key.to_string(),
            value: EntityValue::Switch { on },
        }
    }

    pub fn select(key: &str, value: &str, options: &[&str]) -> Self {
        Self {
            key: key.to_string(),
            value: EntityValue::Select {
                value: value.to_string(),
                options: options.iter().map(|s| s.to_string()).collect(),
            },
        }
    }

    pub fn number(key: &str, value: f64, min: f64, max: f64, unit: Option<&str>) -> Self {
        Self {
            key: key.to_string(),
            value: EntityValue::Number {
                value,
                min,
                max,
                unit: unit.map(str::to_string),
            },
        }
    }

    pub fn sensor_number(key: &str, value: f64, unit: Option<&str>) -> Self {
        Self {
            key: key.to_string(),
            value: EntityValue::Sensor {
                value: SensorValue::Number(value),
                unit: unit.map(str::to_string),
            },
        }
    }

    pub fn sensor_text(key: &str, value: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            value: EntityValue::Sensor {
                value: SensorValue::Text(value.into()),
                unit: None,
            },
        }
    }
}

/// The full set of entity keys the hub exposes for this satellite.
pub mod keys {
    pub const WAKE_WORD_THRESHOLD_PRESET: &str = "select.wake_word_threshold_preset";
    pub const WAKE_WORD_THRESHOLD: &str = "number.wake_word_threshold";
    pub const VISION_ENABLED: &str = "switch.vision_enabled";
    pub const ATTENTION_REQUIRED: &str = "switch.attention_required";
    pub const VISION_COOLDOWN_S: &str = "number.vision_cooldown_s";
    pub const VISION_MIN_CONFIDENCE: &str = "number.vision_min_confidence";
    pub const ENGAGED_VAD_WINDOW_S: &str = "number.engaged_vad_window_s";
    pub const DISTANCE: &str = "sensor.distance";
    pub const LAST_ATTENTION_STATE: &str = "sensor.last_attention_state";
    pub const LAST_VISION_LATENCY_MS: &str = "sensor.last_vision_latency_ms";
    pub const LAST_VISION_ERROR: &str = "sensor.last_vision_error";
    pub const ENABLE_THINKING_SOUND: &str = "switch.enable_thinking_sound";

    pub const ALL: &[&str] = &[
        WAKE_WORD_THRESHOLD_PRESET,
        WAKE_WORD_THRESHOLD,
        VISION_ENABLED,
        ATTENTION_REQUIRED,
        VISION_COOLDOWN_S,
        VISION_MIN_CONFIDENCE,
        ENGAGED_VAD_WINDOW_S,
        DISTANCE,
        LAST_ATTENTION_STATE,
        LAST_VISION_LATENCY_MS,
        LAST_VISION_ERROR,
        ENABLE_THINKING_SOUND,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_round_trips_through_json() {
        let e = Entity::switch(keys::VISION_ENABLED, true);
        let json = serde_json::to_string(&e).unwrap();
        let back: Entity = serde_json::from_str(&json).unwrap();
        assert_eq!(e, back);
    }

    #[test]
    fn all_keys_are_unique() {
        let mut sorted = keys::ALL.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), keys::ALL.len());
    }
}
