use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{IpcError, Result};
use crate::sockets::MAX_FRAME_BYTES;

/// Well-known message type tags. Kept as `&'static str` constants (not an enum)
/// so unrecognized types round-trip instead of being rejected at the framing
/// layer — only the state machine and handlers care which types they know.
pub mod message_type {
    pub const MANUAL_WAKE: &str = "MANUAL_WAKE";
    pub const MUTE_TOGGLE: &str = "MUTE_TOGGLE";
    pub const VOLUME_UP: &str = "VOLUME_UP";
    pub const VOLUME_DOWN: &str = "VOLUME_DOWN";
    pub const VISION_GLANCE_REQUEST: &str = "VISION_GLANCE_REQUEST";
    pub const VISION_GLANCE_RESULT: &str = "VISION_GLANCE_RESULT";
    pub const STATE_CHANGED: &str = "STATE_CHANGED";
    pub const LED_STATE: &str = "LED_STATE";
    pub const CANCEL: &str = "CANCEL";
}

/// Who originated an envelope. `External` is also the normalized source for
/// legacy `{cmd}`/`{event}` shapes, which never name a source of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Core,
    Visd,
    Frontpaneld,
    External,
}

/// The one message shape every socket in the bus speaks on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default = "default_payload")]
    pub payload: Value,
    pub ts: f64,
    pub source: Source,
}

fn default_payload() -> Value {
    Value::Object(Default::default())
}

impl Envelope {
    pub fn new(type_: impl Into<String>, payload: Value, source: Source) -> Self {
        Self {
            type_: type_.into(),
            payload,
            ts: now_secs(),
            source,
        }
    }

    /// Parses one line of newline-delimited JSON, normalizing legacy
    /// `{"cmd": X, ...}` / `{"event": X, ...}` shapes on the way in. Legacy
    /// envelopes never carry a `source`, so they are always stamped
    /// `external` — downstream code never sees the legacy shape itself.
    pub fn parse_line(line: &str) -> Result<Self> {
        if line.len() > MAX_FRAME_BYTES {
            return Err(IpcError::OversizeFrame {
                limit: MAX_FRAME_BYTES,
                actual: line.len(),
            });
        }
        let mut value: Value = serde_json::from_str(line)
            .map_err(|e| IpcError::Malformed(format!("invalid JSON: {e}")))?;
        normalize_legacy(&mut value);
        serde_json::from_value(value).map_err(|e| IpcError::Malformed(e.to_string()))
    }

    /// Serializes to a single newline-terminated JSON line.
    pub fn to_line(&self) -> Result<String> {
        let mut line =
            serde_json::to_string(self).map_err(|e| IpcError::Malformed(e.to_string()))?;
        if line.len() > MAX_FRAME_BYTES {
            return Err(IpcError::OversizeFrame {
                limit: MAX_FRAME_BYTES,
                actual: line.len(),
            });
        }
        line.push('\n');
        Ok(line)
    }
}

/// Legacy envelopes look like `{"cmd": "manual_wake", ...}` or
/// `{"event": "STATE_CHANGED", ...}`. Both map their tag onto `type`, drop the
/// legacy key, and default `source` to `external` when absent.
fn normalize_legacy(value: &mut Value) {
    let Some(obj) = value.as_object_mut() else {
        return;
    };
    if !obj.contains_key("type") {
        if let Some(cmd) = obj.remove("cmd") {
            if let Some(s) = cmd.as_str() {
                obj.insert("type".to_string(), Value::String(s.to_uppercase()));
            }
        } else if let Some(event) = obj.remove("event") {
            if let Some(s) = event.as_str() {
                obj.insert("type".to_string(), Value::String(s.to_string()));
            }
        }
    }
    obj.entry("source")
        .or_insert_with(|| Value::String("external".to_string()));
    obj.entry("ts").or_insert_with(|| Value::from(now_secs()));
    obj.entry("payload").or_insert_with(default_payload);
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_cmd_normalizes_to_manual_wake() {
        let env = Envelope::parse_line(r#"{"cmd":"manual_wake"}"#).unwrap();
        assert_eq!(env.type_, "MANUAL_WAKE");
        assert_eq!(env.source, Source::External);
    }

    #[test]
    fn legacy_event_normalizes_with_payload_preserved() {
        let env =
            Envelope::parse_line(r#"{"event":"STATE_CHANGED","payload":{"state":"IDLE"}}"#)
                .unwrap();
        assert_eq!(env.type_, "STATE_CHANGED");
        assert_eq!(env.payload["state"], "IDLE");
    }

    #[test]
    fn native_envelope_round_trips() {
        let original = Envelope::new(
            message_type::MUTE_TOGGLE,
            serde_json::json!({}),
            Source::Frontpaneld,
        );
        let line = original.to_line().unwrap();
        let parsed = Envelope::parse_line(line.trim_end()).unwrap();
        assert_eq!(parsed.type_, message_type::MUTE_TOGGLE);
        assert_eq!(parsed.source, Source::Frontpaneld);
    }

    #[test]
    fn oversize_line_is_rejected() {
        let huge = "x".repeat(MAX_FRAME_BYTES + 1);
        let line = format!(r#"{{"type":"MANUAL_WAKE","payload":"{huge}","ts":0,"source":"external"}}"#);
        assert!(matches!(
            Envelope::parse_line(&line),
            Err(IpcError::OversizeFrame { .. })
        ));
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(Envelope::parse_line("not json").is_err());
    }
}
