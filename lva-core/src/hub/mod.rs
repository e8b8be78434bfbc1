mod protocol;

pub use protocol::{HubMessage, HubProtocolError};

use std::time::Duration;

use lva_ipc::Entity;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, ConfigHandle, ThresholdPreset};
use crate::state_machine::Event;

const RECONNECT_BACKOFF_CAP: Duration = Duration::from_secs(30);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Outbound commands the session runner issues against the live hub
/// connection. Queued through an
/// `mpsc` channel so `HubSession::run` stays the sole owner of the TCP
/// connection even as the session layer starts/feeds/stops a run.
#[derive(Debug, Clone)]
pub enum HubCommand {
    StartVoiceAssistant { use_vad: bool },
    AudioChunk(Vec<u8>),
    StopVoiceAssistant,
    /// Pushes an updated sensor/switch entity to the hub outside the
    /// (re)connect registration sweep — e.g. a fresh distance reading
    /// or the latest vision verdict.
    PublishEntityState(Entity),
}

/// Inbound voice-assistant signals forwarded out of the hub connection to
/// whoever is running the current session (phase transitions and audio to
/// play), kept separate from `Event` so the session layer decides how each
/// one maps onto the state machine's queue.
#[derive(Debug, Clone)]
pub enum HubVoiceEvent {
    Phase(String),
    AudioOut(Vec<u8>),
}

/// Maintains the hub connection, registering entities on every (re)connect
/// and translating incoming entity writes into either a direct `Config`
/// mutation or a forwarded `Event::ConfigMutated` for the state machine to
/// react to. Reconnects with exponential backoff capped at 30s; while
/// disconnected, local triggers still drive capture but no session can
/// complete, so the caller is expected to let sessions time out naturally.
pub struct HubSession {
    host: String,
    port: u16,
    config: ConfigHandle,
    events_tx: mpsc::Sender<Event>,
    commands_rx: mpsc::Receiver<HubCommand>,
    voice_events_tx: mpsc::Sender<HubVoiceEvent>,
}

impl HubSession {
    pub fn new(
        host: String,
        port: u16,
        config: ConfigHandle,
        events_tx: mpsc::Sender<Event>,
        commands_rx: mpsc::Receiver<HubCommand>,
        voice_events_tx: mpsc::Sender<HubVoiceEvent>,
    ) -> Self {
        Self {
            host,
            port,
            config,
            events_tx,
            commands_rx,
            voice_events_tx,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut backoff = Duration::from_secs(1);
        loop {
            if cancel.is_cancelled() {
                return;
            }
            match self.connect_and_serve(&cancel).await {
                Ok(()) => {
                    log::info!("hub session ended cleanly");
                    backoff = Duration::from_secs(1);
                }
                Err(e) => {
                    log::warn!("hub session disconnected: {e}, retrying in {backoff:?}");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = cancel.cancelled() => return,
            }
            backoff = (backoff * 2).min(RECONNECT_BACKOFF_CAP);
        }
    }

    async fn connect_and_serve(&mut self, cancel: &CancellationToken) -> Result<(), HubProtocolError> {
        let addr = format!("{}:{}", self.host, self.port);
        let stream = tokio::net::TcpStream::connect(&addr).await?;
        log::info!("connected to hub at {addr}");

        let (mut reader, mut writer) = protocol::split(stream);

        writer
            .write_message(&HubMessage::Hello {
                node_name: "lva-core".to_string(),
            })
            .await?;

        for entity in registry_snapshot(&self.config.current()) {
            writer.write_message(&HubMessage::RegisterEntity(entity)).await?;
        }

        let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
        keepalive.tick().await; // first tick fires immediately, skip it

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = keepalive.tick() => {
                    writer.write_message(&HubMessage::Ping).await?;
                }
                message = reader.read_message() => {
                    let message = message?;
                    self.handle_incoming(&mut writer, message).await?;
                }
                command = self.commands_rx.recv() => {
                    match command {
                        Some(cmd) => Self::write_command(&mut writer, cmd).await?,
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    async fn write_command(writer: &mut protocol::HubWriter, cmd: HubCommand) -> Result<(), HubProtocolError> {
        let message = match cmd {
            HubCommand::StartVoiceAssistant { use_vad } => HubMessage::VoiceAssistantStart { use_vad },
            HubCommand::AudioChunk(pcm) => HubMessage::VoiceAssistantAudioIn { pcm },
            HubCommand::StopVoiceAssistant => HubMessage::VoiceAssistantStop,
            HubCommand::PublishEntityState(entity) => HubMessage::EntityState(entity),
        };
        writer.write_message(&message).await
    }

    async fn handle_incoming(
        &self,
        writer: &mut protocol::HubWriter,
        message: HubMessage,
    ) -> Result<(), HubProtocolError> {
        match message {
            HubMessage::EntityCommand { key, value } => {
                self.apply_entity_write(&key, &value);
                let _ = self.events_tx.send(Event::ConfigMutated).await;
            }
            HubMessage::VoiceAssistantPhase { phase } => {
                let _ = self.voice_events_tx.send(HubVoiceEvent::Phase(phase)).await;
            }
            HubMessage::VoiceAssistantAudioOut { pcm } => {
                let _ = self.voice_events_tx.send(HubVoiceEvent::AudioOut(pcm)).await;
            }
            HubMessage::Ping => writer.write_message(&HubMessage::Pong).await?,
            HubMessage::Pong => {}
            other => log::debug!("ignoring unexpected hub message: {other:?}"),
        }
        Ok(())
    }

    fn apply_entity_write(&self, key: &str, value: &serde_json::Value) {
        use lva_ipc::entity::keys;

        self.config.mutate(|cfg| match key {
            k if k == keys::VISION_ENABLED => {
                if let Some(v) = value.as_bool() {
                    cfg.vision_enabled = v;
                }
            }
            k if k == keys::ATTENTION_REQUIRED => {
                if let Some(v) = value.as_bool() {
                    cfg.attention_required = v;
                }
            }
            k if k == keys::ENABLE_THINKING_SOUND => {
                if let Some(v) = value.as_bool() {
                    cfg.enable_thinking_sound = v;
                }
            }
            k if k == keys::VISION_COOLDOWN_S => {
                if let Some(v) = value.as_f64() {
                    cfg.vision_cooldown_s = v;
                }
            }
            k if k == keys::VISION_MIN_CONFIDENCE => {
                if let Some(v) = value.as_f64() {
                    cfg.vision_min_confidence = v as f32;
                }
            }
            k if k == keys::ENGAGED_VAD_WINDOW_S => {
                if let Some(v) = value.as_f64() {
                    cfg.engaged_vad_window_s = v;
                }
            }
            k if k == keys::WAKE_WORD_THRESHOLD => {
                if let Some(v) = value.as_f64() {
                    cfg.custom_threshold = (v as f32 / 100.0).clamp(0.0, 1.0);
                    cfg.wake_word_threshold_preset = ThresholdPreset::Custom;
                }
            }
            k if k == keys::WAKE_WORD_THRESHOLD_PRESET => {
                if let Some(v) = value.as_str() {
                    if let Some(preset) = parse_preset(v) {
                        cfg.wake_word_threshold_preset = preset;
                    }
                }
            }
            _ => log::debug!("entity write to unknown or read-only key `{key}` ignored"),
        });
    }
}

fn parse_preset(s: &str) -> Option<ThresholdPreset> {
    match s {
        "model_default" => Some(ThresholdPreset::ModelDefault),
        "strict" => Some(ThresholdPreset::Strict),
        "default" => Some(ThresholdPreset::Default),
        "sensitive" => Some(ThresholdPreset::Sensitive),
        "very_sensitive" => Some(ThresholdPreset::VerySensitive),
        "custom" => Some(ThresholdPreset::Custom),
        _ => None,
    }
}

fn preset_str(preset: ThresholdPreset) -> &'static str {
    match preset {
        ThresholdPreset::ModelDefault => "model_default",
        ThresholdPreset::Strict => "strict",
        ThresholdPreset::Default => "default",
        ThresholdPreset::Sensitive => "sensitive",
        ThresholdPreset::VerySensitive => "very_sensitive",
        ThresholdPreset::Custom => "custom",
    }
}

/// Builds the full set of hub-exposed entities from the current config
/// snapshot, used both at (re)connect registration time and for periodic
/// state publication.
pub fn registry_snapshot(config: &Config) -> Vec<Entity> {
    use lva_ipc::entity::keys;

    vec![
        Entity::select(
            keys::WAKE_WORD_THRESHOLD_PRESET,
            preset_str(config.wake_word_threshold_preset),
            ThresholdPreset::OPTIONS,
        ),
        Entity::number(
            keys::WAKE_WORD_THRESHOLD,
            (config.custom_threshold * 100.0) as f64,
            10.0,
            95.0,
            Some("%"),
        ),
        Entity::switch(keys::VISION_ENABLED, config.vision_enabled),
        Entity::switch(keys::ATTENTION_REQUIRED, config.attention_required),
        Entity::number(keys::VISION_COOLDOWN_S, config.vision_cooldown_s, 0.5, 15.0, Some("s")),
        Entity::number(keys::VISION_MIN_CONFIDENCE, config.vision_min_confidence as f64, 0.0, 1.0, None),
        Entity::number(keys::ENGAGED_VAD_WINDOW_S, config.engaged_vad_window_s, 0.5, 10.0, Some("s")),
        Entity::sensor_number(keys::DISTANCE, 0.0, Some("mm")),
        Entity::sensor_text(keys::LAST_ATTENTION_STATE, "none"),
        Entity::sensor_number(keys::LAST_VISION_LATENCY_MS, 0.0, Some("ms")),
        Entity::sensor_text(keys::LAST_VISION_ERROR, "none"),
        Entity::switch(keys::ENABLE_THINKING_SOUND, config.enable_thinking_sound),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_snapshot_covers_every_documented_key() {
        let entities = registry_snapshot(&Config::default());
        let keys: Vec<&str> = entities.iter().map(|e| e.key.as_str()).collect();
        for expected in lva_ipc::entity::keys::ALL {
            assert!(keys.contains(expected), "missing entity key {expected}");
        }
    }

    #[test]
    fn parse_preset_round_trips_every_option() {
        for opt in ThresholdPreset::OPTIONS {
            let preset = parse_preset(opt).unwrap();
            assert_eq!(preset_str(preset), *opt);
        }
    }
}
