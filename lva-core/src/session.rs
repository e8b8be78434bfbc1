//! Bridges `Effect`s from the activation state machine onto the
//! live hub connection and local audio devices: starting/stopping a
//! conversation stream, feeding captured PCM to the hub, detecting the VAD
//! onset that moves ENGAGED into LISTENING, and playing back whatever the
//! hub streams back. Runs entirely inside the single-threaded event loop —
//! no suspension points here beyond what its callers already await.

use std::sync::Arc;

use tokio::sync::mpsc;
use voice_activity_detector::{IteratorExt, LabeledAudio, VoiceActivityDetector};

use crate::audio::{AudioSink, AudioSinkConfig, SAMPLE_RATE};
use crate::hub::HubCommand;
use crate::state_machine::Event;

/// Speech-onset detector fed one audio block at a time. Modeled as a trait
/// (mirroring the Design Notes' "optional hardware" pattern, generalized to
/// "optional software capability") so the reducer-driving loop never depends
/// on a concrete VAD backend; a `NullVad` backs tests and configurations
/// that never need it (wake-word and manual-wake sessions skip ENGAGED
/// entirely.4, and never call into this).
pub trait VadDetector: Send {
    /// Feeds one block of mono f32 samples; returns `true` the first time
    /// speech onset is detected since the last `reset()`.
    fn process(&mut self, block: &[f32]) -> bool;
    fn reset(&mut self);
}

/// Silero VAD via the `voice_activity_detector` crate, grounded in the
/// teacher's `SileroVAD` (`src/vad/silero.rs`): the same model, threshold,
/// and streaming label API, trimmed to the single onset signal this session
/// layer needs instead of a continuous speech-active gate for wakeword
/// gating.
pub struct SileroVad {
    vad: VoiceActivityDetector,
    threshold: f32,
    triggered: bool,
}

impl SileroVad {
    pub fn new() -> Result<Self, String> {
        let vad = VoiceActivityDetector::builder()
            .sample_rate(SAMPLE_RATE as i64)
            .chunk_size(512usize)
            .build()
            .map_err(|e| format!("failed to build Silero VAD: {e}"))?;
        Ok(Self {
            vad,
            threshold: 0.5,
            triggered: false,
        })
    }
}

impl VadDetector for SileroVad {
    fn process(&mut self, block: &[f32]) -> bool {
        if self.triggered {
            return false;
        }
        let samples: Vec<i16> = block
            .iter()
            .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .collect();
        let any_speech = samples
            .into_iter()
            .label(&mut self.vad, self.threshold, 0)
            .any(|labeled| matches!(labeled, LabeledAudio::Speech(_)));
        if any_speech {
            self.triggered = true;
        }
        any_speech
    }

    fn reset(&mut self) {
        self.triggered = false;
    }
}

/// Always reports no speech: backs tests and wake-word/manual sessions that
/// enter LISTENING directly without ever arming a VAD window.
#[derive(Default)]
pub struct NullVad;

impl VadDetector for NullVad {
    fn process(&mut self, _block: &[f32]) -> bool {
        false
    }
    fn reset(&mut self) {}
}

/// Drives one conversation's worth of hub RPC + local playback. Only one
/// session is ever active at a time: the state machine never issues a
/// second `StartSession` before a `CancelSession` or terminal transition.
pub struct SessionManager {
    hub_commands_tx: mpsc::Sender<HubCommand>,
    sink: Arc<AudioSink>,
    vad: Box<dyn VadDetector>,
    active: bool,
    use_vad: bool,
    thinking_sound_path: std::path::PathBuf,
}

impl SessionManager {
    pub fn new(
        hub_commands_tx: mpsc::Sender<HubCommand>,
        sink: Arc<AudioSink>,
        vad: Box<dyn VadDetector>,
        thinking_sound_path: std::path::PathBuf,
    ) -> Self {
        Self {
            hub_commands_tx,
            sink,
            vad,
            active: false,
            use_vad: false,
            thinking_sound_path,
        }
    }

    /// Effect::StartSession: opens a voice-assistant run against the
    /// hub. If `use_vad`, audio blocks are gated through the VAD until onset
    /// fires `Event::VadStart`; otherwise the caller already transitioned
    /// straight to LISTENING (wake-word/manual-wake) and audio streams
    /// immediately.
    pub async fn start(&mut self, use_vad: bool) {
        self.active = true;
        self.use_vad = use_vad;
        self.vad.reset();
        let _ = self
            .hub_commands_tx
            .send(HubCommand::StartVoiceAssistant { use_vad })
            .await;
    }

    /// Effect::CancelSession: stops the hub stream and any
    /// in-flight playback. Idempotent — cancelling a session that was never
    /// started is a no-op, since a session never holds the microphone after
    /// returning to idle and repeated cancels must be harmless.
    pub async fn cancel(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        let _ = self.hub_commands_tx.send(HubCommand::StopVoiceAssistant).await;
        let _ = self.sink.abort();
    }

    /// Feeds one captured audio block to the active session. Returns `Event::VadStart` once the VAD
    /// fires, for the caller to push onto the state machine's queue; a
    /// session not gated on VAD (`use_vad=false`, already LISTENING) never
    /// produces one.
    pub async fn feed_audio_block(&mut self, block: &[f32]) -> Option<Event> {
        if !self.active {
            return None;
        }
        let pcm = f32_block_to_i16le(block);
        let _ = self.hub_commands_tx.send(HubCommand::AudioChunk(pcm)).await;

        if self.use_vad && self.vad.process(block) {
            Some(Event::VadStart)
        } else {
            None
        }
    }

    pub fn start_thinking_sound(&self) {
        if let Ok(samples) = load_wav_as_f32(&self.thinking_sound_path) {
            let _ = self.sink.write_chunk(samples);
        } else {
            log::warn!(
                "thinking sound {} unreadable, skipping",
                self.thinking_sound_path.display()
            );
        }
    }

    pub fn stop_thinking_sound(&self) {
        let _ = self.sink.abort();
    }

    pub fn play_chunk(&self, pcm_i16le: &[u8]) {
        let samples = i16le_to_f32_block(pcm_i16le);
        let _ = self.sink.write_chunk(samples);
    }

    pub async fn end_playback_and_wait(&self) {
        let sink = self.sink.clone();
        let _ = tokio::task::spawn_blocking(move || sink.end_stream_and_wait()).await;
    }
}

fn f32_block_to_i16le(block: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(block.len() * 2);
    for sample in block {
        let clamped = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        out.extend_from_slice(&clamped.to_le_bytes());
    }
    out
}

fn i16le_to_f32_block(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / i16::MAX as f32)
        .collect()
}

/// Loads a 16-bit mono PCM WAV file as f32 samples for the thinking/activate
/// sounds. Minimal reader (no external WAV crate pulled in for two short
/// sound effects): skips to the `data` chunk and decodes little-endian i16.
fn load_wav_as_f32(path: &std::path::Path) -> std::io::Result<Vec<f32>> {
    let bytes = std::fs::read(path)?;
    if bytes.len() < 44 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "not a RIFF/WAVE file"));
    }
    let mut offset = 12;
    while offset + 8 <= bytes.len() {
        let chunk_id = &bytes[offset..offset + 4];
        let chunk_size = u32::from_le_bytes(bytes[offset + 4..offset + 8].try_into().unwrap()) as usize;
        let data_start = offset + 8;
        if chunk_id == b"data" {
            let data_end = (data_start + chunk_size).min(bytes.len());
            return Ok(i16le_to_f32_block(&bytes[data_start..data_end]));
        }
        offset = data_start + chunk_size + (chunk_size % 2);
    }
    Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "no data chunk"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i16_round_trip_preserves_amplitude_within_quantization() {
        let original = vec![0.5f32, -0.25, 0.0, 1.0, -1.0];
        let bytes = f32_block_to_i16le(&original);
        let back = i16le_to_f32_block(&bytes);
        for (a, b) in original.iter().zip(back.iter()) {
            assert!((a - b).abs() < 0.001);
        }
    }

    #[test]
    fn null_vad_never_fires() {
        let mut vad = NullVad;
        assert!(!vad.process(&[0.0; 1024]));
    }

    #[tokio::test]
    async fn cancel_before_start_is_a_harmless_no_op() {
        // Headless CI/build machines often expose no audio output device at
        // all; skip rather than fail when that's the case, since this test
        // is about `SessionManager::cancel`'s idempotence, not device setup.
        let Ok(sink) = AudioSink::new(AudioSinkConfig::default()) else {
            eprintln!("skipping: no usable default output device in this environment");
            return;
        };
        let (tx, mut rx) = mpsc::channel(4);
        let mut mgr = SessionManager::new(tx, Arc::new(sink), Box::new(NullVad), "sounds/thinking.wav".into());
        mgr.cancel().await;
        assert!(rx.try_recv().is_err());
    }
}
