mod capture;
mod ring;
mod sink;

pub use capture::{AudioCapture, AudioCaptureConfig, AudioCaptureError, CpalAudioCapture};
pub use ring::AudioRingBuffer;
pub use sink::{AudioSink, AudioSinkConfig, AudioSinkError, PlaybackCommand};

pub const SAMPLE_RATE: u32 = 16_000;
pub const BLOCK_SIZE: usize = 1024;
