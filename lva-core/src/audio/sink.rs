use std::sync::mpsc as std_mpsc;
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam::channel::{bounded, Receiver, Sender};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum AudioSinkError {
    #[error("failed to write audio data: {0}")]
    Write(String),
    #[error("audio output device error: {0}")]
    Device(String),
}

#[derive(Debug, Clone, Default)]
pub struct AudioSinkConfig {
    pub device_name: Option<String>,
}

/// Commands accepted by the playback thread.
pub enum PlaybackCommand {
    WriteChunk(Vec<f32>),
    EndStreamAndWait(std_mpsc::Sender<()>),
    Abort,
}

/// One decoder/output stream per utterance, owned by a dedicated OS thread
/// that drains a bounded `crossbeam` channel of `PlaybackCommand`s.
pub struct AudioSink {
    command_tx: Sender<PlaybackCommand>,
    _handle: thread::JoinHandle<()>,
}

impl AudioSink {
    /// Opens the output device on a dedicated thread and blocks until the
    /// stream is confirmed playing (or failed), mirroring
    /// `CpalAudioCapture::start`'s ready-signal handshake: a device that
    /// cannot be opened must fail *this* call, not just log from inside the
    /// thread, so callers can treat it as the startup-fatal condition §7
    /// documents.
    pub fn new(config: AudioSinkConfig) -> Result<Self, AudioSinkError> {
        let (command_tx, command_rx) = bounded(20);
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), String>>();

        let handle = thread::Builder::new()
            .name("lva-audio-sink".into())
            .spawn(move || {
                if let Err(e) = Self::run(command_rx, config, ready_tx) {
                    log::error!("audio sink thread exited: {e}");
                }
            })
            .map_err(|e| AudioSinkError::Device(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                command_tx,
                _handle: handle,
            }),
            Ok(Err(e)) => Err(AudioSinkError::Device(e)),
            Err(_) => Err(AudioSinkError::Device(
                "sink thread died before starting".into(),
            )),
        }
    }

    /// Queues a chunk of mono f32 samples for playback; returns immediately.
    pub fn write_chunk(&self, samples: Vec<f32>) -> Result<(), AudioSinkError> {
        self.command_tx
            .send(PlaybackCommand::WriteChunk(samples))
            .map_err(|_| AudioSinkError::Write("audio sink thread disconnected".into()))
    }

    /// Signals end of stream and blocks until playback drains.
    pub fn end_stream_and_wait(&self) -> Result<(), AudioSinkError> {
        let (tx, rx) = std_mpsc::channel();
        self.command_tx
            .send(PlaybackCommand::EndStreamAndWait(tx))
            .map_err(|_| AudioSinkError::Write("audio sink thread disconnected".into()))?;
        rx.recv()
            .map_err(|_| AudioSinkError::Write("completion signal lost".into()))
    }

    /// Aborts current playback immediately (barge-in).
    pub fn abort(&self) -> Result<(), AudioSinkError> {
        self.command_tx
            .send(PlaybackCommand::Abort)
            .map_err(|_| AudioSinkError::Write("audio sink thread disconnected".into()))
    }

    fn run(
        command_rx: Receiver<PlaybackCommand>,
        config: AudioSinkConfig,
        ready_tx: std_mpsc::Sender<Result<(), String>>,
    ) -> Result<(), String> {
        let stream = match Self::open_stream(&config) {
            Ok((stream, sample_tx)) => {
                let _ = ready_tx.send(Ok(()));
                (stream, sample_tx)
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e.clone()));
                return Err(e);
            }
        };
        let (_stream, sample_tx) = stream;

        loop {
            match command_rx.recv() {
                Ok(PlaybackCommand::WriteChunk(samples)) => {
                    for s in samples {
                        let _ = sample_tx.try_send(s);
                    }
                }
                Ok(PlaybackCommand::EndStreamAndWait(done)) => {
                    while !sample_tx.is_empty() {
                        thread::sleep(std::time::Duration::from_millis(10));
                    }
                    let _ = done.send(());
                }
                Ok(PlaybackCommand::Abort) => {
                    while sample_tx.try_recv().is_ok() {}
                }
                Err(_) => return Ok(()),
            }
        }
    }

    fn open_stream(
        config: &AudioSinkConfig,
    ) -> Result<(cpal::Stream, Sender<f32>), String> {
        let host = cpal::default_host();
        let device = match &config.device_name {
            Some(name) => host
                .output_devices()
                .map_err(|e| e.to_string())?
                .find(|d| d.name().map(|n| n == *name).unwrap_or(false))
                .ok_or_else(|| format!("output device not found: {name}"))?,
            None => host
                .default_output_device()
                .ok_or_else(|| "no default output device".to_string())?,
        };

        let supported = device.default_output_config().map_err(|e| e.to_string())?;
        let channels = supported.channels() as usize;
        let stream_config: cpal::StreamConfig = supported.config();

        let (sample_tx, sample_rx) = bounded::<f32>(1 << 16);

        let err_fn = |err| log::error!("audio sink stream error: {err}");
        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels) {
                        let sample = sample_rx.try_recv().unwrap_or(0.0);
                        for out in frame {
                            *out = sample;
                        }
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| e.to_string())?;
        stream.play().map_err(|e| e.to_string())?;

        Ok((stream, sample_tx))
    }
}
