use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use crossbeam::channel::{bounded, Receiver, TryRecvError};
use thiserror::Error;

use super::{BLOCK_SIZE, SAMPLE_RATE};

#[derive(Error, Debug)]
pub enum AudioCaptureError {
    #[error("audio device error: {0}")]
    Device(String),
    #[error("audio stream error: {0}")]
    Stream(String),
    #[error("audio config error: {0}")]
    Config(String),
}

#[derive(Debug, Clone, Default)]
pub struct AudioCaptureConfig {
    pub device_name: Option<String>,
}

/// One fixed-size block of mono 16-kHz PCM, timestamped monotonically
///. `seq` increments once per emitted block and is used to detect
/// gaps when `xrun_counter` ticks up.
#[derive(Debug, Clone)]
pub struct AudioBlock {
    pub samples: Vec<f32>,
    pub seq: u64,
    pub timestamp: Instant,
}

/// Capability interface over the audio input device, so the wake-word
/// scorer and state machine never depend on `cpal` directly.
pub trait AudioCapture: Send {
    fn start(&mut self) -> Result<(), AudioCaptureError>;
    fn stop(&mut self);
    /// Non-blocking: returns the most recently completed block, or `None`
    /// if nothing new has arrived since the last call.
    fn current_block(&mut self) -> Option<AudioBlock>;
    fn xrun_counter(&self) -> u64;
}

/// Captures 16-kHz mono audio on a dedicated OS thread built around a `cpal`
/// input stream; the stream's callback pushes fixed-size blocks into a
/// bounded `crossbeam` channel the event loop drains without blocking. Emits
/// fixed-size f32 blocks feeding the wake-word scorer and ring buffer
/// directly.
pub struct CpalAudioCapture {
    config: AudioCaptureConfig,
    rx: Option<Receiver<AudioBlock>>,
    handle: Option<thread::JoinHandle<()>>,
    stop_tx: Option<crossbeam::channel::Sender<()>>,
    xrun_counter: Arc<AtomicU64>,
    next_seq: u64,
    last_seq_seen: Option<u64>,
}

impl CpalAudioCapture {
    pub fn new(config: AudioCaptureConfig) -> Self {
        Self {
            config,
            rx: None,
            handle: None,
            stop_tx: None,
            xrun_counter: Arc::new(AtomicU64::new(0)),
            next_seq: 0,
            last_seq_seen: None,
        }
    }

    fn spawn_thread(
        device_name: Option<String>,
        xrun_counter: Arc<AtomicU64>,
    ) -> Result<(Receiver<AudioBlock>, thread::JoinHandle<()>, crossbeam::channel::Sender<()>), AudioCaptureError>
    {
        let (block_tx, block_rx) = bounded::<AudioBlock>(8);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);

        let handle = thread::Builder::new()
            .name("lva-audio-capture".into())
            .spawn(move || {
                let result = Self::run(device_name, block_tx, xrun_counter);
                match result {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        let _ = stop_rx.recv();
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| AudioCaptureError::Stream(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok((block_rx, handle, stop_tx)),
            Ok(Err(e)) => Err(AudioCaptureError::Device(e)),
            Err(_) => Err(AudioCaptureError::Stream("capture thread died before starting".into())),
        }
    }

    fn run(
        device_name: Option<String>,
        block_tx: crossbeam::channel::Sender<AudioBlock>,
        xrun_counter: Arc<AtomicU64>,
    ) -> Result<cpal::Stream, String> {
        let host = cpal::default_host();
        let device = match device_name {
            Some(name) => host
                .input_devices()
                .map_err(|e| e.to_string())?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| format!("input device not found: {name}"))?,
            None => host
                .default_input_device()
                .ok_or_else(|| "no default input device".to_string())?,
        };

        let supported = device.default_input_config().map_err(|e| e.to_string())?;
        let stream_config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        let seq = Arc::new(AtomicU64::new(0));
        let err_fn = {
            let xrun_counter = xrun_counter.clone();
            move |err| {
                log::error!("audio capture stream error: {err}");
                xrun_counter.fetch_add(1, Ordering::Relaxed);
            }
        };

        let stream = match supported.sample_format() {
            SampleFormat::I16 => {
                Self::build_stream::<i16>(&device, &stream_config, block_tx, seq, err_fn)
            }
            SampleFormat::U16 => {
                Self::build_stream::<u16>(&device, &stream_config, block_tx, seq, err_fn)
            }
            SampleFormat::F32 => {
                Self::build_stream::<f32>(&device, &stream_config, block_tx, seq, err_fn)
            }
            other => Err(format!("unsupported sample format: {other:?}")),
        }?;

        stream.play().map_err(|e| e.to_string())?;
        Ok(stream)
    }

    fn build_stream<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        block_tx: crossbeam::channel::Sender<AudioBlock>,
        seq: Arc<AtomicU64>,
        err_fn: impl FnMut(cpal::StreamError) + Send + 'static,
    ) -> Result<cpal::Stream, String>
    where
        T: Sample + SizedSample + Send + 'static,
        f32: FromSample<T>,
    {
        let mut buffer: Vec<f32> = Vec::with_capacity(BLOCK_SIZE);
        device
            .build_input_stream(
                config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    for sample in data {
                        buffer.push(f32::from_sample(*sample));
                        if buffer.len() >= BLOCK_SIZE {
                            let block = AudioBlock {
                                samples: buffer.clone(),
                                seq: seq.fetch_add(1, Ordering::Relaxed),
                                timestamp: Instant::now(),
                            };
                            let _ = block_tx.try_send(block);
                            buffer.clear();
                        }
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| e.to_string())
    }
}

impl AudioCapture for CpalAudioCapture {
    fn start(&mut self) -> Result<(), AudioCaptureError> {
        let (rx, handle, stop_tx) =
            Self::spawn_thread(self.config.device_name.clone(), self.xrun_counter.clone())?;
        self.rx = Some(rx);
        self.handle = Some(handle);
        self.stop_tx = Some(stop_tx);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.rx = None;
    }

    fn current_block(&mut self) -> Option<AudioBlock> {
        let rx = self.rx.as_ref()?;
        let mut latest = None;
        loop {
            match rx.try_recv() {
                Ok(block) => latest = Some(block),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
        if let Some(block) = &latest {
            if let Some(last) = self.last_seq_seen {
                if block.seq > last + 1 {
                    self.xrun_counter.fetch_add(block.seq - last - 1, Ordering::Relaxed);
                }
            }
            self.last_seq_seen = Some(block.seq);
            self.next_seq = block.seq + 1;
        }
        latest
    }

    fn xrun_counter(&self) -> u64 {
        self.xrun_counter.load(Ordering::Relaxed)
    }
}

impl Drop for CpalAudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
