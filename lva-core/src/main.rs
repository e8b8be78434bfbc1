use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use lva_core::audio::{AudioCapture, AudioCaptureConfig, AudioSink, AudioSinkConfig, CpalAudioCapture};
use lva_core::clock::{Clock, SystemClock};
use lva_core::config::{Config, ConfigHandle};
use lva_core::control_socket::{ControlSocketServer, GpioEventsPublisher};
use lva_core::distance::{DistanceOutput, DistanceTrigger, NullDistanceReader};
use lva_core::hub::{HubCommand, HubSession, HubVoiceEvent};
use lva_core::preferences::Preferences;
use lva_core::session::{NullVad, SessionManager, SileroVad};
use lva_core::state_machine::{Effect, Event, Machine, SessionState, TimerKind};
use lva_core::vision_client::VisionClient;
use lva_core::wakeword::{NullScoreProducer, TfliteScoreProducer, WakewordScorer};
use lva_ipc::{sockets, Metrics};

#[derive(Parser, Debug)]
#[command(name = "lva-core")]
#[command(about = "Activation pipeline and session state machine for the linux-voice-assistant satellite")]
struct Args {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long)]
    verbose: bool,

    /// Override the configuration file path (defaults to `LVA_CONFIG_PATH` or
    /// the default config path).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the UNIX-socket bus directory (defaults to `LVA_IPC_DIR` or
    /// `/tmp/lva-ipc`).
    #[arg(long)]
    socket_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    log::info!("starting lva-core");

    let config = match Config::load(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            log::error!("fatal: could not load configuration: {e}");
            std::process::exit(1);
        }
    };

    let ipc_dir = sockets::ipc_dir(args.socket_dir.as_deref());
    if let Err(e) = std::fs::create_dir_all(&ipc_dir) {
        log::error!("fatal: could not create IPC socket directory {}: {e}", ipc_dir.display());
        std::process::exit(1);
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(lva_core::config::DEFAULT_CONFIG_PATH));
    let preferences_path = Preferences::path_next_to(&config_path);
    let mut config = config;
    config.control_socket_dir = ipc_dir.clone();
    if let Some(prefs) = Preferences::load(&preferences_path) {
        log::info!("loaded preferences from {}", preferences_path.display());
        prefs.apply_to(&mut config);
    }

    let (config_handle, config_rx) = ConfigHandle::new(config);
    let metrics = Arc::new(Metrics::default());
    let cancel = CancellationToken::new();

    let (events_tx, mut events_rx) = mpsc::channel::<Event>(256);

    let control_server = match ControlSocketServer::bind(&ipc_dir, events_tx.clone(), metrics.clone()).await {
        Ok(s) => s,
        Err(e) => {
            log::error!("fatal: could not bind control socket: {e}");
            std::process::exit(1);
        }
    };
    let gpio_publisher = match GpioEventsPublisher::bind(&ipc_dir) {
        Ok(p) => p,
        Err(e) => {
            log::error!("fatal: could not bind gpio-events socket: {e}");
            std::process::exit(1);
        }
    };
    let gpio = gpio_publisher.handle();

    tokio::spawn(control_server.run(cancel.clone()));
    tokio::spawn(gpio_publisher.run(cancel.clone()));

    // Distance trigger: no I2C driver is in scope, so this satellite
    // runs with `NullDistanceReader` until a concrete board-specific driver
    // is wired in behind the same `DistanceReader` trait.
    let (distance_active_tx, distance_active_rx) = watch::channel(false);
    let (distance_tx, mut distance_rx) = mpsc::channel::<DistanceOutput>(32);
    let distance_trigger = DistanceTrigger::new(Box::new(NullDistanceReader));
    tokio::spawn(distance_trigger.run(config_rx.clone(), distance_active_rx, distance_tx));

    // Vision client: talks to `visd.sock`; a single outstanding request at a
    // time is enforced by the state machine itself, this client is
    // stateless between requests.
    let vision_client = VisionClient::new(sockets::visd_sock(&ipc_dir), events_tx.clone());

    // Hub session: reconnects with backoff; entity writes flow back
    // onto the shared event queue as `Event::ConfigMutated`.
    let (hub_commands_tx, hub_commands_rx) = mpsc::channel::<HubCommand>(64);
    let (voice_events_tx, mut voice_events_rx) = mpsc::channel::<HubVoiceEvent>(32);
    let hub_session = HubSession::new(
        config_handle.current().hub_host.clone(),
        config_handle.current().hub_port,
        config_handle.clone(),
        events_tx.clone(),
        hub_commands_rx,
        voice_events_tx,
    );
    tokio::spawn(hub_session.run(cancel.clone()));

    // Audio capture + wake-word scoring: the capture device is owned by one
    // dedicated OS thread; wake-word inference runs on a second
    // dedicated thread so a slow model never blocks the event loop's poll of
    // `current_block()`.
    let mut capture = CpalAudioCapture::new(AudioCaptureConfig {
        device_name: config_handle.current().input_device.clone(),
    });
    if let Err(e) = capture.start() {
        log::warn!("audio input unavailable, wake-word/VAD capture disabled: {e}");
    }

    let sink = match AudioSink::new(AudioSinkConfig {
        device_name: config_handle.current().output_device.clone(),
    }) {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            log::error!("fatal: audio output device unusable at startup: {e}");
            std::process::exit(1);
        }
    };

    let vad: Box<dyn lva_core::session::VadDetector> = match SileroVad::new() {
        Ok(v) => Box::new(v),
        Err(e) => {
            log::warn!("Silero VAD unavailable ({e}), ENGAGED sessions will rely on manual cancel only");
            Box::new(NullVad)
        }
    };
    let session_mgr = SessionManager::new(
        hub_commands_tx.clone(),
        sink,
        vad,
        config_handle.current().sound_path_thinking.clone(),
    );

    let (wakeword_blocks_tx, wakeword_blocks_rx) = std::sync::mpsc::channel::<Vec<f32>>();
    let wakeword_events_tx = events_tx.clone();
    let wakeword_config_rx = config_rx.clone();
    let models_dir = config_handle.current().wakeword_models_dir.clone();
    if let Err(e) = std::thread::Builder::new()
        .name("lva-wakeword".into())
        .spawn(move || {
            let producer: Box<dyn lva_core::wakeword::ScoreProducer> = if models_dir.is_dir() {
                Box::new(TfliteScoreProducer::load_from_dir(&models_dir))
            } else {
                log::warn!("wakeword models dir {} not found, wake-word detection disabled", models_dir.display());
                Box::new(NullScoreProducer)
            };
            let mut scorer = WakewordScorer::new(producer);
            while let Ok(block) = wakeword_blocks_rx.recv() {
                let config = wakeword_config_rx.borrow().clone();
                if !config.wake_word_detection {
                    continue;
                }
                for detection in scorer.process_block(&block, &config) {
                    let event = Event::Trigger(lva_core::state_machine::TriggerSource::WakeWord {
                        model_id: detection.model_id,
                        score: detection.score,
                    });
                    if wakeword_events_tx.blocking_send(event).is_err() {
                        return;
                    }
                }
            }
        })
    {
        log::error!("fatal: could not spawn wakeword inference thread: {e}");
        std::process::exit(1);
    }

    let machine = Machine::new();
    let clock = SystemClock;

    let mut loop_state = EventLoop {
        machine,
        clock: Box::new(clock),
        config_handle,
        metrics,
        gpio,
        session: session_mgr.into(),
        vision_client,
        hub_commands_tx,
        distance_active_tx,
        preferences_path,
        events_tx: events_tx.clone(),
        vad_timer: None,
        cancel: cancel.clone(),
    };

    let mut poll = tokio::time::interval(Duration::from_millis(
        (lva_core::audio::BLOCK_SIZE as u64 * 1000) / lva_core::audio::SAMPLE_RATE as u64,
    ));

    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            log::error!("fatal: could not install SIGTERM handler: {e}");
            std::process::exit(1);
        }
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("received SIGINT, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                log::info!("received SIGTERM, shutting down");
                break;
            }
            _ = poll.tick() => {
                if let Some(block) = capture.current_block() {
                    let _ = wakeword_blocks_tx.send(block.samples.clone());
                    if let Some(vad_event) = loop_state.feed_session_audio(&block.samples).await {
                        loop_state.drain_and_apply(vec![vad_event]).await;
                    }
                } else if capture.xrun_counter() > 0 {
                    // Gap already counted inside `CpalAudioCapture`; nothing
                    // further to do here.
                }
            }
            Some(event) = events_rx.recv() => {
                let mut batch = vec![event];
                while let Ok(more) = events_rx.try_recv() {
                    batch.push(more);
                }
                loop_state.drain_and_apply(batch).await;
            }
            Some(output) = distance_rx.recv() => {
                loop_state.handle_distance_output(output).await;
            }
            Some(voice_event) = voice_events_rx.recv() => {
                loop_state.handle_voice_event(voice_event).await;
            }
        }
    }

    cancel.cancel();
    loop_state.session_mut().cancel().await;
    capture.stop();
    let _ = sockets::remove_socket_file(&sockets::control_sock(&ipc_dir));
    let _ = sockets::remove_socket_file(&sockets::gpio_events_sock(&ipc_dir));
    log::info!("lva-core shut down cleanly");
    Ok(())
}

/// Everything the single-threaded event loop needs to turn `Effect`s into
/// action. Kept as one struct so `main`'s `tokio::select!` arms stay short;
/// the reducer itself (`Machine::handle`) remains the pure, testable core.
struct EventLoop {
    machine: Machine,
    clock: Box<dyn Clock>,
    config_handle: ConfigHandle,
    metrics: Arc<Metrics>,
    gpio: lva_core::control_socket::GpioEventsHandle,
    session: SessionCell,
    vision_client: VisionClient,
    hub_commands_tx: mpsc::Sender<HubCommand>,
    distance_active_tx: watch::Sender<bool>,
    preferences_path: PathBuf,
    events_tx: mpsc::Sender<Event>,
    vad_timer: Option<CancellationToken>,
    cancel: CancellationToken,
}

/// `SessionManager` isn't `Sync`/trivially shareable across the few call
/// sites that need `&mut`; this thin wrapper just keeps ownership obvious
/// since only `EventLoop` ever touches it.
struct SessionCell(SessionManager);

impl From<SessionManager> for SessionCell {
    fn from(m: SessionManager) -> Self {
        SessionCell(m)
    }
}

impl EventLoop {
    fn session_mut(&mut self) -> &mut SessionManager {
        &mut self.session.0
    }

    async fn feed_session_audio(&mut self, block: &[f32]) -> Option<Event> {
        self.session_mut().feed_audio_block(block).await
    }

    async fn drain_and_apply(&mut self, mut batch: Vec<Event>) {
        lva_core::state_machine::sort_batch(&mut batch);
        for event in batch {
            let is_config_mutation = matches!(event, Event::ConfigMutated);
            let config = self.config_handle.current();
            let effects = self.machine.handle(event, self.clock.as_ref(), &config);
            self.update_active_signal();
            for effect in effects {
                self.apply_effect(effect).await;
            }
            if is_config_mutation {
                self.save_preferences();
            }
        }
    }

    /// Persists the small preferences subset of the config snapshot: every
    /// `ConfigMutated` event means a hub entity write just landed, so this is
    /// the one place that needs to call back into `Preferences`.
    fn save_preferences(&self) {
        let prefs = Preferences::from(self.config_handle.current().as_ref());
        if let Err(e) = prefs.save_atomic(&self.preferences_path) {
            log::warn!("failed to save preferences to {}: {e}", self.preferences_path.display());
        }
    }

    fn update_active_signal(&self) {
        let active = matches!(
            self.machine.state(),
            SessionState::ProxVerify | SessionState::Engaged
        );
        let _ = self.distance_active_tx.send(active);
    }

    async fn apply_effect(&mut self, effect: Effect) {
        match effect {
            Effect::StartSession { use_vad } => self.session_mut().start(use_vad).await,
            Effect::CancelSession => self.session_mut().cancel().await,
            Effect::SendVisionRequest { request_id } => {
                self.metrics.incr_vision_requests();
                self.vision_client.request(request_id);
            }
            Effect::ArmTimer { kind, after } => self.arm_timer(kind, after),
            Effect::CancelTimer(kind) => self.cancel_timer(kind),
            Effect::PublishState { state, muted } => self.gpio.publish_state(state, muted).await,
            Effect::StartThinkingSound => self.session_mut().start_thinking_sound(),
            Effect::PlayThinkingSoundStop => self.session_mut().stop_thinking_sound(),
            Effect::RecordVisionRequest => {}
            Effect::RecordVisionSuccess => self.metrics.incr_vision_success(),
            Effect::RecordVisionTimeout => self.metrics.incr_vision_timeout(),
            Effect::RecordFalseTriggerPrevented => self.metrics.incr_false_triggers_prevented(),
            Effect::SetLastAttentionState(state) => {
                self.publish_entity(lva_ipc::Entity::sensor_text(
                    lva_ipc::entity::keys::LAST_ATTENTION_STATE,
                    state,
                ));
            }
            Effect::SetLastVisionLatencyMs(ms) => {
                self.publish_entity(lva_ipc::Entity::sensor_number(
                    lva_ipc::entity::keys::LAST_VISION_LATENCY_MS,
                    ms as f64,
                    Some("ms"),
                ));
            }
            Effect::SetLastVisionError(err) => {
                let value = err.unwrap_or_else(|| "none".to_string());
                self.publish_entity(lva_ipc::Entity::sensor_text(
                    lva_ipc::entity::keys::LAST_VISION_ERROR,
                    value,
                ));
            }
        }
    }

    fn publish_entity(&self, entity: lva_ipc::Entity) {
        let tx = self.hub_commands_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(HubCommand::PublishEntityState(entity)).await;
        });
    }

    /// `VisionTimeout` is informational here: the vision client enforces its
    /// own 1.2s request timeout independently and the reducer already
    /// discards stale replies by request id, so arming/cancelling this timer
    /// has no further side effect beyond what `SendVisionRequest` already
    /// started. The `VadWindow` timer is the one this loop actually owns and
    /// must fire correctly.
    fn arm_timer(&mut self, kind: TimerKind, after: Duration) {
        match kind {
            TimerKind::VisionTimeout => {}
            TimerKind::VadWindow => {
                let token = CancellationToken::new();
                self.vad_timer = Some(token.clone());
                let events_tx = self.events_tx.clone();
                let shutdown = self.cancel.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = tokio::time::sleep(after) => {
                            let _ = events_tx.send(Event::VadWindowElapsed).await;
                        }
                        _ = token.cancelled() => {}
                        _ = shutdown.cancelled() => {}
                    }
                });
            }
        }
    }

    fn cancel_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::VisionTimeout => {}
            TimerKind::VadWindow => {
                if let Some(token) = self.vad_timer.take() {
                    token.cancel();
                }
            }
        }
    }

    async fn handle_distance_output(&mut self, output: DistanceOutput) {
        match output {
            DistanceOutput::Trigger(trigger) => {
                self.drain_and_apply(vec![Event::Trigger(trigger)]).await;
            }
            DistanceOutput::SensorValue(mm) => {
                let value = mm.map(|v| v as f64).unwrap_or(0.0);
                self.publish_entity(lva_ipc::Entity::sensor_number(
                    lva_ipc::entity::keys::DISTANCE,
                    value,
                    Some("mm"),
                ));
            }
        }
    }

    async fn handle_voice_event(&mut self, event: HubVoiceEvent) {
        match event {
            HubVoiceEvent::Phase(phase) => {
                let mapped = match phase.as_str() {
                    "processing" | "stt_end" => Some(Event::SessionEnteredProcessing),
                    "speaking" | "tts_start" => Some(Event::SessionEnteredSpeaking),
                    "done" | "finished" => Some(Event::PlaybackComplete),
                    _ => None,
                };
                if let Some(event) = mapped {
                    self.drain_and_apply(vec![event]).await;
                }
            }
            HubVoiceEvent::AudioOut(pcm) => {
                self.session_mut().play_chunk(&pcm);
            }
        }
    }
}
