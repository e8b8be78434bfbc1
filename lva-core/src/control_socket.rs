use std::path::Path;
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use lva_ipc::{envelope, sockets, Envelope, EnvelopeWriter, Metrics, Source};

use crate::state_machine::{Event, ManualReason, SessionState, TriggerSource};

/// Accepts connections on `control.sock`: front-panel daemon
/// commands, external clients, and legacy `{cmd}`/`{event}` shapes all land
/// here and are translated into `Event`s on the shared queue.
pub struct ControlSocketServer {
    listener: UnixListener,
    events_tx: mpsc::Sender<Event>,
    metrics: Arc<Metrics>,
}

impl ControlSocketServer {
    pub async fn bind(ipc_dir: &Path, events_tx: mpsc::Sender<Event>, metrics: Arc<Metrics>) -> std::io::Result<Self> {
        let path = sockets::control_sock(ipc_dir);
        sockets::remove_socket_file(&path)?;
        let listener = UnixListener::bind(&path)?;
        log::info!("control socket listening at {}", path.display());
        Ok(Self {
            listener,
            events_tx,
            metrics,
        })
    }

    pub async fn run(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let events_tx = self.events_tx.clone();
                            let metrics = self.metrics.clone();
                            let cancel = cancel.clone();
                            tokio::spawn(async move {
                                handle_connection(stream, events_tx, metrics, cancel).await;
                            });
                        }
                        Err(e) => log::warn!("control socket accept failed: {e}"),
                    }
                }
            }
        }
    }
}

async fn handle_connection(
    stream: UnixStream,
    events_tx: mpsc::Sender<Event>,
    metrics: Arc<Metrics>,
    cancel: CancellationToken,
) {
    let (mut reader, _writer) = lva_ipc::split(stream);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            envelope = reader.next_envelope(&metrics) => {
                match envelope {
                    Ok(Some(env)) => dispatch(env, &events_tx).await,
                    Ok(None) => return,
                    Err(e) => {
                        log::warn!("control socket connection error: {e}");
                        return;
                    }
                }
            }
        }
    }
}

async fn dispatch(env: Envelope, events_tx: &mpsc::Sender<Event>) {
    let event = match env.type_.as_str() {
        envelope::message_type::MANUAL_WAKE => {
            Some(Event::Trigger(TriggerSource::Manual { reason: ManualReason::Wake }))
        }
        envelope::message_type::CANCEL => {
            Some(Event::Trigger(TriggerSource::Manual { reason: ManualReason::Cancel }))
        }
        envelope::message_type::MUTE_TOGGLE => Some(Event::MuteToggle),
        other => {
            log::debug!("control socket ignoring unhandled message type `{other}`");
            None
        }
    };

    if let Some(event) = event {
        let _ = events_tx.send(event).await;
    }
}

/// Publishes state transitions and LED hints on `gpio-events.sock`: the
/// gate is the only writer, any number of daemons/tools can subscribe by
/// connecting and reading.
pub struct GpioEventsPublisher {
    listener: UnixListener,
    writers: Arc<Mutex<Vec<EnvelopeWriter>>>,
}

impl GpioEventsPublisher {
    pub fn bind(ipc_dir: &Path) -> std::io::Result<Self> {
        let path = sockets::gpio_events_sock(ipc_dir);
        sockets::remove_socket_file(&path)?;
        let listener = UnixListener::bind(&path)?;
        log::info!("gpio-events socket listening at {}", path.display());
        Ok(Self {
            listener,
            writers: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub async fn run(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let (_reader, writer) = lva_ipc::split(stream);
                            self.writers.lock().await.push(writer);
                        }
                        Err(e) => log::warn!("gpio-events accept failed: {e}"),
                    }
                }
            }
        }
    }

    pub fn handle(&self) -> GpioEventsHandle {
        GpioEventsHandle {
            writers: self.writers.clone(),
        }
    }
}

#[derive(Clone)]
pub struct GpioEventsHandle {
    writers: Arc<Mutex<Vec<EnvelopeWriter>>>,
}

impl GpioEventsHandle {
    pub async fn publish_state(&self, state: SessionState, muted: bool) {
        let envelope = Envelope::new(
            envelope::message_type::STATE_CHANGED,
            serde_json::json!({ "state": state.as_str(), "muted": muted }),
            Source::Core,
        );
        self.broadcast(envelope).await;
    }

    pub async fn publish_led(&self, pattern: &str) {
        let envelope = Envelope::new(
            envelope::message_type::LED_STATE,
            serde_json::json!({ "pattern": pattern }),
            Source::Core,
        );
        self.broadcast(envelope).await;
    }

    async fn broadcast(&self, envelope: Envelope) {
        let mut writers = self.writers.lock().await;
        let mut dead = Vec::new();
        for (i, writer) in writers.iter().enumerate() {
            if writer.send(envelope.clone()).await.is_err() {
                dead.push(i);
            }
        }
        for i in dead.into_iter().rev() {
            writers.remove(i);
        }
    }
}
