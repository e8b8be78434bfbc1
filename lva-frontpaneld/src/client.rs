use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::UnixStream;

use lva_ipc::{envelope, Envelope, EnvelopeWriter, Source};

use crate::translate::LogicalCommand;

const BACKOFF_START: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(5);

fn message_type_for(command: LogicalCommand) -> &'static str {
    match command {
        LogicalCommand::MuteToggle => envelope::message_type::MUTE_TOGGLE,
        LogicalCommand::VolumeUp => envelope::message_type::VOLUME_UP,
        LogicalCommand::VolumeDown => envelope::message_type::VOLUME_DOWN,
        LogicalCommand::ManualWake => envelope::message_type::MANUAL_WAKE,
    }
}

/// Owns the connection to the core's `control.sock` and reconnects with
/// backoff if the core restarts out from under it. Every write queues
/// through `EnvelopeWriter`'s own per-connection channel, so `send`
/// never blocks this daemon's poll loop for long.
pub struct ControlSocketClient {
    socket_path: PathBuf,
    writer: Option<EnvelopeWriter>,
}

impl ControlSocketClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            writer: None,
        }
    }

    pub async fn send(&mut self, command: LogicalCommand) {
        if self.writer.is_none() {
            self.reconnect().await;
        }
        let Some(writer) = &self.writer else { return };

        let envelope = Envelope::new(message_type_for(command), default_payload(), Source::Frontpaneld);
        if writer.send(envelope).await.is_err() {
            log::warn!("control socket write failed, will reconnect");
            self.writer = None;
        }
    }

    async fn reconnect(&mut self) {
        let mut backoff = BACKOFF_START;
        loop {
            match UnixStream::connect(&self.socket_path).await {
                Ok(stream) => {
                    let (_reader, writer) = lva_ipc::split(stream);
                    self.writer = Some(writer);
                    return;
                }
                Err(e) => {
                    log::warn!(
                        "could not connect to control socket at {}: {e}, retrying in {:?}",
                        self.socket_path.display(),
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(BACKOFF_CAP);
                }
            }
        }
    }
}

fn default_payload() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

pub fn socket_path(ipc_dir: &Path) -> PathBuf {
    lva_ipc::sockets::control_sock(ipc_dir)
}
