use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::mpsc;

use crate::envelope::Envelope;
use crate::error::{IpcError, Result};
use crate::metrics::Metrics;

/// Reads newline-delimited JSON envelopes off one half of a UNIX stream.
/// Oversize or malformed frames are dropped and counted rather than killing
/// the connection.7 / the Protocol error-kind policy.
pub struct EnvelopeReader {
    lines: tokio::io::Lines<BufReader<OwnedReadHalf>>,
}

impl EnvelopeReader {
    pub fn new(read_half: OwnedReadHalf) -> Self {
        Self {
            lines: BufReader::new(read_half).lines(),
        }
    }

    /// Returns the next well-formed envelope, silently skipping malformed or
    /// oversize frames (each counted in `metrics`). Returns `None` on EOF.
    pub async fn next_envelope(&mut self, metrics: &Metrics) -> Result<Option<Envelope>> {
        loop {
            let line = match self.lines.next_line().await? {
                Some(l) => l,
                None => return Ok(None),
            };
            if line.trim().is_empty() {
                continue;
            }
            match Envelope::parse_line(&line) {
                Ok(env) => return Ok(Some(env)),
                Err(IpcError::OversizeFrame { limit, actual }) => {
                    metrics.incr_oversize_frames_dropped();
                    log::warn!("dropped oversize frame: {actual} bytes (limit {limit})");
                }
                Err(e) => {
                    log::warn!("dropped malformed frame: {e}");
                }
            }
        }
    }
}

/// A per-connection write queue: callers hand envelopes to a bounded channel
/// and a background task serializes writes onto the socket, so a slow peer
/// backpressures the channel instead of blocking the caller's event loop.
#[derive(Clone)]
pub struct EnvelopeWriter {
    tx: mpsc::Sender<Envelope>,
}

impl EnvelopeWriter {
    pub fn spawn(write_half: OwnedWriteHalf) -> Self {
        let (tx, mut rx) = mpsc::channel::<Envelope>(64);
        tokio::spawn(async move {
            let mut writer = write_half;
            while let Some(env) = rx.recv().await {
                let line = match env.to_line() {
                    Ok(l) => l,
                    Err(e) => {
                        log::warn!("failed to encode outbound envelope: {e}");
                        continue;
                    }
                };
                if let Err(e) = writer.write_all(line.as_bytes()).await {
                    log::warn!("write queue closing after I/O error: {e}");
                    break;
                }
            }
        });
        Self { tx }
    }

    pub async fn send(&self, env: Envelope) -> Result<()> {
        self.tx.send(env).await.map_err(|_| IpcError::Closed)
    }
}

/// Splits an accepted/connected stream into a reader and a spawned write queue.
pub fn split(stream: UnixStream) -> (EnvelopeReader, EnvelopeWriter) {
    let (read_half, write_half) = stream.into_split();
    (
        EnvelopeReader::new(read_half),
        EnvelopeWriter::spawn(write_half),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{message_type, Source};
    use tempfile::tempdir;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn round_trips_an_envelope_over_a_real_socket() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let client = UnixStream::connect(&path).await.unwrap();
        let (server_stream, _) = listener.accept().await.unwrap();

        let (_server_reader, server_writer) = split(server_stream);
        let (mut client_reader, _client_writer) = split(client);

        let metrics = Metrics::default();
        server_writer
            .send(Envelope::new(
                message_type::MANUAL_WAKE,
                serde_json::json!({}),
                Source::Frontpaneld,
            ))
            .await
            .unwrap();

        let env = client_reader
            .next_envelope(&metrics)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(env.type_, message_type::MANUAL_WAKE);
    }

    #[tokio::test]
    async fn malformed_line_is_skipped_not_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test2.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let mut client = UnixStream::connect(&path).await.unwrap();
        let (server_stream, _) = listener.accept().await.unwrap();
        let (mut server_reader, _w) = split(server_stream);

        use tokio::io::AsyncWriteExt;
        client.write_all(b"not json\n").await.unwrap();
        client
            .write_all(br#"{"type":"CANCEL","payload":{},"ts":0,"source":"core"}"#)
            .await
            .unwrap();
        client.write_all(b"\n").await.unwrap();

        let metrics = Metrics::default();
        let env = server_reader
            .next_envelope(&metrics)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(env.type_, "CANCEL");
    }
}
