use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

use lva_ipc::{envelope, Envelope, Metrics, Source};

use crate::state_machine::{AttentionVerdict, Event};

const REQUEST_TIMEOUT: Duration = Duration::from_millis(1200);
const BACKOFF_START: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize)]
struct GlanceRequestBody {
    request_id: u64,
}

/// Distinguishes "couldn't get a reply in time" from "couldn't reach visd at
/// all", which the state machine surfaces as different `AttentionVerdict`s.
enum RequestFailure {
    Unreachable(String),
    TimedOut,
}

#[derive(Debug, Clone, Deserialize)]
struct GlanceResultBody {
    request_id: u64,
    verdict: String,
    confidence: Option<f32>,
    #[allow(dead_code)]
    latency_ms: Option<u64>,
    error: Option<String>,
}

/// Sends `VISION_GLANCE_REQUEST`s to `visd.sock` and resolves them into
/// `Event::VisionReply`s for the state machine's queue. Only one request is
/// ever outstanding, enforced by the caller never issuing a second `request`
/// before the first resolves.
pub struct VisionClient {
    socket_path: std::path::PathBuf,
    events_tx: mpsc::Sender<Event>,
}

impl VisionClient {
    pub fn new(socket_path: std::path::PathBuf, events_tx: mpsc::Sender<Event>) -> Self {
        Self {
            socket_path,
            events_tx,
        }
    }

    /// Fires the request in the background; the result (success, timeout, or
    /// connection failure) is delivered as an `Event::VisionReply` /
    /// `Event::VisionRequestTimedOut` on the shared queue, so the caller
    /// never blocks on this call.
    pub fn request(&self, request_id: u64) {
        let socket_path = self.socket_path.clone();
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            match Self::send_and_await(&socket_path, request_id).await {
                Ok(verdict) => {
                    let _ = events_tx
                        .send(Event::VisionReply { request_id, verdict })
                        .await;
                }
                Err(RequestFailure::Unreachable(e)) => {
                    log::warn!("vision glance request {request_id} failed: {e}");
                    let _ = events_tx
                        .send(Event::VisionReply {
                            request_id,
                            verdict: AttentionVerdict::Error {
                                message: "unreachable".to_string(),
                            },
                        })
                        .await;
                }
                Err(RequestFailure::TimedOut) => {
                    let _ = events_tx
                        .send(Event::VisionRequestTimedOut { request_id })
                        .await;
                }
            }
        });
    }

    /// Connecting (with its own bounded backoff) is not counted against
    /// `REQUEST_TIMEOUT`: only the wait for `VISION_GLANCE_RESULT` after the
    /// request is actually sent is timed, so a visd that never answers a
    /// live connection surfaces distinctly (`Error{timeout}`) from one that
    /// can't be reached at all (`Error{unreachable}`) even though the
    /// backoff's own worst case (0.5s+1s+2s) is wider than the 1.2s reply
    /// window.
    async fn send_and_await(
        socket_path: &std::path::Path,
        request_id: u64,
    ) -> Result<AttentionVerdict, RequestFailure> {
        let stream = Self::connect_with_backoff(socket_path)
            .await
            .map_err(RequestFailure::Unreachable)?;
        let (mut reader, writer) = lva_ipc::split(stream);
        let metrics = Metrics::default();

        let request = Envelope::new(
            envelope::message_type::VISION_GLANCE_REQUEST,
            serde_json::to_value(GlanceRequestBody { request_id })
                .map_err(|e| RequestFailure::Unreachable(e.to_string()))?,
            Source::Core,
        );
        writer
            .send(request)
            .await
            .map_err(|e| RequestFailure::Unreachable(e.to_string()))?;

        match timeout(REQUEST_TIMEOUT, Self::await_result(&mut reader, &metrics, request_id)).await {
            Ok(result) => result,
            Err(_) => Err(RequestFailure::TimedOut),
        }
    }

    async fn await_result(
        reader: &mut lva_ipc::EnvelopeReader,
        metrics: &Metrics,
        request_id: u64,
    ) -> Result<AttentionVerdict, RequestFailure> {
        loop {
            let envelope = reader
                .next_envelope(metrics)
                .await
                .map_err(|e| RequestFailure::Unreachable(e.to_string()))?
                .ok_or_else(|| RequestFailure::Unreachable("visd closed the connection".to_string()))?;

            if envelope.type_ != envelope::message_type::VISION_GLANCE_RESULT {
                continue;
            }

            let body: GlanceResultBody = serde_json::from_value(envelope.payload)
                .map_err(|e| RequestFailure::Unreachable(e.to_string()))?;
            if body.request_id != request_id {
                continue;
            }

            return Ok(parse_verdict(&body));
        }
    }

    async fn connect_with_backoff(socket_path: &std::path::Path) -> Result<UnixStream, String> {
        let mut backoff = BACKOFF_START;
        let mut last_err = String::new();
        for _ in 0..3 {
            match UnixStream::connect(socket_path).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    last_err = e.to_string();
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(BACKOFF_CAP);
                }
            }
        }
        Err(format!("could not connect to visd at {}: {last_err}", socket_path.display()))
    }
}

fn parse_verdict(body: &GlanceResultBody) -> AttentionVerdict {
    if let Some(message) = &body.error {
        return AttentionVerdict::Error {
            message: message.clone(),
        };
    }
    match body.verdict.as_str() {
        "face_toward" => AttentionVerdict::FaceToward {
            confidence: body.confidence.unwrap_or(0.0),
        },
        "face_away" => AttentionVerdict::FaceAway,
        "no_face" => AttentionVerdict::NoFace,
        other => AttentionVerdict::Error {
            message: format!("unrecognized verdict `{other}`"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_verdict_prefers_explicit_error_field() {
        let body = GlanceResultBody {
            request_id: 1,
            verdict: "face_toward".to_string(),
            confidence: Some(0.9),
            latency_ms: Some(100),
            error: Some("busy".to_string()),
        };
        assert_eq!(parse_verdict(&body), AttentionVerdict::Error { message: "busy".to_string() });
    }

    #[test]
    fn parse_verdict_maps_known_labels() {
        let body = GlanceResultBody {
            request_id: 1,
            verdict: "no_face".to_string(),
            confidence: None,
            latency_ms: None,
            error: None,
        };
        assert_eq!(parse_verdict(&body), AttentionVerdict::NoFace);
    }
}
