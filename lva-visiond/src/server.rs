use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

use lva_ipc::{envelope, sockets, Envelope, Metrics, Source};

use crate::camera::Camera;
use crate::detector::{FaceOrientationDetector, Verdict};

const BURST_DURATION: Duration = Duration::from_millis(900);

#[derive(Debug, Deserialize)]
struct GlanceRequestBody {
    request_id: u64,
}

#[derive(Debug, Serialize)]
struct GlanceResultBody {
    request_id: u64,
    verdict: &'static str,
    confidence: Option<f32>,
    latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'static str>,
}

/// Accepts connections on `visd.sock` and answers `VISION_GLANCE_REQUEST`s
/// one at a time. A second request
/// arriving while the first is still running gets `Error{busy}` immediately
/// rather than queuing, since a glance that started on stale conditions is
/// worthless by the time it would run.
pub struct VisionServer {
    listener: UnixListener,
    metrics: Arc<Metrics>,
    busy: Arc<AtomicBool>,
}

impl VisionServer {
    pub fn bind(ipc_dir: &Path, metrics: Arc<Metrics>) -> std::io::Result<Self> {
        let path = sockets::visd_sock(ipc_dir);
        sockets::remove_socket_file(&path)?;
        let listener = UnixListener::bind(&path)?;
        log::info!("vision daemon listening at {}", path.display());
        Ok(Self {
            listener,
            metrics,
            busy: Arc::new(AtomicBool::new(false)),
        })
    }

    pub async fn run(
        self,
        cancel: CancellationToken,
        camera: Arc<tokio::sync::Mutex<Box<dyn Camera>>>,
        detector: Arc<tokio::sync::Mutex<Box<dyn FaceOrientationDetector>>>,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let metrics = self.metrics.clone();
                            let busy = self.busy.clone();
                            let camera = camera.clone();
                            let detector = detector.clone();
                            let cancel = cancel.clone();
                            tokio::spawn(async move {
                                handle_connection(stream, metrics, busy, camera, detector, cancel).await;
                            });
                        }
                        Err(e) => log::warn!("visd accept failed: {e}"),
                    }
                }
            }
        }
    }
}

async fn handle_connection(
    stream: UnixStream,
    metrics: Arc<Metrics>,
    busy: Arc<AtomicBool>,
    camera: Arc<tokio::sync::Mutex<Box<dyn Camera>>>,
    detector: Arc<tokio::sync::Mutex<Box<dyn FaceOrientationDetector>>>,
    cancel: CancellationToken,
) {
    let (mut reader, writer) = lva_ipc::split(stream);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            envelope = reader.next_envelope(&metrics) => {
                match envelope {
                    Ok(Some(env)) if env.type_ == envelope::message_type::VISION_GLANCE_REQUEST => {
                        let body: GlanceRequestBody = match serde_json::from_value(env.payload) {
                            Ok(b) => b,
                            Err(e) => {
                                log::warn!("malformed VISION_GLANCE_REQUEST: {e}");
                                continue;
                            }
                        };
                        let result = service_request(body.request_id, &busy, &camera, &detector).await;
                        let reply = Envelope::new(
                            envelope::message_type::VISION_GLANCE_RESULT,
                            serde_json::to_value(&result).expect("GlanceResultBody always serializes"),
                            Source::Visd,
                        );
                        if writer.send(reply).await.is_err() {
                            return;
                        }
                    }
                    Ok(Some(_other)) => {}
                    Ok(None) => return,
                    Err(e) => {
                        log::warn!("visd connection error: {e}");
                        return;
                    }
                }
            }
        }
    }
}

async fn service_request(
    request_id: u64,
    busy: &Arc<AtomicBool>,
    camera: &Arc<tokio::sync::Mutex<Box<dyn Camera>>>,
    detector: &Arc<tokio::sync::Mutex<Box<dyn FaceOrientationDetector>>>,
) -> GlanceResultBody {
    if busy.swap(true, Ordering::SeqCst) {
        return GlanceResultBody {
            request_id,
            verdict: "error",
            confidence: None,
            latency_ms: 0,
            error: Some("busy"),
        };
    }

    let start = Instant::now();
    let result = run_glance(camera, detector).await;
    busy.store(false, Ordering::SeqCst);
    let latency_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(Verdict::FaceToward { confidence }) => GlanceResultBody {
            request_id,
            verdict: "face_toward",
            confidence: Some(confidence),
            latency_ms,
            error: None,
        },
        Ok(Verdict::FaceAway) => GlanceResultBody {
            request_id,
            verdict: "face_away",
            confidence: None,
            latency_ms,
            error: None,
        },
        Ok(Verdict::NoFace) => GlanceResultBody {
            request_id,
            verdict: "no_face",
            confidence: None,
            latency_ms,
            error: None,
        },
        Err(_) => GlanceResultBody {
            request_id,
            verdict: "error",
            confidence: None,
            latency_ms,
            error: Some("camera"),
        },
    }
}

/// Opens the camera, captures one burst, infers, and closes the camera again
/// regardless of outcome.
async fn run_glance(
    camera: &Arc<tokio::sync::Mutex<Box<dyn Camera>>>,
    detector: &Arc<tokio::sync::Mutex<Box<dyn FaceOrientationDetector>>>,
) -> std::result::Result<Verdict, String> {
    let mut cam = camera.lock().await;
    cam.open()?;
    let frames = cam.capture_burst(BURST_DURATION);
    cam.close();
    let frames = frames?;

    let mut detector = detector.lock().await;
    Ok(detector.infer(&frames))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Frame, NullCamera};
    use crate::detector::HeuristicDetector;

    #[tokio::test]
    async fn busy_flag_rejects_concurrent_requests() {
        let busy = Arc::new(AtomicBool::new(true));
        let camera: Arc<tokio::sync::Mutex<Box<dyn Camera>>> =
            Arc::new(tokio::sync::Mutex::new(Box::new(NullCamera::default())));
        let detector: Arc<tokio::sync::Mutex<Box<dyn FaceOrientationDetector>>> =
            Arc::new(tokio::sync::Mutex::new(Box::new(HeuristicDetector)));

        let result = service_request(1, &busy, &camera, &detector).await;
        assert_eq!(result.error, Some("busy"));
    }

    #[tokio::test]
    async fn camera_open_failure_reports_camera_error() {
        let busy = Arc::new(AtomicBool::new(false));
        let camera: Arc<tokio::sync::Mutex<Box<dyn Camera>>> =
            Arc::new(tokio::sync::Mutex::new(Box::new(NullCamera::default())));
        let detector: Arc<tokio::sync::Mutex<Box<dyn FaceOrientationDetector>>> =
            Arc::new(tokio::sync::Mutex::new(Box::new(HeuristicDetector)));

        let result = service_request(7, &busy, &camera, &detector).await;
        assert_eq!(result.verdict, "error");
        assert_eq!(result.error, Some("camera"));
        assert!(!busy.load(Ordering::SeqCst));
    }

    #[test]
    fn frame_struct_is_constructible() {
        let _f = Frame { width: 320, height: 240, data: vec![0; 4] };
    }
}
