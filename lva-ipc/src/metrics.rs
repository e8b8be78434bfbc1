use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters shared across the pipeline. Plain `AtomicU64` fields
/// rather than a remote exporter: in-process counting only, no exporter.
#[derive(Debug, Default)]
pub struct Metrics {
    pub vision_requests: AtomicU64,
    pub vision_success: AtomicU64,
    pub vision_timeout: AtomicU64,
    pub false_triggers_prevented: AtomicU64,
    pub xrun_counter: AtomicU64,
    pub oversize_frames_dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub vision_requests: u64,
    pub vision_success: u64,
    pub vision_timeout: u64,
    pub false_triggers_prevented: u64,
    pub xrun_counter: u64,
    pub oversize_frames_dropped: u64,
}

impl Metrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            vision_requests: self.vision_requests.load(Ordering::Relaxed),
            vision_success: self.vision_success.load(Ordering::Relaxed),
            vision_timeout: self.vision_timeout.load(Ordering::Relaxed),
            false_triggers_prevented: self.false_triggers_prevented.load(Ordering::Relaxed),
            xrun_counter: self.xrun_counter.load(Ordering::Relaxed),
            oversize_frames_dropped: self.oversize_frames_dropped.load(Ordering::Relaxed),
        }
    }

    pub fn incr_vision_requests(&self) {
        self.vision_requests.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_vision_success(&self) {
        self.vision_success.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_vision_timeout(&self) {
        self.vision_timeout.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_false_triggers_prevented(&self) {
        self.false_triggers_prevented.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_xrun(&self) {
        self.xrun_counter.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_oversize_frames_dropped(&self) {
        self.oversize_frames_dropped.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let m = Metrics::default();
        m.incr_vision_requests();
        m.incr_vision_requests();
        m.incr_false_triggers_prevented();
        let s = m.snapshot();
        assert_eq!(s.vision_requests, 2);
        assert_eq!(s.false_triggers_prevented, 1);
        assert_eq!(s.vision_success, 0);
    }
}
