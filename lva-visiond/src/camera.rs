use std::time::Duration;

/// A single captured frame, opaque to everything but the orientation
/// detector. Kept as raw bytes plus dimensions rather than an image crate
/// type, since no concrete camera driver is in scope.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// The camera hardware is an out-of-scope collaborator; everything in
/// this daemon talks to this trait, so a `NullCamera` can back the whole
/// request/reply cycle in environments with no camera present.
pub trait Camera: Send {
    fn open(&mut self) -> Result<(), String>;
    /// Captures frames for roughly `duration` (0.7-1.2s.9); returns
    /// whatever frames were captured, or an error if the device vanished
    /// mid-burst.
    fn capture_burst(&mut self, duration: Duration) -> Result<Vec<Frame>, String>;
    fn close(&mut self);
}

/// Always fails to open: backs the daemon when no camera is present, so
/// every request resolves to `Error{camera}` and the state machine's
/// fallback path runs end-to-end without real hardware.
#[derive(Default)]
pub struct NullCamera {
    opened: bool,
}

impl Camera for NullCamera {
    fn open(&mut self) -> Result<(), String> {
        Err("no camera configured".to_string())
    }

    fn capture_burst(&mut self, _duration: Duration) -> Result<Vec<Frame>, String> {
        Err("camera not open".to_string())
    }

    fn close(&mut self) {
        self.opened = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_camera_never_opens() {
        let mut cam = NullCamera::default();
        assert!(cam.open().is_err());
    }
}
