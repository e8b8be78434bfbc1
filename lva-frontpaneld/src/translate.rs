use std::time::{Duration, Instant};

use crate::panel_input::RawPanelEvent;

/// Debounce window: raw events of the same kind arriving closer
/// together than this are collapsed into one.
pub const DEBOUNCE: Duration = Duration::from_millis(50);

/// A touch held at least this long is a long-press (mute toggle) instead of a
/// tap (manual wake).
const LONG_PRESS: Duration = Duration::from_millis(600);

/// The logical commands this daemon ever emits, independent of how the wire
/// envelope spells them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalCommand {
    MuteToggle,
    VolumeUp,
    VolumeDown,
    ManualWake,
}

/// Turns raw hardware events into logical commands, debouncing bounce on the
/// touch contact and the encoder detent, and distinguishing a tap from a
/// long-press on the touch pad. Stateless across restarts — all state
/// here lives only for the life of one process and is never persisted.
pub struct Translator {
    last_touch_down: Option<Instant>,
    last_touch_event_at: Option<Instant>,
    last_encoder_event_at: Option<Instant>,
}

impl Default for Translator {
    fn default() -> Self {
        Self::new()
    }
}

impl Translator {
    pub fn new() -> Self {
        Self {
            last_touch_down: None,
            last_touch_event_at: None,
            last_encoder_event_at: None,
        }
    }

    /// Feeds one poll's worth of raw events through debounce and translation,
    /// in order, returning the logical commands to send.
    pub fn translate(&mut self, events: &[RawPanelEvent], now: Instant) -> Vec<LogicalCommand> {
        let mut out = Vec::new();
        for event in events {
            if let Some(cmd) = self.translate_one(*event, now) {
                out.push(cmd);
            }
        }
        out
    }

    fn translate_one(&mut self, event: RawPanelEvent, now: Instant) -> Option<LogicalCommand> {
        match event {
            RawPanelEvent::TouchDown => {
                if debounced(self.last_touch_event_at, now) {
                    return None;
                }
                self.last_touch_event_at = Some(now);
                self.last_touch_down = Some(now);
                None
            }
            RawPanelEvent::TouchUp => {
                if debounced(self.last_touch_event_at, now) {
                    return None;
                }
                self.last_touch_event_at = Some(now);
                let down_at = self.last_touch_down.take()?;
                let held = now.saturating_duration_since(down_at);
                Some(if held >= LONG_PRESS {
                    LogicalCommand::MuteToggle
                } else {
                    LogicalCommand::ManualWake
                })
            }
            RawPanelEvent::EncoderStep { clockwise } => {
                if debounced(self.last_encoder_event_at, now) {
                    return None;
                }
                self.last_encoder_event_at = Some(now);
                Some(if clockwise {
                    LogicalCommand::VolumeUp
                } else {
                    LogicalCommand::VolumeDown
                })
            }
        }
    }
}

fn debounced(last: Option<Instant>, now: Instant) -> bool {
    matches!(last, Some(t) if now.saturating_duration_since(t) < DEBOUNCE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_tap_is_manual_wake() {
        let mut t = Translator::new();
        let t0 = Instant::now();
        assert_eq!(t.translate(&[RawPanelEvent::TouchDown], t0), vec![]);
        let cmds = t.translate(&[RawPanelEvent::TouchUp], t0 + Duration::from_millis(200));
        assert_eq!(cmds, vec![LogicalCommand::ManualWake]);
    }

    #[test]
    fn long_press_is_mute_toggle() {
        let mut t = Translator::new();
        let t0 = Instant::now();
        t.translate(&[RawPanelEvent::TouchDown], t0);
        let cmds = t.translate(&[RawPanelEvent::TouchUp], t0 + Duration::from_millis(700));
        assert_eq!(cmds, vec![LogicalCommand::MuteToggle]);
    }

    #[test]
    fn bouncing_touch_down_is_collapsed() {
        let mut t = Translator::new();
        let t0 = Instant::now();
        t.translate(&[RawPanelEvent::TouchDown], t0);
        // A second TouchDown 5ms later (contact bounce) must not reset the
        // press-start time used for long-press detection.
        t.translate(&[RawPanelEvent::TouchDown], t0 + Duration::from_millis(5));
        let cmds = t.translate(&[RawPanelEvent::TouchUp], t0 + Duration::from_millis(200));
        assert_eq!(cmds, vec![LogicalCommand::ManualWake]);
    }

    #[test]
    fn encoder_steps_debounce_independently_of_touch() {
        let mut t = Translator::new();
        let t0 = Instant::now();
        let cmds = t.translate(&[RawPanelEvent::EncoderStep { clockwise: true }], t0);
        assert_eq!(cmds, vec![LogicalCommand::VolumeUp]);
        let cmds = t.translate(
            &[RawPanelEvent::EncoderStep { clockwise: false }],
            t0 + Duration::from_millis(10),
        );
        assert!(cmds.is_empty(), "within debounce window, should be dropped");
        let cmds = t.translate(
            &[RawPanelEvent::EncoderStep { clockwise: false }],
            t0 + Duration::from_millis(80),
        );
        assert_eq!(cmds, vec![LogicalCommand::VolumeDown]);
    }
}
