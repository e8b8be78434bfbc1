//! The activation state machine: a single serialized event-queue
//! reducer. `Machine::handle` is the pure transition function; callers own
//! the queue, the clock and applying the returned `Effect`s.

mod types;

pub use types::{
    sort_batch, AttentionVerdict, Effect, Event, ManualReason, SessionState, TimerKind,
    TriggerSource,
};

use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::config::Config;

pub const VISION_GLANCE_TIMEOUT: Duration = Duration::from_millis(1200);

/// The state machine's own mutable bookkeeping, separate from `SessionState`
/// itself: the MUTED overlay, the cooldown clock, and the id of any
/// in-flight vision request (at most one at a time).
pub struct Machine {
    state: SessionState,
    muted: bool,
    last_vision_decision: Option<Instant>,
    pending_vision_request: Option<u64>,
    next_request_id: u64,
}

impl Machine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            muted: false,
            last_vision_decision: None,
            pending_vision_request: None,
            next_request_id: 1,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn muted(&self) -> bool {
        self.muted
    }

    fn cooldown_active(&self, clock: &dyn Clock, cooldown: Duration) -> bool {
        match self.last_vision_decision {
            Some(t) => clock.now().duration_since(t) < cooldown,
            None => false,
        }
    }

    fn transition(&mut self, to: SessionState) -> Effect {
        self.state = to;
        Effect::PublishState {
            state: to,
            muted: self.muted,
        }
    }

    /// Applies one event against the current state/config snapshot, returning
    /// the ordered list of effects to apply. This function performs no I/O
    /// and never sleeps — every time-based decision is a comparison against
    /// `clock.now()`.
    pub fn handle(&mut self, event: Event, clock: &dyn Clock, config: &Config) -> Vec<Effect> {
        // Manual cancel and mute toggles act from *any* state and are never
        // blocked by MUTED.
        if let Event::Trigger(TriggerSource::Manual {
            reason: ManualReason::Cancel,
        }) = &event
        {
            return self.cancel_to_idle();
        }
        if let Event::MuteToggle = &event {
            return self.toggle_mute();
        }

        match self.state {
            SessionState::Idle => self.handle_idle(event, clock, config),
            SessionState::ProxVerify => self.handle_prox_verify(event, config),
            SessionState::VisionGlance => self.handle_vision_glance(event, clock, config),
            SessionState::Engaged => self.handle_engaged(event),
            SessionState::Listening => self.handle_listening(event, config),
            SessionState::Processing => self.handle_processing(event),
            SessionState::Speaking => self.handle_speaking(event),
        }
    }

    fn cancel_to_idle(&mut self) -> Vec<Effect> {
        let was_vision = self.state == SessionState::VisionGlance;
        let mut effects = vec![Effect::CancelSession];
        if was_vision {
            effects.push(Effect::CancelTimer(TimerKind::VisionTimeout));
            self.pending_vision_request = None;
        }
        effects.push(Effect::CancelTimer(TimerKind::VadWindow));
        effects.push(self.transition(SessionState::Idle));
        effects
    }

    fn toggle_mute(&mut self) -> Vec<Effect> {
        self.muted = !self.muted;
        let mut effects = Vec::new();
        if self.muted && self.state == SessionState::Listening {
            effects.push(Effect::CancelSession);
            effects.push(self.transition(SessionState::Idle));
        } else {
            effects.push(Effect::PublishState {
                state: self.state,
                muted: self.muted,
            });
        }
        effects
    }

    fn handle_idle(&mut self, event: Event, clock: &dyn Clock, config: &Config) -> Vec<Effect> {
        match event {
            Event::Trigger(TriggerSource::WakeWord { .. }) if !self.muted => {
                vec![
                    Effect::StartSession { use_vad: false },
                    self.transition(SessionState::Listening),
                ]
            }
            Event::Trigger(TriggerSource::Manual {
                reason: ManualReason::Wake,
            }) if !self.muted => {
                vec![
                    Effect::StartSession { use_vad: true },
                    self.transition(SessionState::Listening),
                ]
            }
            Event::Trigger(TriggerSource::Distance { mm })
                if config.distance_activation && !self.muted && mm < config.distance_activation_threshold_mm =>
            {
                let cooldown = Duration::from_secs_f64(config.vision_cooldown_s.max(0.0));
                if self.cooldown_active(clock, cooldown) {
                    if config.attention_required {
                        return vec![Effect::RecordFalseTriggerPrevented];
                    }
                    return Vec::new();
                }
                // PROX_VERIFY has no inbound event of its own in the table —
                // it resolves immediately based on configuration, so the
                // transition into it and its immediate resolution are one
                // atomic step from the caller's perspective.
                let mut effects = vec![self.transition(SessionState::ProxVerify)];
                effects.extend(self.resolve_prox_verify(config));
                effects
            }
            _ => Vec::new(),
        }
    }

    /// PROX_VERIFY never receives an event directly in the table; any event
    /// that does arrive while here (a stale vision reply, say) is dropped.
    fn handle_prox_verify(&mut self, _event: Event, _config: &Config) -> Vec<Effect> {
        Vec::new()
    }

    fn resolve_prox_verify(&mut self, config: &Config) -> Vec<Effect> {
        if config.vision_enabled && config.attention_required {
            let request_id = self.next_request_id;
            self.next_request_id += 1;
            self.pending_vision_request = Some(request_id);
            vec![
                Effect::RecordVisionRequest,
                Effect::SendVisionRequest { request_id },
                Effect::ArmTimer {
                    kind: TimerKind::VisionTimeout,
                    after: VISION_GLANCE_TIMEOUT,
                },
                self.transition(SessionState::VisionGlance),
            ]
        } else {
            let vad_window = Duration::from_secs_f64(config.engaged_vad_window_s.max(0.0));
            vec![
                Effect::StartSession { use_vad: true },
                Effect::ArmTimer {
                    kind: TimerKind::VadWindow,
                    after: vad_window,
                },
                self.transition(SessionState::Engaged),
            ]
        }
    }

    fn handle_vision_glance(
        &mut self,
        event: Event,
        clock: &dyn Clock,
        config: &Config,
    ) -> Vec<Effect> {
        match event {
            // A wake-word trigger preempts an in-flight glance directly into
            // LISTENING, cancelling the glance.
            Event::Trigger(TriggerSource::WakeWord { .. }) if !self.muted => {
                self.pending_vision_request = None;
                vec![
                    Effect::CancelTimer(TimerKind::VisionTimeout),
                    Effect::StartSession { use_vad: false },
                    self.transition(SessionState::Listening),
                ]
            }
            // Distance triggers are ignored while a glance is in flight.
            Event::Trigger(TriggerSource::Distance { .. }) => Vec::new(),
            Event::VisionReply { request_id, verdict } => {
                if self.pending_vision_request != Some(request_id) {
                    return Vec::new(); // stale reply, drop it
                }

                match verdict {
                    // A reported `Error` verdict (e.g. the visd socket was
                    // unreachable) follows the same fallback policy as a
                    // client timeout; only a genuine
                    // negative detection (FaceAway/NoFace/low confidence)
                    // counts as a prevented false trigger, handled below.
                    AttentionVerdict::Error { message } => {
                        self.on_vision_unavailable(clock, config, Effect::RecordVisionTimeout, message)
                    }
                    AttentionVerdict::FaceToward { confidence }
                        if confidence >= config.vision_min_confidence =>
                    {
                        self.pending_vision_request = None;
                        self.last_vision_decision = Some(clock.now());
                        let vad_window = Duration::from_secs_f64(config.engaged_vad_window_s.max(0.0));
                        vec![
                            Effect::CancelTimer(TimerKind::VisionTimeout),
                            Effect::RecordVisionSuccess,
                            Effect::SetLastAttentionState("face_toward"),
                            Effect::StartSession { use_vad: true },
                            Effect::ArmTimer {
                                kind: TimerKind::VadWindow,
                                after: vad_window,
                            },
                            self.transition(SessionState::Engaged),
                        ]
                    }
                    other => {
                        self.pending_vision_request = None;
                        self.last_vision_decision = Some(clock.now());
                        vec![
                            Effect::CancelTimer(TimerKind::VisionTimeout),
                            Effect::RecordFalseTriggerPrevented,
                            Effect::SetLastAttentionState(verdict_label(&other)),
                            self.transition(SessionState::Idle),
                        ]
                    }
                }
            }
            Event::VisionRequestTimedOut { request_id } => {
                if self.pending_vision_request != Some(request_id) {
                    return Vec::new();
                }
                self.on_vision_unavailable(clock, config, Effect::RecordVisionTimeout, "timeout")
            }
            _ => Vec::new(),
        }
    }

    fn on_vision_unavailable(
        &mut self,
        clock: &dyn Clock,
        config: &Config,
        record: Effect,
        error_label: impl Into<String>,
    ) -> Vec<Effect> {
        self.pending_vision_request = None;
        self.last_vision_decision = Some(clock.now());
        if config.vision_fallback_on_error {
            let vad_window = Duration::from_secs_f64(config.engaged_vad_window_s.max(0.0));
            vec![
                record,
                Effect::SetLastVisionError(Some(error_label.into())),
                Effect::StartSession { use_vad: true },
                Effect::ArmTimer {
                    kind: TimerKind::VadWindow,
                    after: vad_window,
                },
                self.transition(SessionState::Engaged),
            ]
        } else {
            vec![
                record,
                Effect::SetLastVisionError(Some(error_label.into())),
                self.transition(SessionState::Idle),
            ]
        }
    }

    fn handle_engaged(&mut self, event: Event) -> Vec<Effect> {
        match event {
            Event::VadStart => {
                vec![
                    Effect::CancelTimer(TimerKind::VadWindow),
                    self.transition(SessionState::Listening),
                ]
            }
            Event::VadWindowElapsed => {
                vec![Effect::CancelSession, self.transition(SessionState::Idle)]
            }
            _ => Vec::new(),
        }
    }

    fn handle_listening(&mut self, event: Event, config: &Config) -> Vec<Effect> {
        match event {
            Event::SessionEnteredProcessing => {
                let mut effects = vec![self.transition(SessionState::Processing)];
                if config.enable_thinking_sound {
                    effects.push(Effect::StartThinkingSound);
                }
                effects
            }
            _ => Vec::new(),
        }
    }

    fn handle_processing(&mut self, event: Event) -> Vec<Effect> {
        match event {
            Event::SessionEnteredSpeaking => {
                vec![
                    Effect::PlayThinkingSoundStop,
                    self.transition(SessionState::Speaking),
                ]
            }
            _ => Vec::new(),
        }
    }

    fn handle_speaking(&mut self, event: Event) -> Vec<Effect> {
        match event {
            Event::PlaybackComplete => vec![self.transition(SessionState::Idle)],
            _ => Vec::new(),
        }
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

fn verdict_label(v: &AttentionVerdict) -> &'static str {
    v.label()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;

    fn cfg() -> Config {
        Config::default()
    }

    #[test]
    fn wake_word_from_idle_goes_straight_to_listening() {
        let mut m = Machine::new();
        let clock = TestClock::new();
        let effects = m.handle(
            Event::Trigger(TriggerSource::WakeWord {
                model_id: "hey_mycroft".into(),
                score: 0.72,
            }),
            &clock,
            &cfg(),
        );
        assert_eq!(m.state(), SessionState::Listening);
        assert!(effects.contains(&Effect::StartSession { use_vad: false }));
    }

    #[test]
    fn distance_with_attention_required_enters_vision_glance() {
        let mut m = Machine::new();
        let clock = TestClock::new();
        let mut config = cfg();
        config.distance_activation = true;
        config.vision_enabled = true;
        config.attention_required = true;
        config.distance_activation_threshold_mm = 120;

        let effects = m.handle(Event::Trigger(TriggerSource::Distance { mm: 90 }), &clock, &config);
        assert_eq!(m.state(), SessionState::VisionGlance);
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::SendVisionRequest { .. })));
    }

    #[test]
    fn vision_reject_records_false_trigger_and_arms_cooldown() {
        let mut m = Machine::new();
        let clock = TestClock::new();
        let mut config = cfg();
        config.distance_activation = true;
        config.vision_enabled = true;
        config.attention_required = true;
        config.vision_cooldown_s = 4.0;

        let effects = m.handle(Event::Trigger(TriggerSource::Distance { mm: 80 }), &clock, &config);
        let request_id = effects
            .iter()
            .find_map(|e| match e {
                Effect::SendVisionRequest { request_id } => Some(*request_id),
                _ => None,
            })
            .unwrap();

        let effects = m.handle(
            Event::VisionReply {
                request_id,
                verdict: AttentionVerdict::FaceAway,
            },
            &clock,
            &config,
        );
        assert_eq!(m.state(), SessionState::Idle);
        assert!(effects.contains(&Effect::RecordFalseTriggerPrevented));

        // Cooldown active: a second distance drop within the window does not
        // re-enter PROX_VERIFY.
        clock.advance(Duration::from_secs(1));
        let effects = m.handle(Event::Trigger(TriggerSource::Distance { mm: 75 }), &clock, &config);
        assert_eq!(m.state(), SessionState::Idle);
        assert!(effects.contains(&Effect::RecordFalseTriggerPrevented));
    }

    #[test]
    fn vision_timeout_with_fallback_proceeds_to_engaged() {
        let mut m = Machine::new();
        let clock = TestClock::new();
        let mut config = cfg();
        config.distance_activation = true;
        config.vision_enabled = true;
        config.attention_required = true;
        config.vision_fallback_on_error = true;

        let effects = m.handle(Event::Trigger(TriggerSource::Distance { mm: 80 }), &clock, &config);
        let request_id = effects
            .iter()
            .find_map(|e| match e {
                Effect::SendVisionRequest { request_id } => Some(*request_id),
                _ => None,
            })
            .unwrap();

        let effects = m.handle(Event::VisionRequestTimedOut { request_id }, &clock, &config);
        assert_eq!(m.state(), SessionState::Engaged);
        assert!(effects.contains(&Effect::RecordVisionTimeout));
    }

    #[test]
    fn mute_blocks_distance_trigger() {
        let mut m = Machine::new();
        let clock = TestClock::new();
        let mut config = cfg();
        config.distance_activation = true;

        m.handle(Event::MuteToggle, &clock, &config);
        assert!(m.muted());

        let effects = m.handle(Event::Trigger(TriggerSource::Distance { mm: 10 }), &clock, &config);
        assert_eq!(m.state(), SessionState::Idle);
        assert!(effects.is_empty());
    }

    #[test]
    fn vad_window_expiry_returns_to_idle_and_cancels_session() {
        let mut m = Machine::new();
        let clock = TestClock::new();
        let mut config = cfg();
        config.distance_activation = true;
        config.attention_required = false;

        m.handle(Event::Trigger(TriggerSource::Distance { mm: 10 }), &clock, &config);
        assert_eq!(m.state(), SessionState::Engaged);

        let effects = m.handle(Event::VadWindowElapsed, &clock, &config);
        assert_eq!(m.state(), SessionState::Idle);
        assert!(effects.contains(&Effect::CancelSession));
    }

    #[test]
    fn idempotent_mute_toggle_returns_to_prior_state() {
        let mut m = Machine::new();
        let clock = TestClock::new();
        let config = cfg();
        let muted_before = m.muted();
        m.handle(Event::MuteToggle, &clock, &config);
        m.handle(Event::MuteToggle, &clock, &config);
        assert_eq!(m.muted(), muted_before);
    }

    #[test]
    fn manual_cancel_works_even_while_muted() {
        let mut m = Machine::new();
        let clock = TestClock::new();
        let config = cfg();
        m.handle(Event::MuteToggle, &clock, &config);
        m.handle(
            Event::Trigger(TriggerSource::WakeWord {
                model_id: "x".into(),
                score: 0.9,
            }),
            &clock,
            &config,
        );
        assert_eq!(m.state(), SessionState::Idle); // muted, wake ignored

        let effects = m.handle(
            Event::Trigger(TriggerSource::Manual {
                reason: ManualReason::Cancel,
            }),
            &clock,
            &config,
        );
        assert_eq!(m.state(), SessionState::Idle);
        assert!(effects.contains(&Effect::CancelSession));
    }

    #[test]
    fn wake_word_preempts_in_flight_vision_glance() {
        let mut m = Machine::new();
        let clock = TestClock::new();
        let mut config = cfg();
        config.distance_activation = true;
        config.vision_enabled = true;
        config.attention_required = true;

        m.handle(Event::Trigger(TriggerSource::Distance { mm: 10 }), &clock, &config);
        assert_eq!(m.state(), SessionState::VisionGlance);

        let effects = m.handle(
            Event::Trigger(TriggerSource::WakeWord {
                model_id: "hey_mycroft".into(),
                score: 0.9,
            }),
            &clock,
            &config,
        );
        assert_eq!(m.state(), SessionState::Listening);
        assert!(effects.contains(&Effect::CancelTimer(TimerKind::VisionTimeout)));
    }

    #[test]
    fn full_happy_path_wake_word_cycle() {
        let mut m = Machine::new();
        let clock = TestClock::new();
        let config = cfg();

        m.handle(
            Event::Trigger(TriggerSource::WakeWord {
                model_id: "hey_mycroft".into(),
                score: 0.72,
            }),
            &clock,
            &config,
        );
        assert_eq!(m.state(), SessionState::Listening);
        m.handle(Event::SessionEnteredProcessing, &clock, &config);
        assert_eq!(m.state(), SessionState::Processing);
        m.handle(Event::SessionEnteredSpeaking, &clock, &config);
        assert_eq!(m.state(), SessionState::Speaking);
        m.handle(Event::PlaybackComplete, &clock, &config);
        assert_eq!(m.state(), SessionState::Idle);
    }

    #[test]
    fn tie_break_orders_manual_before_wakeword_before_distance() {
        let mut batch = vec![
            Event::Trigger(TriggerSource::Distance { mm: 10 }),
            Event::Trigger(TriggerSource::WakeWord {
                model_id: "a".into(),
                score: 0.9,
            }),
            Event::Trigger(TriggerSource::Manual {
                reason: ManualReason::Cancel,
            }),
        ];
        sort_batch(&mut batch);
        assert!(matches!(
            batch[0],
            Event::Trigger(TriggerSource::Manual { .. })
        ));
        assert!(matches!(
            batch[1],
            Event::Trigger(TriggerSource::WakeWord { .. })
        ));
        assert!(matches!(
            batch[2],
            Event::Trigger(TriggerSource::Distance { .. })
        ));
    }
}
