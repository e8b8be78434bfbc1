use std::time::Duration;

/// Primary session state. Exactly one of these holds at a time; `Muted`
/// is tracked separately as an orthogonal overlay, never as a variant
/// here, so "what state are we in" and "are we muted" can never disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    ProxVerify,
    VisionGlance,
    Engaged,
    Listening,
    Processing,
    Speaking,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "IDLE",
            SessionState::ProxVerify => "PROX_VERIFY",
            SessionState::VisionGlance => "VISION_GLANCE",
            SessionState::Engaged => "ENGAGED",
            SessionState::Listening => "LISTENING",
            SessionState::Processing => "PROCESSING",
            SessionState::Speaking => "SPEAKING",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualReason {
    Wake,
    Cancel,
}

/// The three asynchronous trigger inputs the gate ingests.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerSource {
    WakeWord { model_id: String, score: f32 },
    Distance { mm: u32 },
    Manual { reason: ManualReason },
}

/// Tri-state attention verdict from the vision daemon.
#[derive(Debug, Clone, PartialEq)]
pub enum AttentionVerdict {
    FaceToward { confidence: f32 },
    FaceAway,
    NoFace,
    Error { message: String },
}

impl AttentionVerdict {
    pub fn label(&self) -> &'static str {
        match self {
            AttentionVerdict::FaceToward { .. } => "face_toward",
            AttentionVerdict::FaceAway => "face_away",
            AttentionVerdict::NoFace => "no_face",
            AttentionVerdict::Error { .. } => "error",
        }
    }
}

/// Everything the serialized event queue can carry: triggers, vision
/// replies, VAD signals from the session, timeouts, manual commands,
/// configuration mutations and mute toggles.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Trigger(TriggerSource),
    VisionReply { request_id: u64, verdict: AttentionVerdict },
    VisionRequestTimedOut { request_id: u64 },
    VadStart,
    VadWindowElapsed,
    SessionEnteredProcessing,
    SessionEnteredSpeaking,
    PlaybackComplete,
    MuteToggle,
    /// The hub/preferences layer already applied the mutation to the config
    /// snapshot; this just lets the reducer recompute anything that depends
    /// on the *new* value mid-flight (e.g. a cooldown that just changed).
    ConfigMutated,
}

impl Event {
    /// Tie-break priority within a single drain batch: lower sorts
    /// first. Only `Trigger` variants are ordered against each other;
    /// everything else keeps its arrival order around them (stable sort).
    pub fn tie_break_priority(&self) -> u8 {
        match self {
            Event::Trigger(TriggerSource::Manual { .. }) => 0,
            Event::Trigger(TriggerSource::WakeWord { .. }) => 1,
            Event::Trigger(TriggerSource::Distance { .. }) => 2,
            _ => 3,
        }
    }
}

/// Sorts a drained batch of events by tie-break priority. Uses a stable sort
/// so events that don't compete (anything but triggers) keep their original
/// relative order.
pub fn sort_batch(events: &mut [Event]) {
    events.sort_by_key(Event::tie_break_priority);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    VisionTimeout,
    VadWindow,
}

/// Side effects the reducer returns as data rather than performing itself,
/// so the pure transition logic stays I/O-free and unit-testable (Design
/// Notes: "coroutine/async flow ... explicit event-queue reducer").
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    StartSession { use_vad: bool },
    CancelSession,
    SendVisionRequest { request_id: u64 },
    ArmTimer { kind: TimerKind, after: Duration },
    CancelTimer(TimerKind),
    PublishState { state: SessionState, muted: bool },
    StartThinkingSound,
    PlayThinkingSoundStop,
    RecordVisionRequest,
    RecordVisionSuccess,
    RecordVisionTimeout,
    RecordFalseTriggerPrevented,
    SetLastAttentionState(&'static str),
    SetLastVisionLatencyMs(u64),
    SetLastVisionError(Option<String>),
}
