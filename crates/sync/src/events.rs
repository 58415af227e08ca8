use loopjam_domain::{PitchKey, Recording, TimingConfig};
use serde::{Deserialize, Serialize};

use crate::clock::BeatAccent;

/// Coarse capture state, as shown to the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStatus {
    Idle,
    Armed,
    Recording,
    PendingSend,
}

/// Everything the session reports outward.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Started { timing: TimingConfig },
    Stopped,
    LoopStarted { anchor: f64 },
    /// Visual metronome pulse.
    Pulse { on: bool, accent: BeatAccent },
    /// Plain-text status line.
    Status(String),
    CaptureChanged(CaptureStatus),
    MicCaptureStarted,
    MicCaptureStopped { upload_name: PitchKey },
    RecordingShared(Recording),
    /// The output device is gone; playback has stopped.
    SessionLost { reason: String },
}

impl SessionEvent {
    pub fn status(text: impl Into<String>) -> Self {
        SessionEvent::Status(text.into())
    }
}
