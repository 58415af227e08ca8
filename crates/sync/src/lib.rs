//! Tick scheduler and loop-quantized recording/playback synchronizer.
//!
//! Everything that touches timing state runs on one timeline: the
//! [`SchedulerSession`] is driven by ticks and by deferred tasks that come due,
//! and the [`SessionDriver`] is the single task that feeds it.

pub mod capture;
pub mod clock;
pub mod controller;
pub mod driver;
pub mod error;
pub mod events;
pub mod midi;
pub mod mixer;
pub mod session;
pub mod timeline;

pub use capture::LocalCapture;
pub use clock::{plan_quantized_start, time_until_next_loop, BeatAccent, LoopClock, QuantizedStart, Tick};
pub use controller::{CaptureMode, CaptureState, RecordingController};
pub use driver::{SessionCommand, SessionDriver};
pub use error::SyncError;
pub use events::{CaptureStatus, SessionEvent};
pub use midi::{note_request_from_midi, MidiBridge, MidiDevice, NoteRequest};
pub use mixer::{loop_playback, ListenerView};
pub use session::{SchedulerSession, SessionIdentity, SessionTask};
pub use timeline::{Generation, Scope, Timeline};
