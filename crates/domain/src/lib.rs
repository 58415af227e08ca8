pub mod error;
pub mod events;
pub mod recording;
pub mod roommates;
pub mod settings;
pub mod tempo;

pub use crate::error::DomainError;
pub use crate::events::{Instrument, NoteEvent, PitchKey, ScheduledNote};
pub use crate::recording::Recording;
pub use crate::roommates::{MuteList, ParticipantId, RoomRecordings, RoommateEntry, RoommateRegistry};
pub use crate::settings::{KeyboardSettings, MetronomeSettings, SessionSettings};
pub use crate::tempo::{TimingConfig, MAX_TICK_SECONDS, MIN_TICK_SECONDS, SUBDIVISIONS_PER_BEAT};
