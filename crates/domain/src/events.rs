use std::fmt;

use serde::{Deserialize, Serialize};

/// Source of a note. `Mic` is reserved for microphone takes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Instrument {
    Keyboard,
    Mic,
    Sampled(String),
}

impl Instrument {
    pub const KEYBOARD: &'static str = "keyboard";
    pub const MIC: &'static str = "mic";

    pub fn sampled(name: impl Into<String>) -> Self {
        Self::from(name.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Instrument::Keyboard => Self::KEYBOARD,
            Instrument::Mic => Self::MIC,
            Instrument::Sampled(name) => name,
        }
    }

    pub fn is_mic(&self) -> bool {
        matches!(self, Instrument::Mic)
    }
}

impl From<String> for Instrument {
    fn from(value: String) -> Self {
        match value.as_str() {
            Self::KEYBOARD => Instrument::Keyboard,
            Self::MIC => Instrument::Mic,
            _ => Instrument::Sampled(value),
        }
    }
}

impl From<&str> for Instrument {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<Instrument> for String {
    fn from(value: Instrument) -> Self {
        match value {
            Instrument::Sampled(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one voice: a detune in cents for the keyboard, a sample name
/// for sampled instruments, an uploaded file name for mic takes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PitchKey(String);

impl PitchKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name a microphone take is uploaded under until the upload confirms it.
    pub fn mic_upload(room: &str, display_name: &str) -> Self {
        Self(format!("{room}_{display_name}.ogg"))
    }

    /// Detune in cents, when the key is numeric.
    pub fn cents(&self) -> Option<f32> {
        self.0
            .trim()
            .parse::<f32>()
            .ok()
            .filter(|cents| cents.is_finite())
    }
}

impl From<&str> for PitchKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PitchKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<i32> for PitchKey {
    fn from(cents: i32) -> Self {
        Self(cents.to_string())
    }
}

impl fmt::Display for PitchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NoteEvent {
    pub instrument: Instrument,
    pub pitch_key: PitchKey,
    /// Seconds from the start of the loop.
    pub start_time: f64,
    /// Seconds from the start of the loop; `None` while the note still sounds.
    pub stop_time: Option<f64>,
}

impl NoteEvent {
    pub fn open(instrument: Instrument, pitch_key: PitchKey, start_time: f64) -> Self {
        Self {
            instrument,
            pitch_key,
            start_time: start_time.max(0.0),
            stop_time: None,
        }
    }

    pub fn closed(instrument: Instrument, pitch_key: PitchKey, start_time: f64, stop_time: f64) -> Self {
        let mut event = Self::open(instrument, pitch_key, start_time);
        event.close_at(stop_time);
        event
    }

    pub fn is_open(&self) -> bool {
        self.stop_time.is_none()
    }

    /// Sets the release, never earlier than the onset.
    pub fn close_at(&mut self, time: f64) {
        self.stop_time = Some(time.max(self.start_time));
    }

    /// Closes an open event at `bound` and pulls a later release back to it.
    pub fn seal(&mut self, bound: f64) {
        match self.stop_time {
            Some(stop) if stop <= bound => {}
            _ => self.close_at(bound),
        }
    }

    /// Absolute-time copy of this event, anchored at `anchor`.
    ///
    /// An event that was never closed ends at `loop_duration`.
    pub fn anchored(&self, anchor: f64, loop_duration: f64) -> ScheduledNote {
        let stop = self
            .stop_time
            .unwrap_or(loop_duration)
            .max(self.start_time);
        ScheduledNote {
            instrument: self.instrument.clone(),
            pitch_key: self.pitch_key.clone(),
            start: self.start_time + anchor,
            stop: stop + anchor,
        }
    }
}

/// A note placed on the audio clock.
#[derive(Clone, Debug, PartialEq)]
pub struct ScheduledNote {
    pub instrument: Instrument,
    pub pitch_key: PitchKey,
    pub start: f64,
    pub stop: f64,
}

impl ScheduledNote {
    /// Inverse of [`NoteEvent::anchored`] for a closed event.
    pub fn relative_to(&self, anchor: f64) -> NoteEvent {
        NoteEvent {
            instrument: self.instrument.clone(),
            pitch_key: self.pitch_key.clone(),
            start_time: self.start - anchor,
            stop_time: Some(self.stop - anchor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn instrument_wire_names() {
        assert_eq!(Instrument::from("keyboard"), Instrument::Keyboard);
        assert_eq!(Instrument::from("mic"), Instrument::Mic);
        assert_eq!(Instrument::from("drums"), Instrument::Sampled("drums".into()));
        let json = serde_json::to_string(&Instrument::sampled("bass")).unwrap();
        assert_eq!(json, "\"bass\"");
        let parsed: Instrument = serde_json::from_str("\"mic\"").unwrap();
        assert!(parsed.is_mic());
    }

    #[test]
    fn mic_upload_name_joins_room_and_name() {
        assert_eq!(PitchKey::mic_upload("lobby", "ana").as_str(), "lobby_ana.ogg");
    }

    #[test]
    fn pitch_key_cents() {
        assert_eq!(PitchKey::from(-900).cents(), Some(-900.0));
        assert_eq!(PitchKey::from("kick").cents(), None);
    }

    #[test]
    fn close_never_precedes_start() {
        let mut event = NoteEvent::open(Instrument::Keyboard, 100.into(), 1.5);
        assert!(event.is_open());
        event.close_at(1.0);
        assert_eq!(event.stop_time, Some(1.5));
    }

    #[test]
    fn seal_clamps_late_release() {
        let mut event = NoteEvent::closed(Instrument::Keyboard, 0.into(), 3.0, 5.0);
        event.seal(4.0);
        assert_eq!(event.stop_time, Some(4.0));
        let mut open = NoteEvent::open(Instrument::Keyboard, 0.into(), 2.0);
        open.seal(4.0);
        assert_eq!(open.stop_time, Some(4.0));
    }

    #[test]
    fn anchoring_is_reversible() {
        let event = NoteEvent::closed(Instrument::sampled("drums"), "snare".into(), 0.25, 0.75);
        let scheduled = event.anchored(12.125, 4.0);
        assert_relative_eq!(scheduled.start, 12.375);
        assert_relative_eq!(scheduled.stop, 12.875);
        let back = scheduled.relative_to(12.125);
        assert_relative_eq!(back.start_time, 0.25);
        assert_relative_eq!(back.stop_time.unwrap(), 0.75);
    }

    #[test]
    fn note_event_json_uses_camel_case() {
        let event = NoteEvent::closed(Instrument::Keyboard, 200.into(), 0.0, 1.0);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"pitchKey\":\"200\""));
        assert!(json.contains("\"stopTime\":1.0"));
    }
}
