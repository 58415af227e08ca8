use serde::{Deserialize, Serialize};

use crate::events::{Instrument, NoteEvent, PitchKey, ScheduledNote};

/// One participant's take: loop-relative note events in capture order.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Recording {
    events: Vec<NoteEvent>,
}

impl Recording {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events(events: Vec<NoteEvent>) -> Self {
        Self { events }
    }

    /// A microphone take: one event covering the captured audio.
    pub fn mic_take(upload: PitchKey, duration: f64) -> Self {
        Self {
            events: vec![NoteEvent::closed(Instrument::Mic, upload, 0.0, duration)],
        }
    }

    pub fn events(&self) -> &[NoteEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Appends a note-on. A key that is still open is released first so a
    /// key never has two open events.
    pub fn begin(&mut self, event: NoteEvent) {
        let start = event.start_time;
        if let Some(open) = self.open_event_mut(&event.pitch_key) {
            open.close_at(start);
        }
        self.events.push(event);
    }

    /// Most recent event for `key` that has not been released.
    pub fn open_event_mut(&mut self, key: &PitchKey) -> Option<&mut NoteEvent> {
        self.events
            .iter_mut()
            .rev()
            .find(|event| event.is_open() && &event.pitch_key == key)
    }

    pub fn has_open_events(&self) -> bool {
        self.events.iter().any(NoteEvent::is_open)
    }

    /// Closes every open event at `bound` and clamps later releases to it.
    pub fn seal(&mut self, bound: f64) {
        for event in &mut self.events {
            event.seal(bound);
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.events
            .iter()
            .all(|event| matches!(event.stop_time, Some(stop) if stop >= event.start_time))
    }

    pub fn replace_pitch_key(&mut self, from: &PitchKey, to: &PitchKey) {
        for event in &mut self.events {
            if &event.pitch_key == from {
                event.pitch_key = to.clone();
            }
        }
    }

    pub fn anchored(&self, anchor: f64, loop_duration: f64) -> impl Iterator<Item = ScheduledNote> + '_ {
        self.events
            .iter()
            .map(move |event| event.anchored(anchor, loop_duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(cents: i32) -> PitchKey {
        PitchKey::from(cents)
    }

    #[test]
    fn begin_releases_reopened_key() {
        let mut recording = Recording::new();
        recording.begin(NoteEvent::open(Instrument::Keyboard, key(100), 0.5));
        recording.begin(NoteEvent::open(Instrument::Keyboard, key(100), 1.0));
        assert_eq!(recording.len(), 2);
        assert_eq!(recording.events()[0].stop_time, Some(1.0));
        assert!(recording.events()[1].is_open());
    }

    #[test]
    fn open_event_lookup_is_per_key() {
        let mut recording = Recording::new();
        recording.begin(NoteEvent::open(Instrument::Keyboard, key(0), 0.0));
        recording.begin(NoteEvent::open(Instrument::Keyboard, key(200), 0.1));
        recording.open_event_mut(&key(0)).unwrap().close_at(0.4);
        assert!(recording.open_event_mut(&key(0)).is_none());
        assert!(recording.open_event_mut(&key(200)).is_some());
    }

    #[test]
    fn seal_closes_and_clamps() {
        let mut recording = Recording::from_events(vec![
            NoteEvent::open(Instrument::Keyboard, key(0), 1.0),
            NoteEvent::closed(Instrument::Keyboard, key(100), 2.0, 9.0),
            NoteEvent::closed(Instrument::Keyboard, key(200), 0.5, 1.5),
        ]);
        assert!(!recording.is_sealed());
        recording.seal(4.0);
        assert!(recording.is_sealed());
        let stops: Vec<_> = recording.events().iter().map(|e| e.stop_time).collect();
        assert_eq!(stops, vec![Some(4.0), Some(4.0), Some(1.5)]);
    }

    #[test]
    fn mic_take_placeholder_can_be_replaced() {
        let placeholder = PitchKey::new("room_alice.ogg");
        let mut take = Recording::mic_take(placeholder.clone(), 3.9);
        take.replace_pitch_key(&placeholder, &PitchKey::new("room"));
        assert_eq!(take.events()[0].pitch_key.as_str(), "room");
        assert_eq!(take.events()[0].instrument, Instrument::Mic);
    }
}
