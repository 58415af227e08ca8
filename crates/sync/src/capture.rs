use loopjam_domain::{Instrument, NoteEvent, PitchKey, Recording};
use tracing::trace;

/// Builds the local take while capture is active.
///
/// Offsets are measured from the capture start. Notes that begin at or past
/// one loop are not part of the take.
#[derive(Debug)]
pub struct LocalCapture {
    loop_duration: f64,
    started_at: Option<f64>,
    recording: Recording,
}

impl LocalCapture {
    pub fn new(loop_duration: f64) -> Self {
        Self {
            loop_duration,
            started_at: None,
            recording: Recording::new(),
        }
    }

    pub fn loop_duration(&self) -> f64 {
        self.loop_duration
    }

    pub fn is_active(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn started_at(&self) -> Option<f64> {
        self.started_at
    }

    /// Starts a fresh take at `start`, dropping whatever was held.
    pub fn begin(&mut self, start: f64) {
        self.recording.clear();
        self.started_at = Some(start);
    }

    /// Returns whether the note became part of the take.
    pub fn record_note(&mut self, now: f64, instrument: Instrument, pitch_key: PitchKey) -> bool {
        let Some(start) = self.started_at else {
            return false;
        };
        let offset = now - start;
        if offset >= self.loop_duration {
            trace!(offset, "note past the end of the loop");
            return false;
        }
        self.recording
            .begin(NoteEvent::open(instrument, pitch_key, offset));
        true
    }

    /// Closes the most recent open event for `pitch_key`. Returns whether
    /// one was open.
    pub fn stop_recording_note(&mut self, now: f64, pitch_key: &PitchKey) -> bool {
        let Some(start) = self.started_at else {
            return false;
        };
        let offset = (now - start).min(self.loop_duration);
        match self.recording.open_event_mut(pitch_key) {
            Some(event) => {
                event.close_at(offset);
                true
            }
            None => false,
        }
    }

    /// Ends capture: open events close at `now` and nothing outlasts the loop.
    pub fn seal(&mut self, now: f64) {
        if let Some(start) = self.started_at.take() {
            let bound = (now - start).clamp(0.0, self.loop_duration);
            self.recording.seal(bound);
        }
        self.recording.seal(self.loop_duration);
    }

    /// Seconds captured so far, capped at one loop.
    pub fn elapsed(&self, now: f64) -> Option<f64> {
        self.started_at
            .map(|start| (now - start).clamp(0.0, self.loop_duration))
    }

    pub fn recording(&self) -> &Recording {
        &self.recording
    }

    pub fn recording_mut(&mut self) -> &mut Recording {
        &mut self.recording
    }

    pub fn replace(&mut self, recording: Recording) {
        self.recording = recording;
    }

    pub fn take(&mut self) -> Recording {
        std::mem::take(&mut self.recording)
    }

    pub fn clear(&mut self) {
        self.started_at = None;
        self.recording.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn key(cents: i32) -> PitchKey {
        PitchKey::from(cents)
    }

    #[test]
    fn inactive_capture_ignores_notes() {
        let mut capture = LocalCapture::new(4.0);
        assert!(!capture.record_note(1.0, Instrument::Keyboard, key(0)));
        assert!(!capture.stop_recording_note(1.2, &key(0)));
        assert!(capture.recording().is_empty());
    }

    #[test]
    fn offsets_are_relative_to_capture_start() {
        let mut capture = LocalCapture::new(4.0);
        capture.begin(10.0);
        assert!(capture.record_note(10.5, Instrument::Keyboard, key(100)));
        assert!(capture.stop_recording_note(11.25, &key(100)));

        let event = &capture.recording().events()[0];
        assert_relative_eq!(event.start_time, 0.5);
        assert_relative_eq!(event.stop_time.unwrap(), 1.25);
    }

    #[test]
    fn note_during_lookahead_clamps_to_zero() {
        let mut capture = LocalCapture::new(4.0);
        capture.begin(10.0);
        capture.record_note(9.9, Instrument::Keyboard, key(0));
        assert_relative_eq!(capture.recording().events()[0].start_time, 0.0);
    }

    #[test]
    fn notes_past_the_loop_are_dropped() {
        let mut capture = LocalCapture::new(4.0);
        capture.begin(0.0);
        assert!(!capture.record_note(4.0, Instrument::Keyboard, key(0)));
        assert!(capture.record_note(3.99, Instrument::Keyboard, key(0)));
        assert_eq!(capture.recording().len(), 1);
    }

    #[test]
    fn seal_leaves_every_event_closed_within_the_loop() {
        let mut capture = LocalCapture::new(4.0);
        capture.begin(0.0);
        capture.record_note(0.5, Instrument::Keyboard, key(0));
        capture.record_note(1.0, Instrument::sampled("guitar"), PitchKey::new("E2"));
        capture.stop_recording_note(1.5, &PitchKey::new("E2"));
        capture.record_note(3.5, Instrument::Keyboard, key(300));
        capture.seal(3.975);

        assert!(!capture.is_active());
        let recording = capture.recording();
        assert!(recording.is_sealed());
        for event in recording.events() {
            let stop = event.stop_time.unwrap();
            assert!(stop >= event.start_time);
            assert!(stop <= 4.0);
        }
        assert_relative_eq!(recording.events()[0].stop_time.unwrap(), 3.975);
    }

    #[test]
    fn begin_discards_previous_take() {
        let mut capture = LocalCapture::new(4.0);
        capture.begin(0.0);
        capture.record_note(0.5, Instrument::Keyboard, key(0));
        capture.seal(4.0);
        capture.begin(8.0);
        assert!(capture.recording().is_empty());
    }
}
