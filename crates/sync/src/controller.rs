use loopjam_domain::{Instrument, PitchKey, Recording};
use tracing::{debug, info};

use crate::capture::LocalCapture;
use crate::clock::{plan_quantized_start, QuantizedStart};
use crate::error::SyncError;
use crate::events::{CaptureStatus, SessionEvent};
use crate::session::SessionTask;
use crate::timeline::{Generation, Scope, Timeline};

pub const RECORDING_MESSAGE: &str = "You're recording!";
pub const STOPPED_MESSAGE: &str = "To record, press record";
pub const ARMED_MESSAGE: &str = "You're set to record once we get to the start of the loop...";
pub const CANCELLED_MESSAGE: &str = "Recording cancelled";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureMode {
    Notes,
    Microphone,
}

impl CaptureMode {
    pub fn for_instrument(instrument: &Instrument) -> Self {
        if instrument.is_mic() {
            CaptureMode::Microphone
        } else {
            CaptureMode::Notes
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CaptureState {
    Idle,
    /// Waiting for a loop start. Capture begins on the boundary that brings
    /// `boundaries_remaining` to zero.
    Armed { boundaries_remaining: u32, starts_at: f64 },
    Recording { started_at: f64, mode: CaptureMode },
    /// A finished take waits to be shared or discarded.
    PendingSend,
}

impl CaptureState {
    pub fn status(&self) -> CaptureStatus {
        match self {
            CaptureState::Idle => CaptureStatus::Idle,
            CaptureState::Armed { .. } => CaptureStatus::Armed,
            CaptureState::Recording { .. } => CaptureStatus::Recording,
            CaptureState::PendingSend => CaptureStatus::PendingSend,
        }
    }
}

/// Drives the capture lifecycle: arming, the quantized start, the guard and
/// stop at the end of the loop, and handing the finished take over.
///
/// Timed work goes onto the session timeline tagged with the current
/// generation; anything that ends an attempt early moves to a new one.
#[derive(Debug)]
pub struct RecordingController {
    state: CaptureState,
    generation: Generation,
    capture: LocalCapture,
    countdown_seconds: u32,
    guard_interval: f64,
}

impl RecordingController {
    pub fn new(loop_duration: f64, countdown_seconds: u32, guard_interval: f64) -> Self {
        Self {
            state: CaptureState::Idle,
            generation: 0,
            capture: LocalCapture::new(loop_duration),
            countdown_seconds,
            guard_interval,
        }
    }

    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn capture(&self) -> &LocalCapture {
        &self.capture
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, CaptureState::Recording { .. })
    }

    /// Notes are captured from the start of a note recording until the guard.
    pub fn is_capturing_notes(&self) -> bool {
        self.capture.is_active()
            && matches!(
                self.state,
                CaptureState::Recording {
                    mode: CaptureMode::Notes,
                    ..
                }
            )
    }

    /// The local participant's entry in the registry is not replayed to them
    /// while they record or hold an unshared take.
    pub fn suppresses_own_entry(&self) -> bool {
        self.is_recording() || !self.capture.recording().is_empty()
    }

    /// The finished take, when its owner should hear it at loop start.
    pub fn pending_take(&self, preview: bool) -> Option<&Recording> {
        match self.state {
            CaptureState::PendingSend if preview && !self.capture.recording().is_empty() => {
                Some(self.capture.recording())
            }
            _ => None,
        }
    }

    pub fn record_note(&mut self, now: f64, instrument: Instrument, pitch_key: PitchKey) -> bool {
        self.is_capturing_notes() && self.capture.record_note(now, instrument, pitch_key)
    }

    pub fn stop_recording_note(&mut self, now: f64, pitch_key: &PitchKey) -> bool {
        self.is_capturing_notes() && self.capture.stop_recording_note(now, pitch_key)
    }

    /// Arms a capture for a loop start at least the countdown lead away.
    pub fn request_start(
        &mut self,
        until_next_loop: f64,
        now: f64,
        timeline: &mut Timeline<SessionTask>,
        events: &mut Vec<SessionEvent>,
    ) -> Result<QuantizedStart, SyncError> {
        self.ensure_available()?;
        let plan = plan_quantized_start(
            until_next_loop,
            self.capture.loop_duration(),
            self.countdown_seconds as f64,
        );
        let generation = self.next_generation(timeline);
        let starts_at = now + plan.delay;
        self.state = CaptureState::Armed {
            boundaries_remaining: plan.boundaries,
            starts_at,
        };
        events.push(SessionEvent::status(ARMED_MESSAGE));
        self.schedule_countdown(timeline, generation, starts_at, now, "Recording in");
        events.push(SessionEvent::CaptureChanged(CaptureStatus::Armed));
        info!(delay = plan.delay, boundaries = plan.boundaries, "recording armed");
        Ok(plan)
    }

    /// Called on every loop start, before the loop's playback is merged.
    /// Returns whether capture began on this boundary.
    pub fn on_loop_boundary(
        &mut self,
        anchor: f64,
        mode: CaptureMode,
        timeline: &mut Timeline<SessionTask>,
        events: &mut Vec<SessionEvent>,
    ) -> bool {
        let CaptureState::Armed {
            boundaries_remaining,
            starts_at,
        } = &mut self.state
        else {
            return false;
        };
        *boundaries_remaining = boundaries_remaining.saturating_sub(1);
        if *boundaries_remaining > 0 {
            debug!(starts_at = *starts_at, "armed capture waits another loop");
            return false;
        }
        self.begin(anchor, anchor, mode, timeline, events);
        true
    }

    /// Starts capturing at `now`, without waiting for a boundary.
    pub fn start_now(
        &mut self,
        now: f64,
        mode: CaptureMode,
        timeline: &mut Timeline<SessionTask>,
        events: &mut Vec<SessionEvent>,
    ) -> Result<(), SyncError> {
        self.ensure_available()?;
        self.next_generation(timeline);
        self.begin(now, now, mode, timeline, events);
        Ok(())
    }

    /// Ends note capture shortly before the loop ends. Returns whether held
    /// voices should be silenced.
    pub fn guard(&mut self, now: f64) -> bool {
        if !self.is_recording() || !self.capture.is_active() {
            return false;
        }
        self.capture.seal(now);
        true
    }

    /// Completes the capture and moves to [`CaptureState::PendingSend`].
    pub fn finish(
        &mut self,
        now: f64,
        upload_name: PitchKey,
        timeline: &mut Timeline<SessionTask>,
        events: &mut Vec<SessionEvent>,
    ) {
        let CaptureState::Recording { started_at, mode } = self.state else {
            return;
        };
        match mode {
            CaptureMode::Notes => self.capture.seal(now),
            CaptureMode::Microphone => {
                let duration = (now - started_at).clamp(0.0, self.capture.loop_duration());
                self.capture.seal(now);
                self.capture
                    .replace(Recording::mic_take(upload_name.clone(), duration));
                events.push(SessionEvent::MicCaptureStopped { upload_name });
            }
        }
        timeline.cancel_capture(self.generation);
        self.state = CaptureState::PendingSend;
        info!(events = self.capture.recording().len(), "recording finished");
        events.push(SessionEvent::status(STOPPED_MESSAGE));
        events.push(SessionEvent::CaptureChanged(CaptureStatus::PendingSend));
    }

    /// Manual stop. An armed capture is cancelled; a running one is ended
    /// early. Returns whether held voices should be silenced.
    pub fn stop(
        &mut self,
        now: f64,
        upload_name: PitchKey,
        timeline: &mut Timeline<SessionTask>,
        events: &mut Vec<SessionEvent>,
    ) -> bool {
        match self.state {
            CaptureState::Armed { .. } => {
                self.next_generation(timeline);
                self.state = CaptureState::Idle;
                events.push(SessionEvent::status(CANCELLED_MESSAGE));
                events.push(SessionEvent::CaptureChanged(CaptureStatus::Idle));
                false
            }
            CaptureState::Recording { .. } => {
                let silence = self.guard(now);
                self.finish(now, upload_name, timeline, events);
                self.next_generation(timeline);
                silence
            }
            _ => false,
        }
    }

    /// Hands the finished take over for publishing and returns to idle.
    pub fn share(&mut self, events: &mut Vec<SessionEvent>) -> Result<Recording, SyncError> {
        if self.state != CaptureState::PendingSend {
            return Err(SyncError::NothingToShare);
        }
        let recording = self.capture.take();
        self.to_idle(events);
        if recording.is_empty() {
            return Err(SyncError::NothingToShare);
        }
        Ok(recording)
    }

    pub fn discard(&mut self, events: &mut Vec<SessionEvent>) -> Result<(), SyncError> {
        match self.state {
            CaptureState::Idle => Ok(()),
            CaptureState::PendingSend => {
                self.capture.clear();
                self.to_idle(events);
                Ok(())
            }
            _ => Err(SyncError::CaptureBusy),
        }
    }

    /// Swaps the placeholder name of a mic take for the confirmed upload.
    pub fn mic_upload_complete(&mut self, placeholder: &PitchKey, uploaded: &PitchKey) -> bool {
        let recording = self.capture.recording_mut();
        let found = recording
            .events()
            .iter()
            .any(|event| &event.pitch_key == placeholder);
        recording.replace_pitch_key(placeholder, uploaded);
        found
    }

    /// Invalidates every pending task; used when the session stops.
    pub fn teardown(&mut self, timeline: &mut Timeline<SessionTask>) {
        self.next_generation(timeline);
        self.capture.clear();
        self.state = CaptureState::Idle;
    }

    fn ensure_available(&self) -> Result<(), SyncError> {
        match self.state {
            CaptureState::Armed { .. } | CaptureState::Recording { .. } => Err(SyncError::CaptureBusy),
            _ => Ok(()),
        }
    }

    fn next_generation(&mut self, timeline: &mut Timeline<SessionTask>) -> Generation {
        timeline.cancel_capture(self.generation);
        self.generation += 1;
        self.generation
    }

    fn to_idle(&mut self, events: &mut Vec<SessionEvent>) {
        self.state = CaptureState::Idle;
        events.push(SessionEvent::CaptureChanged(CaptureStatus::Idle));
    }

    fn begin(
        &mut self,
        started_at: f64,
        now: f64,
        mode: CaptureMode,
        timeline: &mut Timeline<SessionTask>,
        events: &mut Vec<SessionEvent>,
    ) {
        self.capture.begin(started_at);
        self.state = CaptureState::Recording { started_at, mode };
        let generation = self.generation;
        let stop_at = started_at + self.capture.loop_duration();
        self.schedule_countdown(timeline, generation, stop_at, now, "Stopping recording in");
        timeline.schedule(
            stop_at - self.guard_interval,
            Scope::Capture(generation),
            SessionTask::CaptureGuard,
        );
        timeline.schedule(stop_at, Scope::Capture(generation), SessionTask::CaptureStop);
        events.push(SessionEvent::status(RECORDING_MESSAGE));
        if mode == CaptureMode::Microphone {
            events.push(SessionEvent::MicCaptureStarted);
        }
        events.push(SessionEvent::CaptureChanged(CaptureStatus::Recording));
        info!(started_at, ?mode, generation, "recording started");
    }

    fn schedule_countdown(
        &self,
        timeline: &mut Timeline<SessionTask>,
        generation: Generation,
        target: f64,
        now: f64,
        prefix: &str,
    ) {
        for seconds in (1..=self.countdown_seconds).rev() {
            let due = target - seconds as f64;
            if due < now {
                continue;
            }
            timeline.schedule(
                due,
                Scope::Capture(generation),
                SessionTask::Notice(format!("{prefix} {seconds}...")),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn controller() -> RecordingController {
        RecordingController::new(4.0, 3, 0.025)
    }

    fn notices(timeline: &mut Timeline<SessionTask>, now: f64) -> Vec<String> {
        let mut out = Vec::new();
        while let Some((_, task)) = timeline.pop_due(now) {
            if let SessionTask::Notice(text) = task {
                out.push(text);
            }
        }
        out
    }

    #[test]
    fn request_arms_and_counts_down() {
        let mut controller = controller();
        let mut timeline = Timeline::new();
        let mut events = Vec::new();
        let plan = controller
            .request_start(3.5, 10.0, &mut timeline, &mut events)
            .unwrap();
        assert_eq!(plan.boundaries, 1);
        assert_eq!(
            controller.state(),
            &CaptureState::Armed {
                boundaries_remaining: 1,
                starts_at: 13.5
            }
        );
        assert!(events.contains(&SessionEvent::CaptureChanged(CaptureStatus::Armed)));
        assert_eq!(
            notices(&mut timeline, 13.0),
            vec!["Recording in 3...", "Recording in 2...", "Recording in 1..."]
        );
    }

    #[test]
    fn overlapping_requests_are_rejected() {
        let mut controller = controller();
        let mut timeline = Timeline::new();
        let mut events = Vec::new();
        controller
            .request_start(3.5, 0.0, &mut timeline, &mut events)
            .unwrap();
        assert!(matches!(
            controller.request_start(3.0, 0.5, &mut timeline, &mut events),
            Err(SyncError::CaptureBusy)
        ));
        assert!(matches!(
            controller.start_now(0.5, CaptureMode::Notes, &mut timeline, &mut events),
            Err(SyncError::CaptureBusy)
        ));
    }

    #[test]
    fn deferred_request_skips_one_boundary() {
        let mut controller = controller();
        let mut timeline = Timeline::new();
        let mut events = Vec::new();
        controller
            .request_start(0.125, 4.0, &mut timeline, &mut events)
            .unwrap();
        assert!(!controller.on_loop_boundary(4.125, CaptureMode::Notes, &mut timeline, &mut events));
        assert!(controller.on_loop_boundary(8.125, CaptureMode::Notes, &mut timeline, &mut events));
        assert_eq!(
            controller.state(),
            &CaptureState::Recording {
                started_at: 8.125,
                mode: CaptureMode::Notes
            }
        );
        assert!(events.contains(&SessionEvent::status(RECORDING_MESSAGE)));
    }

    #[test]
    fn guard_then_stop_finishes_one_loop_later() {
        let mut controller = controller();
        let mut timeline = Timeline::new();
        let mut events = Vec::new();
        controller
            .start_now(2.0, CaptureMode::Notes, &mut timeline, &mut events)
            .unwrap();
        controller.record_note(2.5, Instrument::Keyboard, PitchKey::from(0));

        let mut ran = Vec::new();
        while let Some((scope, task)) = timeline.pop_due(6.0) {
            assert_eq!(scope, Scope::Capture(controller.generation()));
            match task {
                SessionTask::CaptureGuard => {
                    assert!(controller.guard(5.975));
                    ran.push("guard");
                }
                SessionTask::CaptureStop => {
                    controller.finish(6.0, PitchKey::new("x.ogg"), &mut timeline, &mut events);
                    ran.push("stop");
                }
                _ => {}
            }
        }
        assert_eq!(ran, vec!["guard", "stop"]);
        assert_eq!(controller.state(), &CaptureState::PendingSend);
        let event = &controller.capture().recording().events()[0];
        assert_relative_eq!(event.stop_time.unwrap(), 3.975);
        assert!(events.contains(&SessionEvent::status(STOPPED_MESSAGE)));
    }

    #[test]
    fn notes_after_guard_are_not_captured() {
        let mut controller = controller();
        let mut timeline = Timeline::new();
        let mut events = Vec::new();
        controller
            .start_now(0.0, CaptureMode::Notes, &mut timeline, &mut events)
            .unwrap();
        controller.guard(3.975);
        assert!(!controller.record_note(3.98, Instrument::Keyboard, PitchKey::from(0)));
    }

    #[test]
    fn stopping_an_armed_capture_cancels_it() {
        let mut controller = controller();
        let mut timeline = Timeline::new();
        let mut events = Vec::new();
        controller
            .request_start(3.5, 0.0, &mut timeline, &mut events)
            .unwrap();
        assert!(!timeline.is_empty());
        controller.stop(1.0, PitchKey::new("x.ogg"), &mut timeline, &mut events);
        assert_eq!(controller.state(), &CaptureState::Idle);
        assert!(timeline.is_empty());
        assert!(!controller.on_loop_boundary(3.5, CaptureMode::Notes, &mut timeline, &mut events));
    }

    #[test]
    fn manual_stop_finishes_early_and_cancels_pending_tasks() {
        let mut controller = controller();
        let mut timeline = Timeline::new();
        let mut events = Vec::new();
        controller
            .start_now(0.0, CaptureMode::Notes, &mut timeline, &mut events)
            .unwrap();
        controller.record_note(0.5, Instrument::Keyboard, PitchKey::from(100));
        assert!(controller.stop(1.5, PitchKey::new("x.ogg"), &mut timeline, &mut events));
        assert_eq!(controller.state(), &CaptureState::PendingSend);
        assert!(timeline.is_empty());
        let event = &controller.capture().recording().events()[0];
        assert_relative_eq!(event.stop_time.unwrap(), 1.5);
    }

    #[test]
    fn mic_capture_produces_placeholder_take() {
        let mut controller = controller();
        let mut timeline = Timeline::new();
        let mut events = Vec::new();
        let placeholder = PitchKey::mic_upload("lobby", "ana");
        controller
            .start_now(1.0, CaptureMode::Microphone, &mut timeline, &mut events)
            .unwrap();
        assert!(events.contains(&SessionEvent::MicCaptureStarted));
        controller.finish(5.0, placeholder.clone(), &mut timeline, &mut events);
        assert!(events.contains(&SessionEvent::MicCaptureStopped {
            upload_name: placeholder.clone()
        }));

        let uploaded = PitchKey::new("lobby");
        assert!(controller.mic_upload_complete(&placeholder, &uploaded));
        let take = controller.share(&mut events).unwrap();
        assert_eq!(take.events()[0].pitch_key, uploaded);
        assert_eq!(take.events()[0].instrument, Instrument::Mic);
        assert_relative_eq!(take.events()[0].stop_time.unwrap(), 4.0);
    }

    #[test]
    fn share_requires_a_finished_take() {
        let mut controller = controller();
        let mut events = Vec::new();
        assert!(matches!(controller.share(&mut events), Err(SyncError::NothingToShare)));
    }

    #[test]
    fn empty_take_returns_to_idle_on_share() {
        let mut controller = controller();
        let mut timeline = Timeline::new();
        let mut events = Vec::new();
        controller
            .start_now(0.0, CaptureMode::Notes, &mut timeline, &mut events)
            .unwrap();
        controller.finish(4.0, PitchKey::new("x.ogg"), &mut timeline, &mut events);
        assert!(matches!(controller.share(&mut events), Err(SyncError::NothingToShare)));
        assert_eq!(controller.state(), &CaptureState::Idle);
    }

    #[test]
    fn own_entry_is_suppressed_while_holding_a_take() {
        let mut controller = controller();
        let mut timeline = Timeline::new();
        let mut events = Vec::new();
        assert!(!controller.suppresses_own_entry());
        controller
            .start_now(0.0, CaptureMode::Notes, &mut timeline, &mut events)
            .unwrap();
        assert!(controller.suppresses_own_entry());
        controller.record_note(0.2, Instrument::Keyboard, PitchKey::from(0));
        controller.finish(4.0, PitchKey::new("x.ogg"), &mut timeline, &mut events);
        assert!(controller.suppresses_own_entry());
        assert!(controller.pending_take(false).is_none());
        assert!(controller.pending_take(true).is_some());
        controller.discard(&mut events).unwrap();
        assert!(!controller.suppresses_own_entry());
    }
}
