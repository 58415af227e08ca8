use std::sync::Arc;

use loopjam_audio::{AudioError, AudioOutput, DecodedSample, PlayOutcome, SampleKey, VoicePlayer};
use loopjam_domain::{
    Instrument, ParticipantId, PitchKey, Recording, RoommateRegistry, ScheduledNote, SessionSettings,
    TimingConfig,
};
use tracing::{debug, info, instrument, trace, warn};

use crate::clock::{BeatAccent, LoopClock, QuantizedStart, Tick};
use crate::controller::{CaptureMode, CaptureState, RecordingController};
use crate::error::SyncError;
use crate::events::SessionEvent;
use crate::mixer::{loop_playback, ListenerView};
use crate::timeline::{Scope, Timeline};

/// Work deferred onto the session timeline.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionTask {
    PulseOff(BeatAccent),
    Notice(String),
    CaptureGuard,
    CaptureStop,
}

/// Who the local listener is and where they play.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionIdentity {
    pub participant: ParticipantId,
    pub room: String,
    pub display_name: String,
}

impl SessionIdentity {
    pub fn new(participant: ParticipantId, room: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            participant,
            room: room.into(),
            display_name: display_name.into(),
        }
    }

    pub fn mic_upload_name(&self) -> PitchKey {
        PitchKey::mic_upload(&self.room, &self.display_name)
    }
}

/// One playing session: the loop clock, the metronome, live notes, capture,
/// and the playback of everyone's takes at each loop start.
///
/// Not thread-safe by itself; the owner calls [`SchedulerSession::tick`] every
/// tick length and [`SchedulerSession::run_due`] when
/// [`SchedulerSession::next_deadline`] passes.
pub struct SchedulerSession {
    identity: SessionIdentity,
    settings: SessionSettings,
    clock: LoopClock,
    timeline: Timeline<SessionTask>,
    voices: VoicePlayer,
    output: Box<dyn AudioOutput>,
    controller: RecordingController,
    roommates: Arc<RoommateRegistry>,
    instrument: Instrument,
    events: Vec<SessionEvent>,
    sample_requests: Vec<SampleKey>,
}

impl SchedulerSession {
    #[instrument(skip_all, fields(bpm = timing.bpm, signature = timing.time_signature))]
    pub fn start(
        timing: TimingConfig,
        settings: SessionSettings,
        identity: SessionIdentity,
        output: Box<dyn AudioOutput>,
        roommates: Arc<RoommateRegistry>,
    ) -> Result<Self, SyncError> {
        settings.validate()?;
        let now = output.current_time()?;
        let controller = RecordingController::new(
            timing.loop_duration(),
            settings.countdown_seconds,
            settings.guard_interval(),
        );
        info!(
            tick = timing.tick_length(),
            loop_duration = timing.loop_duration(),
            "session started"
        );
        Ok(Self {
            identity,
            clock: LoopClock::new(timing, now),
            timeline: Timeline::new(),
            voices: VoicePlayer::new(settings.keyboard, settings.sample_gain),
            output,
            controller,
            roommates,
            instrument: Instrument::Keyboard,
            events: vec![SessionEvent::Started { timing }],
            sample_requests: Vec::new(),
            settings,
        })
    }

    pub fn timing(&self) -> &TimingConfig {
        self.clock.timing()
    }

    pub fn clock(&self) -> &LoopClock {
        &self.clock
    }

    pub fn capture_state(&self) -> &CaptureState {
        self.controller.state()
    }

    pub fn controller(&self) -> &RecordingController {
        &self.controller
    }

    pub fn selected_instrument(&self) -> &Instrument {
        &self.instrument
    }

    pub fn now(&self) -> Result<f64, SyncError> {
        Ok(self.output.current_time()?)
    }

    /// One heartbeat. Deferred work that is already due runs first, so a
    /// take whose stop time has passed is sealed before the loop's playback
    /// is merged. A take started on a boundary stops at the audio time of the
    /// next boundary, so it is sealed on the tick after that loop start and
    /// its notes join playback one loop later.
    pub fn tick(&mut self) -> Result<Tick, SyncError> {
        let now = self.now()?;
        self.run_due_at(now)?;
        let tick = self.clock.advance(now);
        trace!(subdivision = tick.subdivision, "tick");
        if tick.loop_start {
            self.on_loop_start(tick.next_tick_time)?;
        }
        if let Some(accent) = tick.accent {
            self.click(accent, tick.next_tick_time, now)?;
        }
        Ok(tick)
    }

    /// Runs deferred tasks that are due. Returns how many ran.
    pub fn run_due(&mut self) -> Result<usize, SyncError> {
        let now = self.now()?;
        self.run_due_at(now)
    }

    /// Output-clock time of the next deferred task.
    pub fn next_deadline(&self) -> Option<f64> {
        self.timeline.next_due()
    }

    pub fn select_instrument(&mut self, instrument: Instrument) {
        debug!(%instrument, "instrument selected");
        self.instrument = instrument;
    }

    /// Live note-on: sounds immediately and joins the take while capturing.
    pub fn note_on(&mut self, instrument: Instrument, pitch_key: PitchKey) -> Result<(), SyncError> {
        let outcome = self
            .voices
            .play_note(&mut *self.output, &instrument, &pitch_key, None, None)?;
        self.track(outcome);
        let now = self.now()?;
        if self.controller.record_note(now, instrument, pitch_key) {
            trace!("note captured");
        }
        Ok(())
    }

    /// Live note-on with whatever instrument is selected.
    pub fn note_on_selected(&mut self, pitch_key: PitchKey) -> Result<(), SyncError> {
        self.note_on(self.instrument.clone(), pitch_key)
    }

    /// Live note-off. Releasing a key that is not held is a no-op.
    pub fn note_off(&mut self, pitch_key: &PitchKey) -> Result<(), SyncError> {
        self.voices.stop_note(&mut *self.output, pitch_key)?;
        let now = self.now()?;
        self.controller.stop_recording_note(now, pitch_key);
        Ok(())
    }

    /// Arms a recording that starts on a loop boundary.
    pub fn request_recording(&mut self) -> Result<QuantizedStart, SyncError> {
        let now = self.now()?;
        let until = self.clock.time_until_next_loop(now);
        self.controller
            .request_start(until, now, &mut self.timeline, &mut self.events)
    }

    /// Starts recording right away.
    pub fn start_recording(&mut self) -> Result<(), SyncError> {
        let now = self.now()?;
        let mode = CaptureMode::for_instrument(&self.instrument);
        self.controller
            .start_now(now, mode, &mut self.timeline, &mut self.events)
    }

    pub fn stop_recording(&mut self) -> Result<(), SyncError> {
        let now = self.now()?;
        let upload_name = self.identity.mic_upload_name();
        if self
            .controller
            .stop(now, upload_name, &mut self.timeline, &mut self.events)
        {
            self.voices.stop_all(&mut *self.output)?;
        }
        Ok(())
    }

    /// Hands the finished take over for publishing.
    pub fn share_recording(&mut self) -> Result<Recording, SyncError> {
        let recording = self.controller.share(&mut self.events)?;
        info!(events = recording.len(), "recording shared");
        self.events
            .push(SessionEvent::RecordingShared(recording.clone()));
        Ok(recording)
    }

    pub fn discard_recording(&mut self) -> Result<(), SyncError> {
        self.controller.discard(&mut self.events)
    }

    /// Installs a new roommate snapshot; read at the next loop start.
    pub fn replace_roommates(&mut self, roommates: Arc<RoommateRegistry>) {
        debug!(participants = roommates.len(), "roommates replaced");
        self.roommates = roommates;
    }

    /// Records the confirmed name of an uploaded mic take.
    pub fn mic_upload_complete(&mut self, uploaded: PitchKey) -> bool {
        let placeholder = self.identity.mic_upload_name();
        self.controller.mic_upload_complete(&placeholder, &uploaded)
    }

    pub fn sample_ready(
        &mut self,
        key: SampleKey,
        result: Result<DecodedSample, AudioError>,
    ) -> Result<usize, SyncError> {
        Ok(self.voices.sample_ready(&mut *self.output, key, result)?)
    }

    /// Samples notes are waiting on that nobody has started loading yet.
    pub fn take_sample_requests(&mut self) -> Vec<SampleKey> {
        std::mem::take(&mut self.sample_requests)
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Stops playback and releases the output. Returns the last events.
    #[instrument(skip_all)]
    pub fn stop(mut self) -> Vec<SessionEvent> {
        if let Err(err) = self.voices.stop_all(&mut *self.output) {
            warn!(error = %err, "could not silence voices while stopping");
        }
        self.voices.reset();
        self.controller.teardown(&mut self.timeline);
        self.timeline.clear();
        self.events.push(SessionEvent::Stopped);
        info!("session stopped");
        std::mem::take(&mut self.events)
    }

    fn run_due_at(&mut self, now: f64) -> Result<usize, SyncError> {
        let mut ran = 0;
        while let Some((scope, task)) = self.timeline.pop_due(now) {
            if let Scope::Capture(generation) = scope {
                if generation != self.controller.generation() {
                    debug!(generation, ?task, "skipping stale task");
                    continue;
                }
            }
            self.run_task(task, now)?;
            ran += 1;
        }
        Ok(ran)
    }

    fn run_task(&mut self, task: SessionTask, now: f64) -> Result<(), SyncError> {
        match task {
            SessionTask::PulseOff(accent) => {
                self.events.push(SessionEvent::Pulse { on: false, accent });
            }
            SessionTask::Notice(text) => self.events.push(SessionEvent::Status(text)),
            SessionTask::CaptureGuard => {
                if self.controller.guard(now) {
                    self.voices.stop_all(&mut *self.output)?;
                }
            }
            SessionTask::CaptureStop => {
                let upload_name = self.identity.mic_upload_name();
                self.controller
                    .finish(now, upload_name, &mut self.timeline, &mut self.events);
            }
        }
        Ok(())
    }

    fn on_loop_start(&mut self, anchor: f64) -> Result<(), SyncError> {
        self.events.push(SessionEvent::LoopStarted { anchor });
        let mode = CaptureMode::for_instrument(&self.instrument);
        self.controller
            .on_loop_boundary(anchor, mode, &mut self.timeline, &mut self.events);

        let view = ListenerView {
            local: &self.identity.participant,
            local_take: self
                .controller
                .pending_take(self.settings.preview_pending_take),
            suppress_own_entry: self.controller.suppresses_own_entry(),
        };
        let notes = loop_playback(view, &self.roommates, anchor, self.timing().loop_duration());
        debug!(anchor, notes = notes.len(), "loop playback merged");
        for note in notes {
            if let Err(err) = self.play_scheduled(note) {
                if err.is_fatal() {
                    return Err(err);
                }
                warn!(error = %err, "loop note dropped");
            }
        }
        Ok(())
    }

    fn play_scheduled(&mut self, note: ScheduledNote) -> Result<(), SyncError> {
        let outcome = self.voices.play_note(
            &mut *self.output,
            &note.instrument,
            &note.pitch_key,
            Some(note.start),
            Some(note.stop),
        )?;
        self.track(outcome);
        Ok(())
    }

    fn click(&mut self, accent: BeatAccent, at: f64, now: f64) -> Result<(), SyncError> {
        let metronome = self.settings.metronome;
        let (frequency, gain) = match accent {
            BeatAccent::Accent => (metronome.accent_hz, metronome.accent_gain),
            BeatAccent::Weak => (metronome.weak_hz, metronome.weak_gain),
        };
        self.voices
            .play_click(&mut *self.output, frequency, gain, at, metronome.click_seconds)?;
        self.events.push(SessionEvent::Pulse { on: true, accent });
        self.timeline.schedule(
            now + self.settings.pulse_length(),
            Scope::Session,
            SessionTask::PulseOff(accent),
        );
        Ok(())
    }

    fn track(&mut self, outcome: PlayOutcome) {
        if let PlayOutcome::Deferred {
            key,
            needs_load: true,
        } = outcome
        {
            self.sample_requests.push(key);
        }
    }
}
