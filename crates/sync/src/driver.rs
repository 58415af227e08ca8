use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use loopjam_audio::{AudioBackend, AudioError, DecodedSample, SampleKey, SampleLoader, StreamConfig};
use loopjam_domain::{DomainError, Instrument, PitchKey, RoommateRegistry, SessionSettings, TimingConfig};
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::error::SyncError;
use crate::events::SessionEvent;
use crate::session::{SchedulerSession, SessionIdentity};

/// Requests from the UI, the network, and MIDI, applied in arrival order.
#[derive(Debug, PartialEq)]
pub enum SessionCommand {
    StartPlaying { bpm: f64, time_signature: u32 },
    StopPlaying,
    Roommates(RoommateRegistry),
    /// `instrument: None` plays the session's selected instrument.
    NoteOn {
        instrument: Option<Instrument>,
        pitch_key: PitchKey,
    },
    NoteOff { pitch_key: PitchKey },
    SelectInstrument(Instrument),
    RequestRecording,
    StartRecordingNow,
    StopRecording,
    ShareRecording,
    DiscardRecording,
    MicUploaded(PitchKey),
    Shutdown,
}

enum Wake {
    Command(Option<SessionCommand>),
    Tick,
    Deadline,
    SampleLoaded(SampleKey, Result<DecodedSample, AudioError>),
}

/// Owns the session and is the only task that touches it: commands, ticks,
/// deferred deadlines, and finished sample loads are all applied here in
/// turn.
pub struct SessionDriver {
    backend: Arc<dyn AudioBackend>,
    loader: Arc<dyn SampleLoader>,
    settings: SessionSettings,
    identity: SessionIdentity,
    stream: StreamConfig,
    events: mpsc::UnboundedSender<SessionEvent>,
}

struct Playing {
    session: SchedulerSession,
    ticker: Interval,
}

impl SessionDriver {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        loader: Arc<dyn SampleLoader>,
        settings: SessionSettings,
        identity: SessionIdentity,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            backend,
            loader,
            settings,
            identity,
            stream: StreamConfig::default(),
            events,
        }
    }

    pub fn with_stream_config(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }

    #[instrument(skip_all, fields(participant = %self.identity.participant, room = %self.identity.room))]
    pub async fn run(self, mut commands: mpsc::Receiver<SessionCommand>) -> anyhow::Result<()> {
        let (loaded_tx, mut loaded_rx) = mpsc::unbounded_channel();
        let mut playing: Option<Playing> = None;
        let mut roommates = Arc::new(RoommateRegistry::new());
        let mut instrument = Instrument::Keyboard;

        loop {
            let deadline = match &playing {
                Some(playing) => Self::until_deadline(&playing.session),
                None => None,
            };
            let wake = tokio::select! {
                command = commands.recv() => Wake::Command(command),
                _ = next_tick(&mut playing) => Wake::Tick,
                _ = sleep_for(deadline) => Wake::Deadline,
                Some((key, result)) = loaded_rx.recv() => Wake::SampleLoaded(key, result),
            };

            let result = match wake {
                Wake::Command(None) | Wake::Command(Some(SessionCommand::Shutdown)) => break,
                Wake::Command(Some(command)) => {
                    self.apply(command, &mut playing, &mut roommates, &mut instrument)
                }
                Wake::Tick => match playing.as_mut() {
                    Some(playing) => playing.session.tick().map(|_| ()),
                    None => Ok(()),
                },
                Wake::Deadline => match playing.as_mut() {
                    Some(playing) => playing.session.run_due().map(|_| ()),
                    None => Ok(()),
                },
                Wake::SampleLoaded(key, result) => match playing.as_mut() {
                    Some(playing) => playing.session.sample_ready(key, result).map(|_| ()),
                    None => Ok(()),
                },
            };

            if let Err(err) = result {
                self.report(err, &mut playing);
            }
            if let Some(playing) = playing.as_mut() {
                self.flush(&mut playing.session, &loaded_tx);
            }
        }

        if let Some(playing) = playing.take() {
            self.forward(playing.session.stop());
        }
        info!("session driver finished");
        Ok(())
    }

    fn apply(
        &self,
        command: SessionCommand,
        playing: &mut Option<Playing>,
        roommates: &mut Arc<RoommateRegistry>,
        instrument: &mut Instrument,
    ) -> Result<(), SyncError> {
        debug!(?command, "session command");
        match command {
            SessionCommand::StartPlaying { bpm, time_signature } => {
                if playing.is_some() {
                    debug!("already playing");
                    return Ok(());
                }
                let timing = TimingConfig::new(bpm, time_signature, self.settings.recording_interval)?;
                let period = tick_period(&timing)?;
                let output = self.backend.open_output(&self.stream)?;
                let mut session = SchedulerSession::start(
                    timing,
                    self.settings.clone(),
                    self.identity.clone(),
                    output,
                    Arc::clone(roommates),
                )?;
                session.select_instrument(instrument.clone());
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
                *playing = Some(Playing { session, ticker });
            }
            SessionCommand::StopPlaying => match playing.take() {
                Some(stopped) => self.forward(stopped.session.stop()),
                None => debug!("not playing"),
            },
            SessionCommand::Roommates(registry) => {
                *roommates = Arc::new(registry);
                if let Some(playing) = playing.as_mut() {
                    playing.session.replace_roommates(Arc::clone(roommates));
                }
            }
            SessionCommand::SelectInstrument(selected) => {
                if let Some(playing) = playing.as_mut() {
                    playing.session.select_instrument(selected.clone());
                }
                *instrument = selected;
            }
            SessionCommand::Shutdown => {}
            command => {
                let Some(playing) = playing.as_mut() else {
                    return Err(SyncError::NotPlaying);
                };
                let session = &mut playing.session;
                match command {
                    SessionCommand::NoteOn {
                        instrument: Some(instrument),
                        pitch_key,
                    } => session.note_on(instrument, pitch_key)?,
                    SessionCommand::NoteOn {
                        instrument: None,
                        pitch_key,
                    } => session.note_on_selected(pitch_key)?,
                    SessionCommand::NoteOff { pitch_key } => session.note_off(&pitch_key)?,
                    SessionCommand::RequestRecording => {
                        session.request_recording()?;
                    }
                    SessionCommand::StartRecordingNow => session.start_recording()?,
                    SessionCommand::StopRecording => session.stop_recording()?,
                    SessionCommand::ShareRecording => {
                        session.share_recording()?;
                    }
                    SessionCommand::DiscardRecording => session.discard_recording()?,
                    SessionCommand::MicUploaded(uploaded) => {
                        if !session.mic_upload_complete(uploaded) {
                            warn!("no mic take waiting for an upload name");
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Fatal errors end the session; anything else is reported and play
    /// continues.
    fn report(&self, err: SyncError, playing: &mut Option<Playing>) {
        if err.is_fatal() {
            error!(error = %err, "session lost");
            if let Some(lost) = playing.take() {
                self.forward(lost.session.stop());
            }
            self.send(SessionEvent::SessionLost {
                reason: err.to_string(),
            });
        } else {
            warn!(error = %err, "session command failed");
            self.send(SessionEvent::Status(err.to_string()));
        }
    }

    fn flush(
        &self,
        session: &mut SchedulerSession,
        loaded: &mpsc::UnboundedSender<(SampleKey, Result<DecodedSample, AudioError>)>,
    ) {
        self.forward(session.drain_events());
        for key in session.take_sample_requests() {
            let loader = Arc::clone(&self.loader);
            let loaded = loaded.clone();
            tokio::spawn(async move {
                let result = loader.load(&key).await;
                let _ = loaded.send((key, result));
            });
        }
    }

    fn forward(&self, events: Vec<SessionEvent>) {
        for event in events {
            self.send(event);
        }
    }

    fn send(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }

    fn until_deadline(session: &SchedulerSession) -> Option<Duration> {
        let deadline = session.next_deadline()?;
        let now = session.now().ok()?;
        Some(Duration::from_secs_f64((deadline - now).max(0.0)))
    }
}

async fn next_tick(playing: &mut Option<Playing>) {
    match playing {
        Some(playing) => {
            playing.ticker.tick().await;
        }
        None => pending::<()>().await,
    }
}

async fn sleep_for(wait: Option<Duration>) {
    match wait {
        Some(wait) => sleep(wait).await,
        None => pending::<()>().await,
    }
}

/// Interval period for one tick. `interval_at` rejects a zero period.
fn tick_period(timing: &TimingConfig) -> Result<Duration, SyncError> {
    match Duration::try_from_secs_f64(timing.tick_length()) {
        Ok(period) if !period.is_zero() => Ok(period),
        _ => Err(DomainError::validation(format!(
            "tick of {}s cannot drive a timer",
            timing.tick_length()
        ))
        .into()),
    }
}
