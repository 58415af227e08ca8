use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AudioError;
use crate::io::DecodedSample;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct StreamConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub buffer_size: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            buffer_size: 512,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(pub u64);

#[derive(Clone, Debug)]
pub enum VoiceSource {
    Tone { frequency: f32 },
    Sample(DecodedSample),
}

/// One voice to be rendered on the output clock.
#[derive(Clone, Debug)]
pub struct VoiceRequest {
    pub source: VoiceSource,
    /// Output-clock seconds; a time already past starts immediately.
    pub start: f64,
    /// Output-clock seconds; `None` sounds until stopped.
    pub stop: Option<f64>,
    pub gain: f32,
}

/// An open audio output with its own clock.
pub trait AudioOutput: Send {
    fn config(&self) -> StreamConfig;
    /// Seconds elapsed on the output clock.
    fn current_time(&self) -> Result<f64, AudioError>;
    fn start_voice(&mut self, request: VoiceRequest) -> Result<VoiceId, AudioError>;
    /// Silences a voice at `at`, or right away. Unknown ids are ignored.
    fn stop_voice(&mut self, id: VoiceId, at: Option<f64>) -> Result<(), AudioError>;
}

pub trait AudioBackend: Send + Sync {
    fn open_output(&self, config: &StreamConfig) -> Result<Box<dyn AudioOutput>, AudioError>;
}

/// Voice as seen by [`NullOutput`].
#[derive(Clone, Debug)]
pub struct VoiceRecord {
    pub id: VoiceId,
    pub source: VoiceSource,
    pub start: f64,
    pub stop: Option<f64>,
    pub gain: f32,
    pub stopped_at: Option<f64>,
}

impl VoiceRecord {
    pub fn frequency(&self) -> Option<f32> {
        match self.source {
            VoiceSource::Tone { frequency } => Some(frequency),
            VoiceSource::Sample(_) => None,
        }
    }
}

#[derive(Debug, Default)]
struct NullState {
    time: f64,
    next_id: u64,
    voices: Vec<VoiceRecord>,
    lost: Option<String>,
    rejections: usize,
}

/// Silent output with a manually driven clock. Clones share state, so a
/// test can keep one handle while the session owns another.
#[derive(Clone, Debug, Default)]
pub struct NullOutput {
    config: StreamConfig,
    state: Arc<Mutex<NullState>>,
}

impl NullOutput {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            state: Arc::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, NullState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_time(&self, time: f64) {
        self.state().time = time;
    }

    pub fn advance(&self, seconds: f64) {
        self.state().time += seconds;
    }

    pub fn now(&self) -> f64 {
        self.state().time
    }

    /// Every voice ever started, in start order.
    pub fn voices(&self) -> Vec<VoiceRecord> {
        self.state().voices.clone()
    }

    pub fn clear_voices(&self) {
        self.state().voices.clear();
    }

    /// Simulates the device disappearing.
    pub fn lose_device(&self, reason: impl Into<String>) {
        self.state().lost = Some(reason.into());
    }

    /// Makes the next `count` voice starts fail as a full queue would.
    pub fn reject_voices(&self, count: usize) {
        self.state().rejections = count;
    }

    fn check(state: &NullState) -> Result<(), AudioError> {
        match &state.lost {
            Some(reason) => Err(AudioError::DeviceLost(reason.clone())),
            None => Ok(()),
        }
    }
}

impl AudioOutput for NullOutput {
    fn config(&self) -> StreamConfig {
        self.config
    }

    fn current_time(&self) -> Result<f64, AudioError> {
        let state = self.state();
        Self::check(&state)?;
        Ok(state.time)
    }

    fn start_voice(&mut self, request: VoiceRequest) -> Result<VoiceId, AudioError> {
        let mut state = self.state();
        Self::check(&state)?;
        if state.rejections > 0 {
            state.rejections -= 1;
            return Err(AudioError::Stream("voice queue full".into()));
        }
        state.next_id += 1;
        let id = VoiceId(state.next_id);
        state.voices.push(VoiceRecord {
            id,
            source: request.source,
            start: request.start,
            stop: request.stop,
            gain: request.gain,
            stopped_at: None,
        });
        Ok(id)
    }

    fn stop_voice(&mut self, id: VoiceId, at: Option<f64>) -> Result<(), AudioError> {
        let mut state = self.state();
        Self::check(&state)?;
        let now = state.time;
        if let Some(voice) = state.voices.iter_mut().find(|voice| voice.id == id) {
            voice.stopped_at.get_or_insert(at.unwrap_or(now));
        }
        Ok(())
    }
}

/// Backend handing out [`NullOutput`]s that share one state.
#[derive(Clone, Debug, Default)]
pub struct NullBackend {
    output: NullOutput,
}

impl NullBackend {
    pub fn with_output(output: NullOutput) -> Self {
        Self { output }
    }

    pub fn output(&self) -> &NullOutput {
        &self.output
    }
}

impl AudioBackend for NullBackend {
    fn open_output(&self, config: &StreamConfig) -> Result<Box<dyn AudioOutput>, AudioError> {
        debug!(?config, "opening null audio output");
        let mut output = self.output.clone();
        output.config = *config;
        Ok(Box::new(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_backend_returns_config() {
        let backend = NullBackend::default();
        let config = StreamConfig {
            buffer_size: 128,
            ..Default::default()
        };
        let output = backend.open_output(&config).unwrap();
        assert_eq!(output.config().buffer_size, 128);
    }

    #[test]
    fn null_output_tracks_voices_and_clock() {
        let handle = NullOutput::default();
        let mut output: Box<dyn AudioOutput> = Box::new(handle.clone());
        handle.set_time(2.0);
        let id = output
            .start_voice(VoiceRequest {
                source: VoiceSource::Tone { frequency: 440.0 },
                start: 2.5,
                stop: None,
                gain: 0.2,
            })
            .unwrap();
        handle.advance(1.0);
        output.stop_voice(id, None).unwrap();
        output.stop_voice(VoiceId(99), None).unwrap();
        let voices = handle.voices();
        assert_eq!(voices.len(), 1);
        assert_eq!(voices[0].stopped_at, Some(3.0));
        assert_eq!(voices[0].frequency(), Some(440.0));
    }

    #[test]
    fn lost_device_fails_every_call() {
        let handle = NullOutput::default();
        let mut output: Box<dyn AudioOutput> = Box::new(handle.clone());
        handle.lose_device("unplugged");
        assert!(matches!(output.current_time(), Err(AudioError::DeviceLost(_))));
        assert!(output.stop_voice(VoiceId(1), None).is_err());
    }

    #[test]
    fn rejected_voices_fail_without_losing_the_output() {
        let handle = NullOutput::default();
        let mut output: Box<dyn AudioOutput> = Box::new(handle.clone());
        handle.reject_voices(1);
        let request = VoiceRequest {
            source: VoiceSource::Tone { frequency: 440.0 },
            start: 0.0,
            stop: Some(0.1),
            gain: 0.2,
        };
        let err = output.start_voice(request.clone()).unwrap_err();
        assert!(!err.is_fatal());
        assert!(output.start_voice(request).is_ok());
        assert_eq!(handle.voices().len(), 1);
    }
}
