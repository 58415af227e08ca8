use std::collections::HashMap;

use loopjam_domain::{Instrument, KeyboardSettings, PitchKey};
use tracing::{debug, warn};

use crate::backend::{AudioOutput, VoiceId, VoiceRequest, VoiceSource};
use crate::dsp::detuned_frequency;
use crate::error::AudioError;
use crate::io::DecodedSample;
use crate::samples::SampleKey;

/// How a note is produced, decided once when the note is played.
#[derive(Clone, Debug, PartialEq)]
pub enum VoiceKind {
    SynthesizedTone { frequency: f32 },
    SampledInstrument(SampleKey),
}

impl VoiceKind {
    pub fn resolve(instrument: &Instrument, pitch_key: &PitchKey, keyboard: &KeyboardSettings) -> Self {
        match instrument {
            Instrument::Keyboard => VoiceKind::SynthesizedTone {
                frequency: detuned_frequency(keyboard.base_hz, pitch_key.cents().unwrap_or(0.0)),
            },
            other => VoiceKind::SampledInstrument(SampleKey::new(other.clone(), pitch_key.clone())),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PlayOutcome {
    Started(VoiceId),
    /// Waiting for the sample to arrive. `needs_load` is set for the first
    /// note that asked for it; later notes join the same wait.
    Deferred { key: SampleKey, needs_load: bool },
}

/// Held voices by pitch key, so a note-off finds the note-on it closes.
#[derive(Debug, Default)]
pub struct ActiveVoiceTable {
    voices: HashMap<PitchKey, VoiceId>,
}

impl ActiveVoiceTable {
    pub fn insert(&mut self, key: PitchKey, id: VoiceId) -> Option<VoiceId> {
        self.voices.insert(key, id)
    }

    pub fn remove(&mut self, key: &PitchKey) -> Option<VoiceId> {
        self.voices.remove(key)
    }

    pub fn contains(&self, key: &PitchKey) -> bool {
        self.voices.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    fn drain(&mut self) -> impl Iterator<Item = (PitchKey, VoiceId)> + '_ {
        self.voices.drain()
    }
}

#[derive(Clone, Copy, Debug)]
struct PendingNote {
    start: Option<f64>,
    stop: Option<f64>,
}

pub struct VoicePlayer {
    keyboard: KeyboardSettings,
    sample_gain: f32,
    active: ActiveVoiceTable,
    samples: HashMap<SampleKey, DecodedSample>,
    pending: HashMap<SampleKey, Vec<PendingNote>>,
}

impl VoicePlayer {
    pub fn new(keyboard: KeyboardSettings, sample_gain: f32) -> Self {
        Self {
            keyboard,
            sample_gain,
            active: ActiveVoiceTable::default(),
            samples: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    pub fn active(&self) -> &ActiveVoiceTable {
        &self.active
    }

    pub fn is_pending(&self, key: &SampleKey) -> bool {
        self.pending.contains_key(key)
    }

    /// Plays a note. Without `stop` the voice is held under `pitch_key`
    /// until [`VoicePlayer::stop_note`]; with `stop` it ends by itself.
    pub fn play_note(
        &mut self,
        output: &mut dyn AudioOutput,
        instrument: &Instrument,
        pitch_key: &PitchKey,
        start: Option<f64>,
        stop: Option<f64>,
    ) -> Result<PlayOutcome, AudioError> {
        match VoiceKind::resolve(instrument, pitch_key, &self.keyboard) {
            VoiceKind::SynthesizedTone { frequency } => {
                let gain = self.keyboard.gain;
                self.start(output, pitch_key, VoiceSource::Tone { frequency }, gain, start, stop)
            }
            VoiceKind::SampledInstrument(key) => {
                if let Some(sample) = self.samples.get(&key).cloned() {
                    let gain = self.sample_gain;
                    return self.start(output, pitch_key, VoiceSource::Sample(sample), gain, start, stop);
                }
                let queue = self.pending.entry(key.clone()).or_default();
                let needs_load = queue.is_empty();
                queue.push(PendingNote { start, stop });
                debug!(%key, needs_load, "note waiting for sample");
                Ok(PlayOutcome::Deferred { key, needs_load })
            }
        }
    }

    /// Untracked synthesized click, used by the metronome.
    pub fn play_click(
        &mut self,
        output: &mut dyn AudioOutput,
        frequency: f32,
        gain: f32,
        at: f64,
        length: f64,
    ) -> Result<VoiceId, AudioError> {
        output.start_voice(VoiceRequest {
            source: VoiceSource::Tone { frequency },
            start: at,
            stop: Some(at + length),
            gain,
        })
    }

    /// Silences the held voice for `pitch_key`. Returns whether one was held;
    /// an unknown or already stopped key is not an error.
    pub fn stop_note(&mut self, output: &mut dyn AudioOutput, pitch_key: &PitchKey) -> Result<bool, AudioError> {
        if let Some(id) = self.active.remove(pitch_key) {
            output.stop_voice(id, None)?;
            return Ok(true);
        }
        // a held note released before its sample arrived never starts
        for (key, notes) in self.pending.iter_mut() {
            if &key.pitch_key == pitch_key {
                notes.retain(|note| note.stop.is_some());
            }
        }
        Ok(false)
    }

    /// Silences every held voice and returns how many there were.
    pub fn stop_all(&mut self, output: &mut dyn AudioOutput) -> Result<usize, AudioError> {
        let held: Vec<_> = self.active.drain().collect();
        for (_, id) in &held {
            output.stop_voice(*id, None)?;
        }
        for notes in self.pending.values_mut() {
            notes.retain(|note| note.stop.is_some());
        }
        Ok(held.len())
    }

    /// Delivers a finished sample load and plays the notes waiting on it.
    /// A failed load drops those notes; other voices are unaffected.
    pub fn sample_ready(
        &mut self,
        output: &mut dyn AudioOutput,
        key: SampleKey,
        result: Result<DecodedSample, AudioError>,
    ) -> Result<usize, AudioError> {
        let notes = self.pending.remove(&key).unwrap_or_default();
        let sample = match result {
            Ok(sample) => sample,
            Err(err) => {
                warn!(%key, error = %err, dropped = notes.len(), "sample load failed");
                return Ok(0);
            }
        };
        self.samples.insert(key.clone(), sample.clone());
        let now = output.current_time()?;
        let mut started = 0;
        for note in notes {
            if matches!(note.stop, Some(stop) if stop <= now) {
                continue;
            }
            self.start(
                output,
                &key.pitch_key,
                VoiceSource::Sample(sample.clone()),
                self.sample_gain,
                note.start,
                note.stop,
            )?;
            started += 1;
        }
        Ok(started)
    }

    /// Forgets held voices and pending loads without touching the output.
    pub fn reset(&mut self) {
        self.active = ActiveVoiceTable::default();
        self.pending.clear();
    }

    fn start(
        &mut self,
        output: &mut dyn AudioOutput,
        pitch_key: &PitchKey,
        source: VoiceSource,
        gain: f32,
        start: Option<f64>,
        stop: Option<f64>,
    ) -> Result<PlayOutcome, AudioError> {
        let start = match start {
            Some(start) => start,
            None => output.current_time()?,
        };
        let id = output.start_voice(VoiceRequest {
            source,
            start,
            stop,
            gain,
        })?;
        if stop.is_none() {
            if let Some(previous) = self.active.insert(pitch_key.clone(), id) {
                output.stop_voice(previous, None)?;
            }
        }
        Ok(PlayOutcome::Started(id))
    }
}
