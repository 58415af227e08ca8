use serde::{Deserialize, Serialize};

use crate::DomainError;

/// Ticks per beat. The scheduler heartbeat is always a sixteenth note.
pub const SUBDIVISIONS_PER_BEAT: u32 = 4;

/// Shortest tick the scheduler can keep up with.
pub const MIN_TICK_SECONDS: f64 = 0.001;
/// Longest tick accepted, a quarter beat at 0.25 bpm.
pub const MAX_TICK_SECONDS: f64 = 60.0;

const LOOP_HEADROOM: u32 = 2;

/// Tempo and loop geometry for one playing session.
///
/// A new session recomputes this; it never changes while the scheduler runs.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct TimingConfig {
    /// Beats per minute.
    pub bpm: f64,
    /// Beats per measure.
    pub time_signature: u32,
    /// Loop length in measures.
    pub recording_interval: u32,
}

impl TimingConfig {
    pub fn new(bpm: f64, time_signature: u32, recording_interval: u32) -> Result<Self, DomainError> {
        if !bpm.is_finite() || bpm <= 0.0 {
            return Err(DomainError::validation("bpm must be a positive number"));
        }
        if time_signature == 0 {
            return Err(DomainError::validation(
                "time signature needs at least one beat per measure",
            ));
        }
        if recording_interval == 0 {
            return Err(DomainError::validation(
                "a loop must span at least one measure",
            ));
        }
        let timing = Self {
            bpm,
            time_signature,
            recording_interval,
        };
        let tick = timing.tick_length();
        if !(MIN_TICK_SECONDS..=MAX_TICK_SECONDS).contains(&tick) {
            return Err(DomainError::validation(format!(
                "{bpm} bpm gives a {tick}s tick, outside {MIN_TICK_SECONDS}s..={MAX_TICK_SECONDS}s"
            )));
        }
        // the counter must be able to step one past the last subdivision
        SUBDIVISIONS_PER_BEAT
            .checked_mul(time_signature)
            .and_then(|ticks| ticks.checked_mul(recording_interval))
            .and_then(|total| total.checked_add(LOOP_HEADROOM))
            .ok_or_else(|| DomainError::validation("loop has too many subdivisions"))?;
        Ok(timing)
    }

    pub fn seconds_per_beat(&self) -> f64 {
        60.0 / self.bpm
    }

    /// Period of one scheduler tick in seconds.
    pub fn tick_length(&self) -> f64 {
        self.seconds_per_beat() / SUBDIVISIONS_PER_BEAT as f64
    }

    /// Number of ticks in one loop; the subdivision counter wraps here.
    pub fn total_subdivisions(&self) -> u32 {
        SUBDIVISIONS_PER_BEAT * self.time_signature * self.recording_interval
    }

    pub fn measure_duration(&self) -> f64 {
        self.seconds_per_beat() * self.time_signature as f64
    }

    pub fn loop_duration(&self) -> f64 {
        self.measure_duration() * self.recording_interval as f64
    }

    /// Subdivision carrying beat one of the second measure.
    pub fn second_measure_subdivision(&self) -> u32 {
        2 + SUBDIVISIONS_PER_BEAT * self.time_signature
    }
}
