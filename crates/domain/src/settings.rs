use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::DomainError;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetronomeSettings {
    pub accent_hz: f32,
    pub accent_gain: f32,
    pub weak_hz: f32,
    pub weak_gain: f32,
    /// Length of one click in seconds.
    pub click_seconds: f64,
}

impl Default for MetronomeSettings {
    fn default() -> Self {
        Self {
            accent_hz: 408.0,
            accent_gain: 0.2,
            weak_hz: 208.0,
            weak_gain: 0.04,
            click_seconds: 0.1,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KeyboardSettings {
    /// Frequency of pitch key `0`.
    pub base_hz: f32,
    pub gain: f32,
}

impl Default for KeyboardSettings {
    fn default() -> Self {
        Self {
            base_hz: 440.0,
            gain: 0.2,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionSettings {
    /// Loop length in measures.
    pub recording_interval: u32,
    /// Countdown notices before a boundary, one per second.
    pub countdown_seconds: u32,
    pub guard_interval_ms: u64,
    pub pulse_ms: u64,
    pub metronome: MetronomeSettings,
    pub keyboard: KeyboardSettings,
    pub sample_gain: f32,
    pub samples_dir: PathBuf,
    /// Replay a finished but unshared take to its owner at loop start.
    pub preview_pending_take: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            recording_interval: 2,
            countdown_seconds: 3,
            guard_interval_ms: 25,
            pulse_ms: 100,
            metronome: MetronomeSettings::default(),
            keyboard: KeyboardSettings::default(),
            sample_gain: 0.15,
            samples_dir: PathBuf::from("samples"),
            preview_pending_take: false,
        }
    }
}

impl SessionSettings {
    pub fn from_yaml_str(source: &str) -> Result<Self, DomainError> {
        let settings: Self = serde_yaml::from_str(source)
            .map_err(|err| DomainError::Serialization(err.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, DomainError> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|err| {
            DomainError::Serialization(format!("read {}: {err}", path.display()))
        })?;
        Self::from_yaml_str(&source)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.recording_interval == 0 {
            return Err(DomainError::validation(
                "recording_interval must be at least one measure",
            ));
        }
        if self.pulse_ms == 0 {
            return Err(DomainError::validation("pulse_ms must be positive"));
        }
        if !(self.sample_gain >= 0.0 && self.keyboard.gain >= 0.0) {
            return Err(DomainError::validation("gains cannot be negative"));
        }
        Ok(())
    }

    pub fn countdown_lead(&self) -> f64 {
        self.countdown_seconds as f64
    }

    pub fn guard_interval(&self) -> f64 {
        self.guard_interval_ms as f64 / 1000.0
    }

    pub fn pulse_length(&self) -> f64 {
        self.pulse_ms as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let settings = SessionSettings::from_yaml_str(
            "recording_interval: 4\nmetronome:\n  accent_hz: 880.0\n",
        )
        .unwrap();
        assert_eq!(settings.recording_interval, 4);
        assert_eq!(settings.metronome.accent_hz, 880.0);
        assert_eq!(settings.metronome.weak_hz, 208.0);
        assert_eq!(settings.countdown_seconds, 3);
        assert_relative_eq!(settings.guard_interval(), 0.025);
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(SessionSettings::from_yaml_str("recording_interval: 0").is_err());
        assert!(SessionSettings::from_yaml_str("recording_interval: [").is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(SessionSettings::load("does-not-exist.yaml").is_err());
    }
}
