use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AudioError {
    #[error("no audio output device available")]
    NoDevice,
    #[error("an audio output is already open in this process")]
    DeviceBusy,
    #[error("audio device lost: {0}")]
    DeviceLost(String),
    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),
    #[error("audio stream error: {0}")]
    Stream(String),
    #[error("sample {key} unavailable: {reason}")]
    SampleLoad { key: String, reason: String },
}

impl AudioError {
    /// Errors after which the output cannot be used again.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AudioError::DeviceLost(_))
    }
}
