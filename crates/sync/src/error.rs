use loopjam_audio::AudioError;
use loopjam_domain::DomainError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("a recording is already armed or in progress")]
    CaptureBusy,
    #[error("no finished recording to share")]
    NothingToShare,
    #[error("not playing")]
    NotPlaying,
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl SyncError {
    /// The session cannot continue and has to be rebuilt.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Audio(err) if err.is_fatal())
    }
}
