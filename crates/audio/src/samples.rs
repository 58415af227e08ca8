use std::fmt;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use loopjam_domain::{Instrument, PitchKey};
use tracing::{debug, instrument};

use crate::error::AudioError;
use crate::io::{AudioDecoder, DecodedSample};

/// Identifies the audio behind a sampled note: `<instrument>/<pitch key>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SampleKey {
    pub instrument: Instrument,
    pub pitch_key: PitchKey,
}

impl SampleKey {
    pub fn new(instrument: Instrument, pitch_key: PitchKey) -> Self {
        Self {
            instrument,
            pitch_key,
        }
    }

    /// Path below the sample root, rejecting anything that could escape it.
    pub fn relative_path(&self) -> Result<PathBuf, AudioError> {
        let path = Path::new(self.instrument.as_str()).join(self.pitch_key.as_str());
        let well_formed = path.components().count() == 2
            && path
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if well_formed {
            Ok(path)
        } else {
            Err(AudioError::SampleLoad {
                key: self.to_string(),
                reason: "sample key is not a plain instrument/name pair".into(),
            })
        }
    }
}

impl fmt::Display for SampleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.instrument, self.pitch_key)
    }
}

#[async_trait]
pub trait SampleLoader: Send + Sync {
    async fn load(&self, key: &SampleKey) -> Result<DecodedSample, AudioError>;
}

/// Loads `<root>/<instrument>/<pitch key>` from disk.
#[derive(Clone, Debug)]
pub struct FileSampleLoader {
    root: PathBuf,
}

impl FileSampleLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl SampleLoader for FileSampleLoader {
    #[instrument(skip_all, fields(key = %key))]
    async fn load(&self, key: &SampleKey) -> Result<DecodedSample, AudioError> {
        let path = self.root.join(key.relative_path()?);
        debug!(path = %path.display(), "decoding sample");
        let failure = |reason: String| AudioError::SampleLoad {
            key: key.to_string(),
            reason,
        };
        tokio::task::spawn_blocking(move || AudioDecoder::open(&path))
            .await
            .map_err(|err| failure(err.to_string()))?
            .map_err(|err| failure(format!("{err:#}")))
    }
}
