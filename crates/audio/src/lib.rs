pub mod backend;
pub mod cpal_output;
pub mod dsp;
pub mod error;
pub mod io;
pub mod samples;
pub mod voice;

pub use backend::{
    AudioBackend, AudioOutput, NullBackend, NullOutput, StreamConfig, VoiceId, VoiceRecord,
    VoiceRequest, VoiceSource,
};
pub use cpal_output::{CpalBackend, CpalOutput};
pub use error::AudioError;
pub use io::{AudioDecoder, DecodedSample};
pub use samples::{FileSampleLoader, SampleKey, SampleLoader};
pub use voice::{ActiveVoiceTable, PlayOutcome, VoiceKind, VoicePlayer};
