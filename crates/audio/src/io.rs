use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::dsp::downmix_interleaved;

/// Mono audio ready to be played by a voice. Cloning shares the samples.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSample {
    pub sample_rate: u32,
    pub samples: Arc<[f32]>,
}

impl DecodedSample {
    pub fn new(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            samples: samples.into(),
        }
    }

    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Decodes a whole sample file to mono with symphonia.
pub struct AudioDecoder;

impl AudioDecoder {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<DecodedSample> {
        let path = path.as_ref();
        let source = File::open(path).with_context(|| format!("open sample {}", path.display()))?;
        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(extension);
        }
        let stream = MediaSourceStream::new(Box::new(source), Default::default());
        let mut reader = symphonia::default::get_probe()
            .format(&hint, stream, &FormatOptions::default(), &MetadataOptions::default())
            .with_context(|| format!("probe {}", path.display()))?
            .format;

        let track = reader
            .default_track()
            .ok_or_else(|| anyhow!("{} has no audio track", path.display()))?;
        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.unwrap_or(48_000);
        let mut decoder =
            symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

        let mut mono = Vec::new();
        loop {
            let packet = match reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(err)) if err.kind() == ErrorKind::UnexpectedEof => break,
                // corrupt packets are skipped
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(err) => return Err(err.into()),
            };
            if packet.track_id() != track_id {
                continue;
            }
            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(err) => return Err(err.into()),
            };
            let spec = *decoded.spec();
            let mut frames = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            frames.copy_interleaved_ref(decoded);
            mono.extend(downmix_interleaved(frames.samples(), spec.channels.count()));
        }

        Ok(DecodedSample::new(sample_rate, mono))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_handles_missing_file() {
        let result = AudioDecoder::open("does-not-exist.wav");
        assert!(result.is_err());
    }

    #[test]
    fn duration_from_length() {
        let sample = DecodedSample::new(4, vec![0.0; 10]);
        assert_eq!(sample.duration(), 2.5);
        assert_eq!(DecodedSample::new(0, vec![0.0]).duration(), 0.0);
    }
}
