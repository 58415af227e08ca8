use std::f64::consts::TAU;

use crate::io::DecodedSample;

/// Frequency of a tone detuned by `cents` from `base_hz`.
pub fn detuned_frequency(base_hz: f32, cents: f32) -> f32 {
    base_hz * 2f32.powf(cents / 1200.0)
}

pub fn tone_sample(frequency: f32, seconds: f64) -> f32 {
    (TAU * frequency as f64 * seconds).sin() as f32
}

/// Sample value `seconds` into `sample`, or `None` past its end.
pub fn sample_at(sample: &DecodedSample, seconds: f64) -> Option<f32> {
    if seconds < 0.0 {
        return Some(0.0);
    }
    let index = (seconds * sample.sample_rate as f64) as usize;
    sample.samples.get(index).copied()
}

pub fn downmix_interleaved(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn octave_detune_doubles_frequency() {
        assert_relative_eq!(detuned_frequency(440.0, 1200.0), 880.0, max_relative = 1e-5);
        assert_relative_eq!(detuned_frequency(440.0, -1200.0), 220.0, max_relative = 1e-5);
        assert_relative_eq!(detuned_frequency(440.0, 0.0), 440.0);
    }

    #[test]
    fn downmix_averages_frames() {
        let mono = downmix_interleaved(&[1.0, 0.0, 0.5, 0.5, -1.0, 1.0], 2);
        assert_eq!(mono, vec![0.5, 0.5, 0.0]);
        assert_eq!(downmix_interleaved(&[0.1, 0.2], 1), vec![0.1, 0.2]);
    }

    #[test]
    fn sample_lookup_ends_with_buffer() {
        let sample = DecodedSample::new(2, vec![0.25, 0.5, 0.75]);
        assert_eq!(sample_at(&sample, 0.5), Some(0.5));
        assert_eq!(sample_at(&sample, 1.5), None);
        assert_eq!(sample_at(&sample, -0.1), Some(0.0));
    }

    #[test]
    fn tone_starts_at_zero_crossing() {
        assert_relative_eq!(tone_sample(440.0, 0.0), 0.0);
        assert_relative_eq!(tone_sample(1.0, 0.25), 1.0, max_relative = 1e-6);
    }
}
