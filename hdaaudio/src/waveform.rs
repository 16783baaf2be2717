//! The test tone played through the output stream
//!
//! There is no floating point math library before boot, so the sine is
//! Bhaskara I's rational approximation evaluated in integers. It stays
//! within two percent of the real curve, which is plenty for a test tone.

use alloc::vec::Vec;
use hda::regs::StreamFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tone {
    pub frequency: u32,
    /// Peak value as a 16-bit sample
    pub amplitude: i16,
    pub duration_ms: u32
}

impl Default for Tone {
    fn default() -> Self {
        Self {
            frequency: 440,
            amplitude: i16::MAX / 4,
            duration_ms: 500
        }
    }
}

/// sin(2 * pi * phase / period) scaled to `amplitude`
fn sine(phase: u64, period: u64, amplitude: i16) -> i16 {
    let half = (period / 2).max(1) as i64;
    let phase = (phase % period) as i64;
    let (x, sign) = if phase < half { (phase, 1) } else { (phase - half, -1) };
    let x = x.min(half);
    // 16x(pi - x) / (5pi^2 - 4x(pi - x)) with pi stretched to `half`
    let p = x * (half - x);
    let val = 16 * p * amplitude as i64 / (5 * half * half - 4 * p);
    (sign * val) as i16
}

/// Renders `tone` as interleaved PCM samples in `format`
///
/// Every channel carries the same sample. Samples wider than 16 bits go
/// in 32-bit containers with the value in the top bits.
pub fn render(format: StreamFormat, tone: Tone) -> Vec<u8> {
    let rate = format.rate() as u64;
    let channels = format.channels() as usize;
    let frames = (rate * tone.duration_ms as u64 / 1000) as usize;
    let container = container_bytes(format);
    let mut samples = Vec::with_capacity(frames * channels * container);
    for frame in 0..frames as u64 {
        // One period is `rate` steps of `frequency`
        let sample = sine(frame * tone.frequency as u64, rate, tone.amplitude);
        for _ in 0..channels {
            match container {
                1 => samples.push((sample >> 8) as i8 as u8),
                2 => samples.extend_from_slice(&sample.to_le_bytes()),
                _ => samples.extend_from_slice(&((sample as i32) << 16).to_le_bytes())
            }
        }
    }
    samples
}

fn container_bytes(format: StreamFormat) -> usize {
    match format.bits() {
        0b000 => 1,
        0b001 => 2,
        _ => 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hda::regs::{SampleBits, SampleRate};

    #[test]
    fn test_sine_hits_its_landmarks() {
        assert_eq!(sine(0, 400, 1000), 0);
        assert_eq!(sine(100, 400, 1000), 1000);
        assert_eq!(sine(200, 400, 1000), 0);
        assert_eq!(sine(300, 400, 1000), -1000);
        assert_eq!(sine(400, 400, 1000), 0);
    }

    #[test]
    fn test_sine_stays_close_to_the_real_curve() {
        // sin(pi / 6) = 0.5
        let val = sine(400, 4800, 10_000);
        assert!((val - 5000).abs() < 200, "{}", val);
    }

    #[test]
    fn test_render_length_matches_format() {
        let tone = Tone { duration_ms: 10, ..Tone::default() };
        let stereo16 = render(StreamFormat::default(), tone);
        assert_eq!(stereo16.len(), 480 * 2 * 2);

        let mono8 = StreamFormat::pcm(SampleRate::Hz8000, SampleBits::Bits8, 1);
        assert_eq!(render(mono8, tone).len(), 80);

        let stereo24 = StreamFormat::pcm(SampleRate::Hz48000, SampleBits::Bits24, 2);
        assert_eq!(render(stereo24, tone).len(), 480 * 2 * 4);
    }

    #[test]
    fn test_channels_carry_the_same_sample() {
        let tone = Tone { duration_ms: 1, ..Tone::default() };
        let samples = render(StreamFormat::default(), tone);
        for frame in samples.chunks(4) {
            assert_eq!(frame[..2], frame[2..]);
        }
        assert!(samples.iter().any(|b| *b != 0));
    }

    #[test]
    fn test_default_tone_splits_into_two_bdl_entries() {
        let samples = render(StreamFormat::default(), Tone::default());
        let entries = hda::stream::split_buffer(0x10_0000, samples.len(), 2).unwrap();
        assert_eq!(entries.len(), 2);
    }
}
