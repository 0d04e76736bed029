//! PCM helpers: format conversion, duration and level metering.

use std::time::Duration;

/// Convert i16 PCM samples to f32 (range -1.0 .. 1.0).
pub fn pcm_i16_to_f32(input: &[i16]) -> Vec<f32> {
    input.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Convert f32 PCM samples to i16, clipping out-of-range values.
pub fn pcm_f32_to_i16(input: &[f32]) -> Vec<i16> {
    input
        .iter()
        .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
        .collect()
}

/// Playback duration of `sample_count` mono samples.
pub fn duration_of(sample_count: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(sample_count as f64 / sample_rate as f64)
}

/// Compute RMS (root mean square) level of an f32 PCM buffer.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i16_round_trip_extremes() {
        let f = pcm_i16_to_f32(&[i16::MIN, 0, i16::MAX]);
        assert_eq!(f[0], -1.0);
        assert_eq!(f[1], 0.0);
        assert!(f[2] > 0.999);
        assert_eq!(pcm_f32_to_i16(&[2.0, -2.0]), vec![32767, -32768]);
    }

    #[test]
    fn duration() {
        assert_eq!(duration_of(24000, 24000), Duration::from_secs(1));
        assert_eq!(duration_of(12000, 24000), Duration::from_millis(500));
        assert_eq!(duration_of(100, 0), Duration::ZERO);
    }

    #[test]
    fn rms_levels() {
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(rms(&[0.5, -0.5]), 0.5);
    }
}
