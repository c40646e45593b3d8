//! Timed media samples handed to the packetization engine.
//!
//! Samples are `webrtc::media::Sample`; `prev_dropped_packets` tells the
//! track how many samples were lost before this one so the sequence number
//! and timestamp can account for the gap.

use std::time::Duration;

use bytes::Bytes;

pub use webrtc::media::Sample;

/// Sample carrying `data` for `duration`.
pub fn audio_sample(data: impl Into<Bytes>, duration: Duration) -> Sample {
    Sample {
        data: data.into(),
        duration,
        ..Default::default()
    }
}

/// Timestamp units covered by `duration` at `clock_rate`, rounded.
pub fn units_per_sample(duration: Duration, clock_rate: u32) -> u32 {
    (duration.as_secs_f64() * clock_rate as f64).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units_rounding() {
        assert_eq!(units_per_sample(Duration::from_millis(20), 48000), 960);
        assert_eq!(units_per_sample(Duration::from_millis(20), 8000), 160);

        // 7 ms at 44.1 kHz = 308.7
        assert_eq!(units_per_sample(Duration::from_millis(7), 44100), 309);
    }

    #[test]
    fn test_audio_sample_defaults() {
        let sample = audio_sample(vec![1u8, 2, 3], Duration::from_millis(20));
        assert_eq!(sample.data.as_ref(), &[1, 2, 3]);
        assert_eq!(sample.prev_dropped_packets, 0);
    }
}
