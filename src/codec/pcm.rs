//! L16 payload format (RFC 3551): 16-bit signed big-endian PCM.
//!
//! Payloads are split only on sample-frame boundaries so that every RTP
//! packet carries whole samples for all channels.

use bytes::Bytes;
use webrtc::rtp::packetizer::Payloader;

use super::split_at_mtu;

/// Bytes per sample for L16
const BYTES_PER_SAMPLE: usize = 2;

/// Generic PCM (audio/L16) payloader
#[derive(Debug, Clone, Copy)]
pub struct L16Payloader {
    channels: u16,
}

impl L16Payloader {
    /// Create a payloader for `channels` interleaved channels (0 is treated as mono).
    pub fn new(channels: u16) -> Self {
        Self {
            channels: channels.max(1),
        }
    }

    /// Size of one sample frame (all channels)
    pub fn frame_size(&self) -> usize {
        BYTES_PER_SAMPLE * self.channels as usize
    }
}

impl Default for L16Payloader {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Payloader for L16Payloader {
    fn payload(&mut self, mtu: usize, payload: &Bytes) -> Result<Vec<Bytes>, webrtc::rtp::Error> {
        let frame = self.frame_size();
        Ok(split_at_mtu((mtu / frame) * frame, payload))
    }

    fn clone_to(&self) -> Box<dyn Payloader + Send + Sync> {
        Box::new(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stereo_split_on_frame_boundary() {
        let mut payloader = L16Payloader::new(2);
        // 20 ms of 48 kHz stereo = 960 frames * 4 bytes
        let chunk = Bytes::from(vec![0u8; 3840]);
        let out = payloader.payload(1178, &chunk).unwrap();
        assert!(out.iter().all(|p| p.len() % 4 == 0));
        assert_eq!(out[0].len(), 1176);
        assert_eq!(out.iter().map(|p| p.len()).sum::<usize>(), 3840);
    }

    #[test]
    fn test_mtu_smaller_than_frame() {
        let mut payloader = L16Payloader::new(2);
        assert!(payloader
            .payload(3, &Bytes::from_static(&[0; 8]))
            .unwrap()
            .is_empty());
    }
}
