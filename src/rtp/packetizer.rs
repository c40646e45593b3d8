//! Sample to RTP packet conversion for one output track.
//!
//! Built on the `webrtc::rtp` packetizer. The sequencer is shared with the
//! packetizer so that dropped samples can reserve sequence numbers and
//! padding-only packets come from the same sequence space. SSRC and
//! payload type stay at whatever the packetizer was built with; callers
//! sending to several destinations rewrite them per destination.

use std::sync::Arc;

use bytes::Bytes;
use webrtc::rtp::header::Header;
use webrtc::rtp::packet::Packet;
use webrtc::rtp::packetizer::{new_packetizer, Packetizer, Payloader};
use webrtc::rtp::sequence::{new_random_sequencer, Sequencer};

use crate::error::TransportError;

/// RTP version written into generated headers
pub const RTP_VERSION: u8 = 2;
/// Size of the fixed RTP header
pub const FIXED_HEADER_SIZE: usize = 12;
/// One-byte extension block carrying abs-send-time:
/// profile + length words, 1 element header byte, 3 data bytes
pub const ABS_SEND_TIME_OVERHEAD: usize = 8;

/// Sequencer handle that can be given to the packetizer and kept at the
/// same time. Every clone draws from the same counter.
#[derive(Debug, Clone)]
pub struct SharedSequencer(Arc<dyn Sequencer + Send + Sync>);

impl SharedSequencer {
    pub fn new(sequencer: impl Sequencer + Send + Sync + 'static) -> Self {
        Self(Arc::new(sequencer))
    }

    /// Sequencer starting at a random sequence number.
    pub fn random() -> Self {
        Self::new(new_random_sequencer())
    }
}

impl Sequencer for SharedSequencer {
    fn next_sequence_number(&self) -> u16 {
        self.0.next_sequence_number()
    }

    fn roll_over_count(&self) -> u64 {
        self.0.roll_over_count()
    }

    fn clone_to(&self) -> Box<dyn Sequencer + Send + Sync> {
        Box::new(self.clone())
    }
}

/// Packetizer settings fixed at bind time.
#[derive(Debug, Clone)]
pub struct PacketizerConfig {
    /// Maximum packet size on the wire, RTP header included
    pub mtu: usize,
    pub payload_type: u8,
    pub ssrc: u32,
    pub clock_rate: u32,
    /// abs-send-time extension id, `None` to leave packets unextended
    pub abs_send_time_id: Option<u8>,
    /// The payloader sends each frame as a single payload and never splits it
    pub whole_frames: bool,
}

pub struct SamplePacketizer {
    packetizer: Box<dyn Packetizer + Send + Sync>,
    sequencer: SharedSequencer,
    payload_type: u8,
    ssrc: u32,
    clock_rate: u32,
    payload_budget: usize,
    whole_frames: bool,
    /// Timestamp the next packet will carry. Follows the packetizer once
    /// the first media packet reveals its random start.
    timestamp: u32,
}

impl SamplePacketizer {
    pub fn new(
        config: &PacketizerConfig,
        payloader: Box<dyn Payloader + Send + Sync>,
        sequencer: SharedSequencer,
    ) -> Self {
        // The packetizer only reserves the fixed header, so the extension
        // block comes off the MTU it is given
        let mut mtu = config.mtu;
        if config.abs_send_time_id.is_some() {
            mtu = mtu.saturating_sub(ABS_SEND_TIME_OVERHEAD);
        }
        let mtu = mtu.max(FIXED_HEADER_SIZE + 1);

        let mut packetizer = new_packetizer(
            mtu,
            config.payload_type,
            config.ssrc,
            payloader,
            Box::new(sequencer.clone()),
            config.clock_rate,
        );
        if let Some(id) = config.abs_send_time_id {
            packetizer.enable_abs_send_time(id);
        }

        Self {
            packetizer: Box::new(packetizer),
            sequencer,
            payload_type: config.payload_type,
            ssrc: config.ssrc,
            clock_rate: config.clock_rate,
            payload_budget: mtu - FIXED_HEADER_SIZE,
            whole_frames: config.whole_frames,
            timestamp: rand::random::<u32>(),
        }
    }

    pub fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    /// Largest payload a single packet can carry.
    pub fn payload_budget(&self) -> usize {
        self.payload_budget
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Turn one sample into packets.
    ///
    /// All packets share the current timestamp; the accumulator then
    /// advances by `samples`. The last packet carries the marker bit and,
    /// if enabled, the abs-send-time extension.
    ///
    /// A frame that cannot be split and does not fit the payload budget is
    /// rejected with `PayloadTooLarge`. It consumes no sequence numbers, but
    /// its duration is still added to the timestamp.
    pub fn packetize(&mut self, payload: &Bytes, samples: u32) -> Result<Vec<Packet>, TransportError> {
        if self.whole_frames && payload.len() > self.payload_budget {
            self.skip_samples(samples);
            return Err(TransportError::PayloadTooLarge {
                size: payload.len(),
                limit: self.payload_budget,
            });
        }

        let packets = self.packetizer.packetize(payload, samples)?;
        self.timestamp = match packets.first() {
            Some(first) => first.header.timestamp.wrapping_add(samples),
            None => self.timestamp.wrapping_add(samples),
        };
        Ok(packets)
    }

    /// Build `count` padding-only packets at the current timestamp.
    pub fn generate_padding(&mut self, count: u32) -> Vec<Packet> {
        (0..count)
            .map(|_| Packet {
                header: Header {
                    version: RTP_VERSION,
                    padding: true,
                    payload_type: self.payload_type,
                    sequence_number: self.sequencer.next_sequence_number(),
                    timestamp: self.timestamp,
                    ssrc: self.ssrc,
                    ..Default::default()
                },
                payload: Bytes::new(),
            })
            .collect()
    }

    /// Advance the timestamp accumulator without emitting packets.
    pub fn skip_samples(&mut self, samples: u32) {
        self.packetizer.skip_samples(samples);
        self.timestamp = self.timestamp.wrapping_add(samples);
    }

    /// Reserve `count` sequence numbers without emitting packets.
    pub fn skip_sequence_numbers(&mut self, count: u16) {
        for _ in 0..count {
            self.sequencer.next_sequence_number();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use webrtc::rtp::codecs::g7xx::G711Payloader;
    use webrtc::rtp::codecs::opus::OpusPayloader;
    use webrtc::rtp::sequence::new_fixed_sequencer;
    use webrtc::util::MarshalSize;

    fn opus_config() -> PacketizerConfig {
        PacketizerConfig {
            mtu: 1200,
            payload_type: 111,
            ssrc: 0x1234_5678,
            clock_rate: 48000,
            abs_send_time_id: Some(1),
            whole_frames: true,
        }
    }

    fn opus_packetizer(start_seq: u16) -> SamplePacketizer {
        SamplePacketizer::new(
            &opus_config(),
            Box::<OpusPayloader>::default(),
            SharedSequencer::new(new_fixed_sequencer(start_seq)),
        )
    }

    #[test]
    fn test_packetize_advances_timestamp() {
        let mut p = opus_packetizer(10);
        let first = p.packetize(&Bytes::from_static(&[1, 2, 3]), 960).unwrap();
        let second = p.packetize(&Bytes::from_static(&[4, 5]), 960).unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(first[0].header.sequence_number, 10);
        assert!(first[0].header.marker);
        assert_eq!(second[0].header.sequence_number, 11);
        assert_eq!(
            second[0].header.timestamp,
            first[0].header.timestamp.wrapping_add(960)
        );
        assert_eq!(second[0].header.ssrc, 0x1234_5678);
        assert_eq!(p.timestamp(), second[0].header.timestamp.wrapping_add(960));
    }

    #[test]
    fn test_oversized_frame_rejected_without_consuming_sequence() {
        let mut p = opus_packetizer(10);
        assert_eq!(p.payload_budget(), 1200 - 12 - 8);

        let first = p.packetize(&Bytes::from(vec![1u8; 100]), 960).unwrap();
        let err = p.packetize(&Bytes::from(vec![2u8; 3000]), 960).unwrap_err();
        assert!(err.is(ErrorKind::PayloadTooLarge));
        let next = p.packetize(&Bytes::from(vec![3u8; 100]), 960).unwrap();

        assert_eq!(next[0].header.sequence_number, 11);
        assert_eq!(
            next[0].header.timestamp,
            first[0].header.timestamp.wrapping_add(1920)
        );

        // Exactly at the budget still fits
        let full = p.packetize(&Bytes::from(vec![4u8; 1180]), 960).unwrap();
        assert_eq!(full[0].marshal_size(), 1200);
    }

    #[test]
    fn test_split_packets_fit_mtu_with_extension() {
        let config = PacketizerConfig {
            mtu: 100,
            payload_type: 0,
            ssrc: 1,
            clock_rate: 8000,
            abs_send_time_id: Some(1),
            whole_frames: false,
        };
        let mut p = SamplePacketizer::new(
            &config,
            Box::<G711Payloader>::default(),
            SharedSequencer::new(new_fixed_sequencer(0)),
        );
        let packets = p.packetize(&Bytes::from(vec![0xD5u8; 250]), 250).unwrap();

        // budget = 100 - 12 - 8 = 80 bytes
        assert_eq!(packets.len(), 4);
        assert!(packets.iter().all(|p| p.marshal_size() <= 100));
        assert!(packets[..3]
            .iter()
            .all(|p| !p.header.marker && p.header.get_extension(1).is_none()));
        let last = &packets[3];
        assert!(last.header.marker);
        assert_eq!(last.header.get_extension(1).map(|b| b.len()), Some(3));
        assert_eq!(last.marshal_size(), 12 + 8 + 10);
    }

    #[test]
    fn test_padding_shares_sequence_space() {
        let mut p = opus_packetizer(500);
        let media = p.packetize(&Bytes::from_static(&[7; 20]), 960).unwrap();
        let padding = p.generate_padding(2);
        let after = p.packetize(&Bytes::from_static(&[8; 20]), 960).unwrap();

        assert_eq!(media[0].header.sequence_number, 500);
        assert_eq!(padding[0].header.sequence_number, 501);
        assert_eq!(padding[1].header.sequence_number, 502);
        assert_eq!(after[0].header.sequence_number, 503);
        assert!(padding
            .iter()
            .all(|p| p.header.padding && p.header.version == 2 && p.payload.is_empty()));
        // Padding sits at the timestamp the next sample will use
        assert!(padding
            .iter()
            .all(|p| p.header.timestamp == after[0].header.timestamp));
    }

    #[test]
    fn test_skipped_sequence_numbers_are_not_reused() {
        let mut p = opus_packetizer(u16::MAX - 1);
        p.skip_sequence_numbers(3);
        let packets = p.packetize(&Bytes::from_static(&[1; 10]), 960).unwrap();
        // 65534, 65535 and 0 reserved
        assert_eq!(packets[0].header.sequence_number, 1);
    }
}
