//! RTP packets and the per-track packetizer.
//!
//! Packet and header types are `webrtc::rtp`'s; [`packetizer`] adds what a
//! sample track needs on top of the crate's packetizer.

pub mod packetizer;

pub use packetizer::{PacketizerConfig, SamplePacketizer, SharedSequencer};
pub use webrtc::rtp::header::Header as RtpHeader;
pub use webrtc::rtp::packet::Packet as RtpPacket;
