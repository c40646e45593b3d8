//! Local output tracks and the send primitive they write to.
//!
//! A track is bound once per destination after codec negotiation. Each
//! destination supplies a [`TrackLocalContext`]: its id, the SSRC and
//! codecs it negotiated, and an [`RtpWriter`] that puts packets on the
//! wire.

pub mod local;

pub use local::LocalAudioTrack;

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::codec::CodecParameters;
use crate::error::TransportError;
use crate::media::Sample;
use crate::rtp::RtpPacket;

/// Transport send primitive for one destination.
pub trait RtpWriter: Send + Sync {
    /// Send one packet. Returns the number of bytes written.
    fn write_rtp(&self, packet: &RtpPacket) -> io::Result<usize>;
}

/// Anything that accepts timed samples (implemented by output tracks).
pub trait SampleWriter: Send + Sync {
    fn write_sample(&self, sample: &Sample) -> Result<(), TransportError>;
}

/// Negotiated state handed to [`LocalAudioTrack::bind`] for one destination.
#[derive(Clone)]
pub struct TrackLocalContext {
    /// Unique id of the destination (connection)
    pub id: String,
    /// SSRC negotiated for this destination
    pub ssrc: u32,
    /// Codecs the remote side accepted, with their payload types
    pub codecs: Vec<CodecParameters>,
    /// Where packets go
    pub writer: Arc<dyn RtpWriter>,
}

impl std::fmt::Debug for TrackLocalContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackLocalContext")
            .field("id", &self.id)
            .field("ssrc", &self.ssrc)
            .field("codecs", &self.codecs)
            .finish()
    }
}

/// Output track statistics (lock-free atomic updates).
#[derive(Debug, Default)]
pub struct TrackStats {
    pub packets_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub send_errors: AtomicU64,
    pub padding_packets: AtomicU64,
    /// Frames dropped because they did not fit one packet
    pub frames_too_large: AtomicU64,
}

impl TrackStats {
    pub fn snapshot(&self) -> TrackStatsSnapshot {
        TrackStatsSnapshot {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            padding_packets: self.padding_packets.load(Ordering::Relaxed),
            frames_too_large: self.frames_too_large.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of output track statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackStatsSnapshot {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub send_errors: u64,
    pub padding_packets: u64,
    pub frames_too_large: u64,
}
