//! webrtc-audio-core: real-time audio media transport core.
//!
//! Turns timed audio frames into sequenced, timestamped RTP packets for an
//! output track, paces their release to wall-clock time, and monitors
//! inbound RTP streams for loss, timing anomalies and arrival rate.
//!
//! ## Features
//!
//! - **Packetization**: `webrtc::rtp` packetizer with a random-start
//!   sequencer, continuous timestamps across dropped frames, MTU splitting,
//!   abs-send-time extension and padding-only packets
//! - **Payload formats**: OPUS, G.711, G.722, H.264, VP8, VP9 from
//!   `webrtc::rtp::codecs`, plus L16
//! - **Multi-destination**: one track fans out to every bound connection,
//!   failures are collected rather than aborting the send
//! - **Pacing**: 20 ms cadence with keepalive filler when the producer is idle
//! - **Inbound monitoring**: gap, underrun and rate diagnostics as typed events
//!
//! Negotiation, ICE and SRTP are out of scope; the host supplies
//! [`track::RtpWriter`] and [`stream::RtpReader`] implementations backed by
//! its transport. [`transport::udp`] provides plain UDP versions.

pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod platform;
pub mod rtp;
pub mod session;
pub mod stream;
pub mod track;
pub mod transport;

// ============================================================================
// Public API
// ============================================================================

pub use codec::{CodecCapability, CodecKind, CodecParameters};
pub use config::EngineConfig;
pub use error::{flatten_errs, ErrorKind, MultiError, TransportError};
pub use events::{Diagnostic, EventSink, RemoteTrackInfo, TrackEvent};
pub use media::Sample;
pub use rtp::{RtpHeader, RtpPacket};
pub use session::Session;
pub use stream::{InboundMonitor, PacingProducer, PacingScheduler, RtpReader};
pub use track::{LocalAudioTrack, RtpWriter, SampleWriter, TrackLocalContext};
