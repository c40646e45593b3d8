//! Reference transports implementing the send and receive primitives.

pub mod udp;

pub use udp::{RtpSocket, UdpRtpReader, UdpRtpWriter};
