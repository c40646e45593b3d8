//! Plain UDP transport for RTP.
//!
//! No ICE, no SRTP: packets go straight to a fixed remote address. Useful
//! for loopback testing and for hosts that handle security elsewhere.

use std::io::{self, ErrorKind};
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use log::debug;
use socket2::{Domain, Protocol, Socket, Type};
use webrtc::util::{Marshal, Unmarshal};

use crate::error::TransportError;
use crate::rtp::RtpPacket;
use crate::stream::RtpReader;
use crate::track::RtpWriter;

/// Largest datagram we expect to receive
const MAX_DATAGRAM_SIZE: usize = 1500;
/// Socket buffer sizes
const SOCKET_BUFFER_SIZE: usize = 1024 * 1024;

/// UDP socket configured for RTP.
pub struct RtpSocket {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl RtpSocket {
    /// Bind to `local_addr` with a receive timeout.
    ///
    /// The timeout bounds every blocking read so the caller can check its
    /// idle watchdog between reads.
    pub fn bind(local_addr: SocketAddr, read_timeout: Duration) -> io::Result<Self> {
        let socket = Socket::new(Domain::for_address(local_addr), Type::DGRAM, Some(Protocol::UDP))?;

        // Allow address reuse (quick restarts)
        socket.set_reuse_address(true)?;
        socket.bind(&local_addr.into())?;
        socket.set_read_timeout(Some(read_timeout.max(Duration::from_millis(1))))?;

        let _ = socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE);
        let _ = socket.set_send_buffer_size(SOCKET_BUFFER_SIZE);

        let socket: UdpSocket = socket.into();
        // Actual bound address (in case port was 0)
        let local_addr = socket.local_addr()?;

        Ok(RtpSocket { socket, local_addr })
    }

    pub fn send_to(&self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(data, addr)
    }

    /// Receive one datagram. WouldBlock/TimedOut when nothing arrived in time.
    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket.set_read_timeout(timeout)
    }

    /// Clone sharing the same OS socket, for a separate reader thread.
    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(RtpSocket {
            socket: self.socket.try_clone()?,
            local_addr: self.local_addr,
        })
    }
}

impl std::fmt::Debug for RtpSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtpSocket")
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

/// Send primitive writing marshalled packets to one remote address.
#[derive(Debug)]
pub struct UdpRtpWriter {
    socket: RtpSocket,
    remote_addr: SocketAddr,
}

impl UdpRtpWriter {
    pub fn new(socket: RtpSocket, remote_addr: SocketAddr) -> Self {
        Self {
            socket,
            remote_addr,
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
}

impl RtpWriter for UdpRtpWriter {
    fn write_rtp(&self, packet: &RtpPacket) -> io::Result<usize> {
        let raw = packet
            .marshal()
            .map_err(|e| io::Error::new(ErrorKind::InvalidData, e.to_string()))?;
        self.socket.send_to(&raw, self.remote_addr)
    }
}

/// Receive primitive parsing datagrams from a socket.
///
/// Read timeouts and datagrams that are not RTP yield `Ok(None)`.
#[derive(Debug)]
pub struct UdpRtpReader {
    socket: RtpSocket,
    buffer: Vec<u8>,
}

impl UdpRtpReader {
    pub fn new(socket: RtpSocket) -> Self {
        Self {
            socket,
            buffer: vec![0u8; MAX_DATAGRAM_SIZE],
        }
    }
}

impl RtpReader for UdpRtpReader {
    fn read_rtp(&mut self) -> Result<Option<RtpPacket>, TransportError> {
        match self.socket.recv_from(&mut self.buffer) {
            Ok((len, from)) => {
                let mut raw = &self.buffer[..len];
                match RtpPacket::unmarshal(&mut raw) {
                    Ok(packet) if packet.header.version == 2 => Ok(Some(packet)),
                    Ok(_) => {
                        debug!("Ignoring {} byte non-RTP datagram from {}", len, from);
                        Ok(None)
                    }
                    Err(e) => {
                        debug!("Ignoring {} byte datagram from {}: {}", len, from, e);
                        Ok(None)
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(TransportError::ReadFailure(e)),
        }
    }
}
