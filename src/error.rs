//! Error types for the media transport core.
//!
//! Send failures towards several destinations are collected into a
//! [`MultiError`] instead of aborting on the first one. Use
//! [`TransportError::is`] to test whether a given [`ErrorKind`] occurs
//! anywhere in a (possibly nested) composite.

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors produced by the packetization engine, the pacing scheduler and
/// the inbound stream monitor.
#[derive(Error, Debug)]
pub enum TransportError {
    /// No payload formatter exists for the negotiated codec. Fatal to bind.
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// A frame that the codec cannot split is larger than one packet's
    /// payload budget. The frame is dropped.
    #[error("Payload of {size} bytes exceeds the {limit} byte packet budget")]
    PayloadTooLarge { size: usize, limit: usize },

    /// The RTP packetizer or payloader failed.
    #[error("Packetization failed: {0}")]
    Packetize(#[from] webrtc::rtp::Error),

    /// Sending a packet to one bound destination failed.
    #[error("Send to binding '{binding}' failed: {source}")]
    SendFailure {
        binding: String,
        #[source]
        source: io::Error,
    },

    /// No packet arrived from the remote source within the idle timeout.
    #[error("Stream {ssrc:#010x} stalled: nothing received for {idle:?}")]
    StreamStalled { ssrc: u32, idle: Duration },

    /// A live monitor already reads this remote source.
    #[error("Track {0:#010x} is already monitored")]
    AlreadyMonitored(u32),

    /// The transport receive primitive failed.
    #[error("Read from track failed: {0}")]
    ReadFailure(#[source] io::Error),

    /// Bytes received from the transport are not a valid RTP packet.
    #[error("Invalid RTP packet: {0}")]
    InvalidPacket(&'static str),

    /// The pacing queue is at capacity (fail-fast enqueue).
    #[error("Pacing queue full")]
    QueueFull,

    /// The pacing queue has been shut down.
    #[error("Pacing queue closed")]
    QueueClosed,

    /// Configuration rejected by validation or parsing.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Several failures collected from independent sends.
    #[error(transparent)]
    Multi(#[from] MultiError),
}

/// Discriminant of a [`TransportError`], used for membership tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnsupportedCodec,
    PayloadTooLarge,
    Packetize,
    SendFailure,
    StreamStalled,
    AlreadyMonitored,
    ReadFailure,
    InvalidPacket,
    QueueFull,
    QueueClosed,
    InvalidConfig,
    Multi,
}

impl TransportError {
    /// Kind of this error. A composite reports [`ErrorKind::Multi`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::UnsupportedCodec(_) => ErrorKind::UnsupportedCodec,
            TransportError::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            TransportError::Packetize(_) => ErrorKind::Packetize,
            TransportError::SendFailure { .. } => ErrorKind::SendFailure,
            TransportError::StreamStalled { .. } => ErrorKind::StreamStalled,
            TransportError::AlreadyMonitored(_) => ErrorKind::AlreadyMonitored,
            TransportError::ReadFailure(_) => ErrorKind::ReadFailure,
            TransportError::InvalidPacket(_) => ErrorKind::InvalidPacket,
            TransportError::QueueFull => ErrorKind::QueueFull,
            TransportError::QueueClosed => ErrorKind::QueueClosed,
            TransportError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            TransportError::Multi(_) => ErrorKind::Multi,
        }
    }

    /// True if this error is of `kind`, or is a composite containing an
    /// error of `kind` at any depth.
    pub fn is(&self, kind: ErrorKind) -> bool {
        if self.kind() == kind {
            return true;
        }
        match self {
            TransportError::Multi(multi) => multi.contains(kind),
            _ => false,
        }
    }
}

/// A non-empty collection of errors from independent operations.
#[derive(Debug)]
pub struct MultiError {
    errors: Vec<TransportError>,
}

impl MultiError {
    /// All collected errors, in the order they occurred.
    pub fn errors(&self) -> &[TransportError] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Recursive membership test over nested composites.
    pub fn contains(&self, kind: ErrorKind) -> bool {
        self.errors.iter().any(|e| e.is(kind))
    }

    pub fn into_errors(self) -> Vec<TransportError> {
        self.errors
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return write!(f, "MultiError must contain multiple errors but is empty");
        }
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

/// Collapse a list of independent failures into one result.
///
/// Returns `Ok(())` when the list is empty.
pub fn flatten_errs(errs: Vec<TransportError>) -> Result<(), TransportError> {
    if errs.is_empty() {
        return Ok(());
    }
    Err(TransportError::Multi(MultiError { errors: errs }))
}
