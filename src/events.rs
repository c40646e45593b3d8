//! Typed notifications from the engine to its host.
//!
//! Every callback the host can receive is a [`TrackEvent`] delivered
//! through an [`EventSink`]. Channel senders implement the sink, so a host
//! usually just hands over one end of a channel and drains the other.

use std::fmt;

use bytes::Bytes;

use crate::codec::CodecKind;
use crate::error::TransportError;

/// Description of a newly discovered remote track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrackInfo {
    pub kind: CodecKind,
    pub ssrc: u32,
    pub mime_type: String,
    pub clock_rate: u32,
    pub channels: u16,
    pub payload_type: u8,
}

/// Sequence or timing anomaly seen on an inbound stream. Informational only.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// Sequence number did not follow the previous one
    MissingPacket {
        expected: u16,
        received: u16,
        previous: u16,
    },
    /// Packet arrived later than its timestamp delta implies
    Underrun { delta_ms: u64, period_ms: f64 },
    /// Arrival rate over the last window
    Rate { packets_per_second: u32, total: u64 },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::MissingPacket {
                received, previous, ..
            } => write!(
                f,
                "Missing packet! sequence number {} and previous one {}",
                received, previous
            ),
            Diagnostic::Underrun {
                delta_ms,
                period_ms,
            } => write!(f, "buffer underrun delta: {} period: {:.3}", delta_ms, period_ms),
            Diagnostic::Rate {
                packets_per_second,
                total,
            } => write!(f, "packet rate {}/s, total {}", packets_per_second, total),
        }
    }
}

/// Event delivered to the host
#[derive(Debug)]
pub enum TrackEvent {
    /// A remote track was announced; emitted before its monitor starts
    RemoteTrackDiscovered(RemoteTrackInfo),
    /// Payload of one received packet
    Payload { ssrc: u32, data: Bytes },
    /// Non-fatal anomaly on an inbound stream
    Diagnostic { ssrc: u32, diagnostic: Diagnostic },
    /// Inbound monitor for `ssrc` stopped because of `error`
    Ended { ssrc: u32, error: TransportError },
}

/// Receiver of engine events. Must not block for long; it runs on the
/// inbound read thread.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: TrackEvent);
}

impl EventSink for tokio::sync::mpsc::UnboundedSender<TrackEvent> {
    fn emit(&self, event: TrackEvent) {
        // Receiver gone means nobody is listening any more
        let _ = self.send(event);
    }
}

impl EventSink for std::sync::mpsc::Sender<TrackEvent> {
    fn emit(&self, event: TrackEvent) {
        let _ = self.send(event);
    }
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: TrackEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_delivers() {
        let (tx, rx) = std::sync::mpsc::channel();
        tx.emit(TrackEvent::Payload {
            ssrc: 5,
            data: Bytes::from_static(b"x"),
        });
        match rx.try_recv() {
            Ok(TrackEvent::Payload { ssrc, data }) => {
                assert_eq!(ssrc, 5);
                assert_eq!(data.as_ref(), b"x");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_diagnostic_text() {
        let gap = Diagnostic::MissingPacket {
            expected: 102,
            received: 103,
            previous: 101,
        };
        assert_eq!(gap.to_string(), "Missing packet! sequence number 103 and previous one 101");
    }
}
