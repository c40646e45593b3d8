//! Inbound stream monitor.
//!
//! Reads one remote source on a dedicated thread, reports sequence gaps,
//! the first timing underrun and the arrival rate, and forwards every
//! payload to the host immediately. There is no jitter buffer: packets are
//! delivered in arrival order.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::error::TransportError;
use crate::events::{Diagnostic, EventSink, RemoteTrackInfo, TrackEvent};
use crate::platform;
use crate::rtp::{RtpHeader, RtpPacket};

/// Length of the arrival rate window
const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Transport receive primitive for one remote track.
pub trait RtpReader: Send {
    /// Next packet, `Ok(None)` when the read timed out without data.
    fn read_rtp(&mut self) -> Result<Option<RtpPacket>, TransportError>;
}

/// Inbound monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Give up when nothing arrives for this long
    pub idle_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(10),
        }
    }
}

/// Receive statistics shared with the host.
#[derive(Debug, Default)]
pub struct ReceiveStats {
    pub total_packets: AtomicU64,
    pub packet_rate: AtomicU32,
    /// Set once the monitor has stopped, before `Ended` is emitted
    ended: AtomicBool,
}

impl ReceiveStats {
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    fn mark_ended(&self) {
        self.ended.store(true, Ordering::Release);
    }

    pub fn snapshot(&self) -> ReceiveStatsSnapshot {
        ReceiveStatsSnapshot {
            total_packets: self.total_packets.load(Ordering::Relaxed),
            packet_rate: self.packet_rate.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of receive statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveStatsSnapshot {
    pub total_packets: u64,
    /// Packets per second over the last full window
    pub packet_rate: u32,
}

/// Per-source bookkeeping, owned by the read loop.
#[derive(Debug)]
pub struct InboundTrackState {
    clock_rate: u32,
    /// Sequence number and timestamp of the previous packet
    last: Option<(u16, u32)>,
    last_arrival: Instant,
    /// Set on the first underrun and never cleared
    underrun: bool,
    total: u64,
    window_count: u64,
    window_start: Instant,
}

impl InboundTrackState {
    pub fn new(clock_rate: u32, now: Instant) -> Self {
        Self {
            clock_rate,
            last: None,
            last_arrival: now,
            underrun: false,
            total: 0,
            window_count: 0,
            window_start: now,
        }
    }

    /// Time since the last packet (or since start if none arrived yet).
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_arrival)
    }

    pub fn underrun_seen(&self) -> bool {
        self.underrun
    }

    /// Account for one packet arriving at `now`.
    pub fn on_packet(
        &mut self,
        header: &RtpHeader,
        now: Instant,
        stats: &ReceiveStats,
    ) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        let delta = now.saturating_duration_since(self.last_arrival);
        self.last_arrival = now;

        if let Some((last_seq, last_ts)) = self.last {
            if self.clock_rate > 0 && !self.underrun {
                let frames = header.timestamp.wrapping_sub(last_ts);
                let period_ms = frames as f64 * 1000.0 / self.clock_rate as f64;
                let delta_ms = delta.as_millis() as u64;
                if delta_ms as f64 > period_ms {
                    self.underrun = true;
                    diagnostics.push(Diagnostic::Underrun {
                        delta_ms,
                        period_ms,
                    });
                }
            }

            let expected = last_seq.wrapping_add(1);
            if header.sequence_number != expected {
                diagnostics.push(Diagnostic::MissingPacket {
                    expected,
                    received: header.sequence_number,
                    previous: last_seq,
                });
            }
        }

        self.total += 1;
        self.window_count += 1;
        stats.total_packets.store(self.total, Ordering::Relaxed);

        let window = now.saturating_duration_since(self.window_start);
        if window > RATE_WINDOW {
            let window_ms = window.as_millis().max(1) as u64;
            let rate = (self.window_count * 1000 / window_ms) as u32;
            stats.packet_rate.store(rate, Ordering::Relaxed);
            self.window_start = now;
            self.window_count = 0;
            diagnostics.push(Diagnostic::Rate {
                packets_per_second: rate,
                total: self.total,
            });
        }

        self.last = Some((header.sequence_number, header.timestamp));
        diagnostics
    }
}

/// Read loop for one remote track.
pub struct InboundMonitor {
    info: RemoteTrackInfo,
    reader: Box<dyn RtpReader>,
    events: Arc<dyn EventSink>,
    stats: Arc<ReceiveStats>,
    config: MonitorConfig,
}

impl InboundMonitor {
    pub fn new(
        info: RemoteTrackInfo,
        reader: Box<dyn RtpReader>,
        events: Arc<dyn EventSink>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            info,
            reader,
            events,
            stats: Arc::new(ReceiveStats::default()),
            config,
        }
    }

    /// Shared statistics record, readable while the loop runs.
    pub fn stats(&self) -> Arc<ReceiveStats> {
        self.stats.clone()
    }

    /// Run until the stream stalls or the reader fails. Returns the terminal error.
    pub fn run(mut self) -> TransportError {
        let ssrc = self.info.ssrc;
        info!(
            "Starting reading from remote track {:#010x} ({} {} Hz)",
            ssrc, self.info.mime_type, self.info.clock_rate
        );
        let mut state = InboundTrackState::new(self.info.clock_rate, Instant::now());

        loop {
            match self.reader.read_rtp() {
                Ok(Some(packet)) => {
                    for diagnostic in state.on_packet(&packet.header, Instant::now(), &self.stats) {
                        match diagnostic {
                            Diagnostic::Rate { .. } => debug!("Track {:#010x}: {}", ssrc, diagnostic),
                            _ => warn!("Track {:#010x}: {}", ssrc, diagnostic),
                        }
                        self.events.emit(TrackEvent::Diagnostic { ssrc, diagnostic });
                    }
                    self.events.emit(TrackEvent::Payload {
                        ssrc,
                        data: packet.payload,
                    });
                }
                Ok(None) => {
                    let idle = state.idle_for(Instant::now());
                    if idle > self.config.idle_timeout {
                        warn!(
                            "Track {:#010x}: nothing received for {} s, stopping",
                            ssrc,
                            idle.as_secs()
                        );
                        return TransportError::StreamStalled { ssrc, idle };
                    }
                }
                Err(e) => {
                    error!("Error reading from track {:#010x}: {}", ssrc, e);
                    return e;
                }
            }
        }
    }

    /// Run on a dedicated thread with raised priority.
    ///
    /// The terminal error is delivered as [`TrackEvent::Ended`].
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        let ssrc = self.info.ssrc;
        let events = self.events.clone();
        let stats = self.stats.clone();
        thread::Builder::new()
            .name(format!("rtp-in-{:08x}", ssrc))
            .spawn(move || {
                platform::raise_thread_priority();
                let error = self.run();
                stats.mark_ended();
                info!("Inbound monitor for {:#010x} stopped", ssrc);
                events.emit(TrackEvent::Ended { ssrc, error });
            })
    }
}
