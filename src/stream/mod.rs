//! Stream module: outbound pacing and inbound monitoring.
//!
//! - `output`: paces samples from a producer into an output track
//! - `input`: reads one remote track, reports anomalies, forwards payloads

pub mod input;
pub mod output;

pub use input::{InboundMonitor, InboundTrackState, MonitorConfig, ReceiveStats, ReceiveStatsSnapshot, RtpReader};
pub use output::{
    PacingConfig, PacingHandle, PacingProducer, PacingScheduler, PacingState, PacingStats,
    PacingStatsSnapshot,
};
