//! Session façade.
//!
//! A [`Session`] is an explicitly owned object tying together the local
//! audio track, its pacing scheduler and the monitors of remote tracks.
//! Create as many as needed; dropping or closing one has no effect on the
//! others.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use log::{info, warn};
use parking_lot::Mutex;
use tokio::runtime::Handle;

use crate::codec::{CodecKind, CodecParameters};
use crate::config::EngineConfig;
use crate::error::TransportError;
use crate::events::{EventSink, RemoteTrackInfo, TrackEvent};
use crate::media::{audio_sample, Sample};
use crate::stream::{
    InboundMonitor, PacingHandle, PacingProducer, PacingScheduler, PacingStatsSnapshot,
    ReceiveStats, ReceiveStatsSnapshot, RtpReader,
};
use crate::track::{LocalAudioTrack, TrackLocalContext, TrackStatsSnapshot};

/// Monitor bookkeeping for one remote track
struct RemoteTrack {
    stats: Arc<ReceiveStats>,
    // Monitors stop on their own (stall or read failure); never joined
    _thread: JoinHandle<()>,
}

impl RemoteTrack {
    fn is_live(&self) -> bool {
        !self.stats.is_ended()
    }
}

/// One media session: a local audio track plus any number of remote tracks.
pub struct Session {
    config: EngineConfig,
    track: Arc<LocalAudioTrack>,
    producer: Option<PacingProducer>,
    pacing: Option<PacingHandle>,
    events: Arc<dyn EventSink>,
    remote_tracks: Mutex<HashMap<u32, RemoteTrack>>,
}

impl Session {
    /// Create a session and start its pacing scheduler on `runtime`.
    pub fn new(
        config: EngineConfig,
        events: Arc<dyn EventSink>,
        runtime: &Handle,
    ) -> Result<Self, TransportError> {
        config.validate()?;

        let track = Arc::new(
            LocalAudioTrack::new(config.codec.clone(), &config.track_id, &config.stream_id)
                .with_mtu(config.mtu)
                .with_abs_send_time_id(config.abs_send_time_id()),
        );
        let (producer, pacing) = PacingScheduler::spawn(track.clone(), config.pacing(), runtime);

        info!(
            "Session created: track '{}' ({} {} Hz)",
            config.track_id, config.codec.mime_type, config.codec.clock_rate
        );

        Ok(Self {
            config,
            track,
            producer: Some(producer),
            pacing: Some(pacing),
            events,
            remote_tracks: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn local_track(&self) -> &Arc<LocalAudioTrack> {
        &self.track
    }

    /// Bind the local track to a negotiated destination.
    pub fn bind(&self, ctx: &TrackLocalContext) -> Result<CodecParameters, TransportError> {
        self.track.bind(ctx)
    }

    pub fn unbind(&self, ctx: &TrackLocalContext) -> Result<(), TransportError> {
        self.track.unbind(ctx)
    }

    fn producer(&self) -> Result<&PacingProducer, TransportError> {
        self.producer.as_ref().ok_or(TransportError::QueueClosed)
    }

    fn frame(&self, data: Bytes) -> Sample {
        audio_sample(data, self.config.frame_duration())
    }

    /// Queue one encoded frame, waiting while the pacing queue is full.
    pub async fn send_track_data(&self, data: impl Into<Bytes>) -> Result<(), TransportError> {
        let sample = self.frame(data.into());
        self.producer()?.enqueue(sample).await
    }

    /// Queue one encoded frame or fail with `QueueFull`.
    pub fn try_send_track_data(&self, data: impl Into<Bytes>) -> Result<(), TransportError> {
        let sample = self.frame(data.into());
        self.producer()?.try_enqueue(sample)
    }

    /// Queue one encoded frame from a non-async thread.
    pub fn blocking_send_track_data(&self, data: impl Into<Bytes>) -> Result<(), TransportError> {
        let sample = self.frame(data.into());
        self.producer()?.blocking_enqueue(sample)
    }

    /// Announce a remote track and, for audio, start monitoring it.
    ///
    /// The discovery event is emitted before the monitor starts. A monitor
    /// whose stream has ended is replaced, which is how a caller reconnects
    /// a source; while the old one is still live the call fails with
    /// `AlreadyMonitored` and `reader` is dropped.
    pub fn add_remote_track(
        &self,
        info: RemoteTrackInfo,
        reader: Box<dyn RtpReader>,
    ) -> Result<(), TransportError> {
        let mut remote_tracks = self.remote_tracks.lock();
        if info.kind == CodecKind::Audio
            && remote_tracks.get(&info.ssrc).is_some_and(RemoteTrack::is_live)
        {
            warn!("Track {:#010x} already monitored", info.ssrc);
            return Err(TransportError::AlreadyMonitored(info.ssrc));
        }

        info!(
            "Received track {} ssrc {} type {} freq {} channels {} payload type {}",
            info.kind.name(),
            info.ssrc,
            info.mime_type,
            info.clock_rate,
            info.channels,
            info.payload_type
        );
        self.events.emit(TrackEvent::RemoteTrackDiscovered(info.clone()));

        if info.kind != CodecKind::Audio {
            info!("Not monitoring {} track {:#010x}", info.kind.name(), info.ssrc);
            return Ok(());
        }

        let ssrc = info.ssrc;
        let monitor = InboundMonitor::new(info, reader, self.events.clone(), self.config.monitor());
        let stats = monitor.stats();
        let thread = monitor.spawn().map_err(TransportError::ReadFailure)?;
        remote_tracks.insert(
            ssrc,
            RemoteTrack {
                stats,
                _thread: thread,
            },
        );
        Ok(())
    }

    /// Receive statistics of a monitored remote track.
    pub fn receive_stats(&self, ssrc: u32) -> Option<ReceiveStatsSnapshot> {
        self.remote_tracks.lock().get(&ssrc).map(|t| t.stats.snapshot())
    }

    pub fn track_stats(&self) -> TrackStatsSnapshot {
        self.track.stats()
    }

    pub fn pacing_stats(&self) -> Option<PacingStatsSnapshot> {
        self.pacing.as_ref().map(|p| p.stats())
    }

    /// Stop the pacing scheduler and wait for it to exit.
    ///
    /// Inbound monitors are not stopped; they end when their transport
    /// closes or goes idle. Returns the final pacing statistics, or `None`
    /// if the session was already closed.
    pub async fn close(&mut self) -> Option<PacingStatsSnapshot> {
        if let Some(producer) = self.producer.take() {
            producer.close();
        }
        let pacing = self.pacing.take()?;
        let stats = pacing.shutdown().await;
        info!("Session for track '{}' closed", self.config.track_id);
        Some(stats)
    }
}
