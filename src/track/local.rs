//! Sample-based local audio track.
//!
//! Owns the packetizer and sequencer of one outgoing track and fans the
//! resulting packets out to every bound destination. Sequence numbers and
//! timestamps are issued under the packetizer lock; the send itself runs
//! under a separate ordering lock so packets leave in sequence order
//! without blocking the next sample's packetization for longer than needed.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::{Mutex, MutexGuard, RwLock};

use super::{RtpWriter, SampleWriter, TrackLocalContext, TrackStats, TrackStatsSnapshot};
use crate::codec::{
    match_codec, payloader_for_codec, sends_whole_frames, CodecCapability, CodecParameters,
};
use crate::error::{flatten_errs, ErrorKind, TransportError};
use crate::media::{units_per_sample, Sample};
use crate::rtp::{PacketizerConfig, RtpPacket, SamplePacketizer, SharedSequencer};

/// Default maximum packet size on the wire
pub const DEFAULT_MTU: usize = 1200;
/// Default header extension id for abs-send-time
pub const DEFAULT_ABS_SEND_TIME_ID: u8 = 1;

/// One bound destination
struct TrackBinding {
    id: String,
    ssrc: u32,
    payload_type: u8,
    writer: Arc<dyn RtpWriter>,
}

/// Audio track fed with timed samples.
pub struct LocalAudioTrack {
    id: String,
    stream_id: String,
    codec: CodecCapability,
    mtu: usize,
    abs_send_time_id: Option<u8>,
    bindings: RwLock<Vec<TrackBinding>>,
    /// Created on first successful bind, dropped when the last destination unbinds
    packetizer: Mutex<Option<SamplePacketizer>>,
    /// Held while packets are handed to the writers
    send_order: Mutex<()>,
    stats: TrackStats,
}

impl LocalAudioTrack {
    pub fn new(codec: CodecCapability, id: &str, stream_id: &str) -> Self {
        Self {
            id: id.to_string(),
            stream_id: stream_id.to_string(),
            codec,
            mtu: DEFAULT_MTU,
            abs_send_time_id: Some(DEFAULT_ABS_SEND_TIME_ID),
            bindings: RwLock::new(Vec::new()),
            packetizer: Mutex::new(None),
            send_order: Mutex::new(()),
            stats: TrackStats::default(),
        }
    }

    /// Maximum packet size including RTP header.
    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Header extension id for abs-send-time, or `None` to leave packets unextended.
    pub fn with_abs_send_time_id(mut self, id: Option<u8>) -> Self {
        self.abs_send_time_id = id;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn codec(&self) -> &CodecCapability {
        &self.codec
    }

    /// True once a packetizer exists (at least one destination bound).
    pub fn is_bound(&self) -> bool {
        self.packetizer.lock().is_some()
    }

    /// Number of bound destinations.
    pub fn binding_count(&self) -> usize {
        self.bindings.read().len()
    }

    pub fn stats(&self) -> TrackStatsSnapshot {
        self.stats.snapshot()
    }

    /// Attach a destination after codec negotiation.
    ///
    /// The first successful bind creates the packetizer and sequencer;
    /// later binds reuse them. Binding an id that is already bound
    /// replaces that destination.
    pub fn bind(&self, ctx: &TrackLocalContext) -> Result<CodecParameters, TransportError> {
        let codec = match_codec(&self.codec, &ctx.codecs)
            .cloned()
            .ok_or_else(|| TransportError::UnsupportedCodec(self.codec.mime_type.clone()))?;

        let mut state = self.packetizer.lock();
        if state.is_none() {
            let payloader = payloader_for_codec(&codec.capability)?;
            let clock_rate = codec.capability.clock_rate;
            let config = PacketizerConfig {
                mtu: self.mtu,
                payload_type: 0, // Rewritten per destination
                ssrc: 0,         // Rewritten per destination
                clock_rate,
                abs_send_time_id: self.abs_send_time_id,
                whole_frames: sends_whole_frames(&codec.capability),
            };
            *state = Some(SamplePacketizer::new(
                &config,
                payloader,
                SharedSequencer::random(),
            ));
            info!(
                "Track '{}' packetizer created: {} {} Hz, MTU {}",
                self.id, codec.capability.mime_type, clock_rate, self.mtu
            );
        }

        let mut bindings = self.bindings.write();
        bindings.retain(|b| b.id != ctx.id);
        bindings.push(TrackBinding {
            id: ctx.id.clone(),
            ssrc: ctx.ssrc,
            payload_type: codec.payload_type,
            writer: ctx.writer.clone(),
        });
        info!(
            "Track '{}' bound to '{}' (SSRC {:#010x}, PT {})",
            self.id, ctx.id, ctx.ssrc, codec.payload_type
        );

        Ok(codec)
    }

    /// Detach a destination. Safe to call for a destination that never bound.
    pub fn unbind(&self, ctx: &TrackLocalContext) -> Result<(), TransportError> {
        let mut state = self.packetizer.lock();
        let mut bindings = self.bindings.write();

        let before = bindings.len();
        bindings.retain(|b| b.id != ctx.id);
        if bindings.len() == before {
            debug!("Track '{}' unbind: '{}' was not bound", self.id, ctx.id);
            return Ok(());
        }
        info!("Track '{}' unbound from '{}'", self.id, ctx.id);

        if bindings.is_empty() && state.take().is_some() {
            info!("Track '{}' packetizer released", self.id);
        }
        Ok(())
    }

    /// Packetize one sample and send it to every destination.
    ///
    /// A no-op before the first bind. If the sample follows dropped
    /// samples, their sequence numbers and timestamp span are skipped
    /// first so the receiver sees the gap.
    ///
    /// A frame that needs more than one packet but whose codec cannot split
    /// it fails with `PayloadTooLarge` and nothing is sent.
    pub fn write_sample(&self, sample: &Sample) -> Result<(), TransportError> {
        let issued = self.issue(|packetizer| {
            let units = units_per_sample(sample.duration, packetizer.clock_rate());
            let dropped = sample.prev_dropped_packets;
            if dropped > 0 {
                packetizer.skip_sequence_numbers(dropped);
                packetizer.skip_samples(units.wrapping_mul(dropped as u32));
            }
            packetizer.packetize(&sample.data, units)
        });
        let issued = match issued {
            Ok(issued) => issued,
            Err(e) => {
                if e.is(ErrorKind::PayloadTooLarge) {
                    self.stats.frames_too_large.fetch_add(1, Ordering::Relaxed);
                }
                warn!("Track '{}' dropped sample: {}", self.id, e);
                return Err(e);
            }
        };
        let Some((packets, _order)) = issued else {
            return Ok(());
        };

        self.send_packets(&packets)
    }

    /// Send `count` padding-only packets. A no-op before the first bind.
    pub fn generate_padding(&self, count: u32) -> Result<(), TransportError> {
        let Some((packets, _order)) =
            self.issue(|packetizer| Ok(packetizer.generate_padding(count)))?
        else {
            return Ok(());
        };

        self.stats
            .padding_packets
            .fetch_add(packets.len() as u64, Ordering::Relaxed);
        self.send_packets(&packets)
    }

    /// Run `build` under the packetizer lock, then take the send-order lock
    /// before releasing it. `Ok(None)` when unbound.
    #[allow(clippy::type_complexity)]
    fn issue<F>(&self, build: F) -> Result<Option<(Vec<RtpPacket>, MutexGuard<'_, ()>)>, TransportError>
    where
        F: FnOnce(&mut SamplePacketizer) -> Result<Vec<RtpPacket>, TransportError>,
    {
        let mut guard = self.packetizer.lock();
        let Some(packetizer) = guard.as_mut() else {
            return Ok(None);
        };
        let packets = build(packetizer)?;
        let order = self.send_order.lock();
        drop(guard);
        Ok(Some((packets, order)))
    }

    /// Send every packet to every destination, collecting failures.
    fn send_packets(&self, packets: &[RtpPacket]) -> Result<(), TransportError> {
        let bindings = self.bindings.read();
        let mut errs = Vec::new();
        for packet in packets {
            if let Err(e) = self.write_rtp(&bindings, packet) {
                errs.push(e);
            }
        }
        flatten_errs(errs)
    }

    /// Send one packet to all destinations, rewriting SSRC and payload type.
    fn write_rtp(&self, bindings: &[TrackBinding], packet: &RtpPacket) -> Result<(), TransportError> {
        let mut errs = Vec::new();
        let mut outbound = packet.clone();
        for binding in bindings {
            outbound.header.ssrc = binding.ssrc;
            outbound.header.payload_type = binding.payload_type;
            match binding.writer.write_rtp(&outbound) {
                Ok(bytes) => {
                    self.stats.packets_sent.fetch_add(1, Ordering::Relaxed);
                    self.stats.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    self.stats.send_errors.fetch_add(1, Ordering::Relaxed);
                    warn!("Track '{}' send to '{}' failed: {}", self.id, binding.id, e);
                    errs.push(TransportError::SendFailure {
                        binding: binding.id.clone(),
                        source: e,
                    });
                }
            }
        }
        flatten_errs(errs)
    }
}

impl SampleWriter for LocalAudioTrack {
    fn write_sample(&self, sample: &Sample) -> Result<(), TransportError> {
        LocalAudioTrack::write_sample(self, sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{MIME_TYPE_G722, MIME_TYPE_OPUS, MIME_TYPE_PCMU};
    use crate::media::audio_sample;
    use std::io;
    use std::thread;
    use std::time::Duration;
    use webrtc::util::MarshalSize;

    /// Records every packet it is given
    #[derive(Default)]
    struct RecordingWriter {
        packets: Mutex<Vec<RtpPacket>>,
    }

    impl RecordingWriter {
        fn sequences(&self) -> Vec<u16> {
            self.packets.lock().iter().map(|p| p.header.sequence_number).collect()
        }
    }

    impl RtpWriter for RecordingWriter {
        fn write_rtp(&self, packet: &RtpPacket) -> io::Result<usize> {
            self.packets.lock().push(packet.clone());
            Ok(packet.marshal_size())
        }
    }

    struct FailingWriter;

    impl RtpWriter for FailingWriter {
        fn write_rtp(&self, _packet: &RtpPacket) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "connection closed"))
        }
    }

    fn opus() -> CodecCapability {
        CodecCapability::new(MIME_TYPE_OPUS, 48000, 2)
    }

    fn context(id: &str, ssrc: u32, writer: Arc<dyn RtpWriter>) -> TrackLocalContext {
        TrackLocalContext {
            id: id.to_string(),
            ssrc,
            codecs: vec![CodecParameters {
                capability: opus(),
                payload_type: 111,
            }],
            writer,
        }
    }

    fn frame(byte: u8) -> Sample {
        audio_sample(vec![byte; 40], Duration::from_millis(20))
    }

    #[test]
    fn test_sequences_contiguous_across_wrap() {
        let track = LocalAudioTrack::new(opus(), "audio", "stream");
        let writer = Arc::new(RecordingWriter::default());
        track.bind(&context("pc-1", 1, writer.clone())).unwrap();

        // More samples than the sequence space guarantees at least one wrap
        for _ in 0..66_000 {
            track.write_sample(&frame(1)).unwrap();
        }

        let seqs = writer.sequences();
        assert_eq!(seqs.len(), 66_000);
        assert!(seqs.windows(2).all(|w| w[1] == w[0].wrapping_add(1)));
    }

    #[test]
    fn test_dropped_samples_skip_sequence_and_timestamp() {
        let track = LocalAudioTrack::new(opus(), "audio", "stream");
        let writer = Arc::new(RecordingWriter::default());
        track.bind(&context("pc-1", 1, writer.clone())).unwrap();

        track.write_sample(&frame(1)).unwrap();
        track
            .write_sample(&Sample {
                prev_dropped_packets: 3,
                ..frame(2)
            })
            .unwrap();

        let packets = writer.packets.lock();
        let (first, second) = (&packets[0].header, &packets[1].header);
        assert_eq!(second.sequence_number, first.sequence_number.wrapping_add(4));
        assert_eq!(second.timestamp, first.timestamp.wrapping_add(960 * 4));
    }

    #[test]
    fn test_rebind_keeps_packetizer() {
        let track = LocalAudioTrack::new(opus(), "audio", "stream");
        let writer = Arc::new(RecordingWriter::default());
        let ctx = context("pc-1", 7, writer.clone());

        assert_eq!(track.bind(&ctx).unwrap().payload_type, 111);
        track.write_sample(&frame(1)).unwrap();
        assert_eq!(track.bind(&ctx).unwrap().payload_type, 111);
        track.write_sample(&frame(2)).unwrap();

        assert_eq!(track.binding_count(), 1);
        let seqs = writer.sequences();
        assert_eq!(seqs.len(), 2);
        assert_eq!(seqs[1], seqs[0].wrapping_add(1));
    }

    #[test]
    fn test_unbound_writes_are_noops() {
        let track = LocalAudioTrack::new(opus(), "audio", "stream");
        assert!(track.generate_padding(3).is_ok());
        assert!(track.write_sample(&frame(1)).is_ok());
        assert!(!track.is_bound());

        // Unbinding something never bound is fine too
        let ctx = context("pc-x", 1, Arc::new(RecordingWriter::default()));
        assert!(track.unbind(&ctx).is_ok());
    }

    #[test]
    fn test_one_failing_destination_does_not_block_others() {
        let track = LocalAudioTrack::new(opus(), "audio", "stream");
        let a = Arc::new(RecordingWriter::default());
        let b = Arc::new(RecordingWriter::default());
        track.bind(&context("pc-a", 0xA, a.clone())).unwrap();
        track.bind(&context("pc-bad", 0xB, Arc::new(FailingWriter))).unwrap();
        track.bind(&context("pc-c", 0xC, b.clone())).unwrap();

        let err = track.write_sample(&frame(9)).unwrap_err();
        assert!(err.is(ErrorKind::SendFailure));
        assert!(err.to_string().contains("pc-bad"));

        assert_eq!(a.packets.lock().len(), 1);
        assert_eq!(b.packets.lock().len(), 1);
        assert_eq!(a.packets.lock()[0].header.ssrc, 0xA);
        assert_eq!(b.packets.lock()[0].header.ssrc, 0xC);
        assert_eq!(track.stats().send_errors, 1);
        assert_eq!(track.stats().packets_sent, 2);
    }

    #[test]
    fn test_bind_rejects_codec_not_offered() {
        let track = LocalAudioTrack::new(CodecCapability::new(MIME_TYPE_G722, 8000, 1), "audio", "s");
        let ctx = context("pc-1", 1, Arc::new(RecordingWriter::default()));
        let err = track.bind(&ctx).unwrap_err();
        assert!(err.is(ErrorKind::UnsupportedCodec));
        assert!(!track.is_bound());
    }

    #[test]
    fn test_bind_rejects_codec_without_payloader() {
        let amr = CodecCapability::new("audio/AMR", 8000, 1);
        let track = LocalAudioTrack::new(amr.clone(), "audio", "s");
        let mut ctx = context("pc-1", 1, Arc::new(RecordingWriter::default()));
        ctx.codecs = vec![CodecParameters {
            capability: amr,
            payload_type: 96,
        }];
        assert!(track.bind(&ctx).unwrap_err().is(ErrorKind::UnsupportedCodec));
        assert_eq!(track.binding_count(), 0);
    }

    #[test]
    fn test_large_sample_split_by_mtu() {
        let pcmu = CodecCapability::new(MIME_TYPE_PCMU, 8000, 1);
        let track = LocalAudioTrack::new(pcmu.clone(), "audio", "s").with_mtu(200);
        let writer = Arc::new(RecordingWriter::default());
        let mut ctx = context("pc-1", 1, writer.clone());
        ctx.codecs = vec![CodecParameters {
            capability: pcmu,
            payload_type: 0,
        }];
        track.bind(&ctx).unwrap();

        track
            .write_sample(&audio_sample(vec![0xFFu8; 500], Duration::from_millis(62)))
            .unwrap();

        let packets = writer.packets.lock();
        assert_eq!(packets.len(), 3);
        assert!(packets.iter().all(|p| p.marshal_size() <= 200));
        assert!(packets.iter().all(|p| p.header.timestamp == packets[0].header.timestamp));
        assert!(packets[2].header.marker);
    }

    #[test]
    fn test_unbind_last_releases_packetizer() {
        let track = LocalAudioTrack::new(opus(), "audio", "stream");
        let writer = Arc::new(RecordingWriter::default());
        let ctx = context("pc-1", 1, writer.clone());
        track.bind(&ctx).unwrap();
        track.generate_padding(2).unwrap();
        assert_eq!(writer.packets.lock().len(), 2);

        track.unbind(&ctx).unwrap();
        assert!(!track.is_bound());
        track.write_sample(&frame(1)).unwrap();
        assert_eq!(writer.packets.lock().len(), 2);
    }

    #[test]
    fn test_oversized_opus_frame_rejected() {
        let track = LocalAudioTrack::new(opus(), "audio", "stream");
        let writer = Arc::new(RecordingWriter::default());
        track.bind(&context("pc-1", 1, writer.clone())).unwrap();

        let err = track
            .write_sample(&audio_sample(vec![0u8; 3000], Duration::from_millis(20)))
            .unwrap_err();
        assert!(err.is(ErrorKind::PayloadTooLarge));
        assert!(writer.packets.lock().is_empty());
        assert_eq!(track.stats().frames_too_large, 1);

        // Largest frame that fits: 1200 - 12 header - 8 abs-send-time
        track
            .write_sample(&audio_sample(vec![0u8; 1180], Duration::from_millis(20)))
            .unwrap();
        let packets = writer.packets.lock();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].marshal_size(), DEFAULT_MTU);
    }

    #[test]
    fn test_concurrent_writers_send_in_sequence_order() {
        let track = Arc::new(LocalAudioTrack::new(opus(), "audio", "stream"));
        let writer = Arc::new(RecordingWriter::default());
        track.bind(&context("pc-1", 1, writer.clone())).unwrap();

        let threads: Vec<_> = (0..4u8)
            .map(|n| {
                let track = track.clone();
                thread::spawn(move || {
                    for i in 0..250u32 {
                        if i % 5 == 0 {
                            track.generate_padding(2).unwrap();
                        } else {
                            track.write_sample(&frame(n)).unwrap();
                        }
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        // 4 threads x (200 samples + 50 x 2 padding)
        let seqs = writer.sequences();
        assert_eq!(seqs.len(), 1200);
        assert!(seqs.windows(2).all(|w| w[1] == w[0].wrapping_add(1)));
        assert_eq!(track.stats().padding_packets, 400);
    }
}
