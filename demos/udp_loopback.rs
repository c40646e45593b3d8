//! UDP loopback for webrtc-audio-core
//!
//! Sends paced 20 ms frames through a local track bound to a UDP socket and
//! monitors the same packets arriving on a second socket.
//!
//! Usage:
//!   cargo run --example udp_loopback
//!   cargo run --example udp_loopback -- config.json
//!   RUST_LOG=debug cargo run --example udp_loopback
//!
//! Arguments:
//!   [1] Optional JSON engine configuration (defaults: OPUS 48 kHz, 20 ms)
//!
//! Press Ctrl+C to stop.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use webrtc_audio_core::codec::CodecParameters;
use webrtc_audio_core::transport::{RtpSocket, UdpRtpReader, UdpRtpWriter};
use webrtc_audio_core::{
    EngineConfig, RemoteTrackInfo, Session, TrackEvent, TrackLocalContext, TransportError,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    let frame_duration = config.frame_duration();

    let runtime = tokio::runtime::Runtime::new()?;
    let (events_tx, events_rx) = mpsc::channel();
    let mut session = Session::new(config.clone(), Arc::new(events_tx), runtime.handle())?;

    // Two sockets on localhost: one sends, one receives
    let localhost = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
    let rx_socket = RtpSocket::bind(localhost, config.read_timeout())?;
    let tx_socket = RtpSocket::bind(localhost, config.read_timeout())?;
    println!("Sending {} -> {}", tx_socket.local_addr(), rx_socket.local_addr());

    let ssrc: u32 = rand::random();
    let ctx = TrackLocalContext {
        id: "loopback".to_string(),
        ssrc,
        codecs: vec![CodecParameters {
            capability: config.codec.clone(),
            payload_type: config.payload_type,
        }],
        writer: Arc::new(UdpRtpWriter::new(tx_socket, rx_socket.local_addr())),
    };
    let negotiated = session.bind(&ctx)?;
    println!(
        "Bound {} PT {} SSRC {:#010x}",
        negotiated.capability.mime_type, negotiated.payload_type, ssrc
    );

    session.add_remote_track(
        RemoteTrackInfo {
            kind: config.codec.kind().unwrap_or(webrtc_audio_core::CodecKind::Audio),
            ssrc,
            mime_type: config.codec.mime_type.clone(),
            clock_rate: config.codec.clock_rate,
            channels: config.codec.channels,
            payload_type: config.payload_type,
        },
        Box::new(UdpRtpReader::new(rx_socket)),
    )?;

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    ctrlc::set_handler(move || {
        println!("\nStopping...");
        running_clone.store(false, Ordering::SeqCst);
    })?;

    let mut frame_counter: u32 = 0;
    let mut received = 0u64;
    let mut next_frame = Instant::now();
    let mut next_report = Instant::now() + Duration::from_secs(1);

    while running.load(Ordering::SeqCst) {
        // Fake encoded frame: TOC byte + counter
        let mut frame = vec![0xFC];
        frame.extend_from_slice(&frame_counter.to_be_bytes());
        frame.resize(60, 0);
        match session.blocking_send_track_data(frame) {
            Ok(()) => frame_counter = frame_counter.wrapping_add(1),
            Err(TransportError::QueueClosed) => break,
            Err(e) => eprintln!("Send failed: {}", e),
        }

        for event in events_rx.try_iter() {
            match event {
                TrackEvent::Payload { .. } => received += 1,
                TrackEvent::Diagnostic { ssrc, diagnostic } => {
                    println!("[{:#010x}] {}", ssrc, diagnostic)
                }
                TrackEvent::RemoteTrackDiscovered(info) => println!(
                    "Remote track: {} {} Hz, {} channels",
                    info.mime_type, info.clock_rate, info.channels
                ),
                TrackEvent::Ended { ssrc, error } => {
                    println!("[{:#010x}] ended: {}", ssrc, error);
                    running.store(false, Ordering::SeqCst);
                }
            }
        }

        if Instant::now() >= next_report {
            next_report += Duration::from_secs(1);
            let track = session.track_stats();
            let rx_stats = session.receive_stats(ssrc).unwrap_or_default();
            println!(
                "TX: {} frames, {} packets ({} bytes) | RX: {} payloads, {} total, {}/s",
                frame_counter,
                track.packets_sent,
                track.bytes_sent,
                received,
                rx_stats.total_packets,
                rx_stats.packet_rate
            );
        }

        next_frame += frame_duration;
        let now = Instant::now();
        if next_frame > now {
            thread::sleep(next_frame - now);
        }
    }

    if let Some(stats) = runtime.block_on(session.close()) {
        println!(
            "Pacing: {} sent, {} keepalives, {} errors, {} discarded",
            stats.samples_sent, stats.keepalives_sent, stats.send_errors, stats.discarded
        );
    }
    Ok(())
}
