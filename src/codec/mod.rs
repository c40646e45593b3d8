//! Codec descriptors and the RTP payloader table.
//!
//! Payload formats come from `webrtc::rtp::codecs`:
//! - OPUS: one RTP payload per encoded frame
//! - G.711 (PCMU/PCMA) and G.722: raw byte stream split at the MTU
//! - H.264, VP8, VP9: the crate's fragmenting payloaders
//!
//! L16 has no payloader in the crate and is provided by [`pcm`].

pub mod pcm;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use webrtc::rtp::codecs::g7xx::{G711Payloader, G722Payloader};
use webrtc::rtp::codecs::h264::H264Payloader;
use webrtc::rtp::codecs::opus::OpusPayloader;
use webrtc::rtp::codecs::vp8::Vp8Payloader;
use webrtc::rtp::codecs::vp9::Vp9Payloader;
use webrtc::rtp::packetizer::Payloader;

use crate::error::TransportError;

pub use pcm::L16Payloader;
pub use webrtc::api::media_engine::{
    MIME_TYPE_G722, MIME_TYPE_H264, MIME_TYPE_OPUS, MIME_TYPE_PCMA, MIME_TYPE_PCMU, MIME_TYPE_VP8,
    MIME_TYPE_VP9,
};

pub const MIME_TYPE_L16: &str = "audio/L16";

/// Media kind of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    Audio,
    Video,
}

impl CodecKind {
    /// Kind from the top-level MIME type ("audio/..." or "video/...").
    pub fn from_mime(mime_type: &str) -> Option<Self> {
        let top = mime_type.split('/').next()?;
        if top.eq_ignore_ascii_case("audio") {
            Some(CodecKind::Audio)
        } else if top.eq_ignore_ascii_case("video") {
            Some(CodecKind::Video)
        } else {
            None
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CodecKind::Audio => "audio",
            CodecKind::Video => "video",
        }
    }
}

/// Codec as described in SDP (without the payload type)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecCapability {
    /// MIME type, e.g. "audio/opus"
    pub mime_type: String,
    /// RTP clock rate in Hz
    pub clock_rate: u32,
    /// Channel count (0 when not applicable)
    pub channels: u16,
    /// fmtp parameters line
    #[serde(default)]
    pub sdp_fmtp_line: String,
}

impl CodecCapability {
    pub fn new(mime_type: &str, clock_rate: u32, channels: u16) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            clock_rate,
            channels,
            sdp_fmtp_line: String::new(),
        }
    }

    pub fn with_fmtp(mut self, fmtp: &str) -> Self {
        self.sdp_fmtp_line = fmtp.to_string();
        self
    }

    pub fn kind(&self) -> Option<CodecKind> {
        CodecKind::from_mime(&self.mime_type)
    }

    /// MIME types compare case-insensitively
    pub fn same_mime(&self, other: &CodecCapability) -> bool {
        self.mime_type.eq_ignore_ascii_case(&other.mime_type)
    }
}

/// A negotiated codec: capability plus the payload type chosen for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecParameters {
    pub capability: CodecCapability,
    pub payload_type: u8,
}

/// Find the negotiated entry matching `wanted`.
///
/// An entry with the same MIME type and fmtp line wins; otherwise the
/// first entry with the same MIME type is accepted.
pub fn match_codec<'a>(
    wanted: &CodecCapability,
    offered: &'a [CodecParameters],
) -> Option<&'a CodecParameters> {
    offered
        .iter()
        .find(|c| c.capability.same_mime(wanted) && c.capability.sdp_fmtp_line == wanted.sdp_fmtp_line)
        .or_else(|| offered.iter().find(|c| c.capability.same_mime(wanted)))
}

/// Split `payload` into consecutive slices of at most `size` bytes.
pub(crate) fn split_at_mtu(size: usize, payload: &Bytes) -> Vec<Bytes> {
    if size == 0 || payload.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(payload.len().div_ceil(size));
    let mut offset = 0;
    while offset < payload.len() {
        let end = (offset + size).min(payload.len());
        out.push(payload.slice(offset..end));
        offset = end;
    }
    out
}

fn mime_is(codec: &CodecCapability, mime: &str) -> bool {
    codec.mime_type.eq_ignore_ascii_case(mime)
}

/// Select the payload formatter for a negotiated codec.
pub fn payloader_for_codec(
    codec: &CodecCapability,
) -> Result<Box<dyn Payloader + Send + Sync>, TransportError> {
    let is = |mime: &str| mime_is(codec, mime);

    let payloader: Box<dyn Payloader + Send + Sync> = if is(MIME_TYPE_H264) {
        Box::<H264Payloader>::default()
    } else if is(MIME_TYPE_OPUS) {
        Box::<OpusPayloader>::default()
    } else if is(MIME_TYPE_VP8) {
        Box::<Vp8Payloader>::default()
    } else if is(MIME_TYPE_VP9) {
        Box::<Vp9Payloader>::default()
    } else if is(MIME_TYPE_G722) {
        Box::<G722Payloader>::default()
    } else if is(MIME_TYPE_PCMU) || is(MIME_TYPE_PCMA) {
        Box::<G711Payloader>::default()
    } else if is(MIME_TYPE_L16) {
        Box::new(L16Payloader::new(codec.channels))
    } else {
        return Err(TransportError::UnsupportedCodec(codec.mime_type.clone()));
    };
    Ok(payloader)
}

/// True when the codec's payloader emits each frame as one payload,
/// whatever its size.
pub fn sends_whole_frames(codec: &CodecCapability) -> bool {
    mime_is(codec, MIME_TYPE_OPUS)
}
