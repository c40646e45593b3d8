//! Engine configuration.
//!
//! Loaded from JSON; every field has a default so a partial document (or
//! `{}`) is valid.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::{payloader_for_codec, CodecCapability, CodecKind, MIME_TYPE_OPUS};
use crate::error::TransportError;
use crate::stream::{MonitorConfig, PacingConfig};

/// Smallest MTU that still leaves room for a payload after headers
const MIN_MTU: usize = 64;

/// Full engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Local track id
    pub track_id: String,
    /// Local stream id
    pub stream_id: String,
    /// Codec of the local track
    pub codec: CodecCapability,
    /// Payload type used when no negotiation supplies one
    pub payload_type: u8,
    /// Maximum RTP packet size in bytes
    pub mtu: usize,
    /// abs-send-time extension id (0 disables the extension)
    pub abs_send_time_extension_id: u8,
    /// Pacing cadence and sample duration for raw sends
    pub frame_duration_ms: u64,
    /// Producer queue capacity in samples
    pub queue_capacity: usize,
    /// Inbound idle timeout
    pub idle_timeout_ms: u64,
    /// Transport read timeout
    pub read_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            track_id: "audio".to_string(),
            stream_id: "stream".to_string(),
            codec: CodecCapability::new(MIME_TYPE_OPUS, 48000, 1)
                .with_fmtp("useinbandfec=1;stereo=1;sprop-stereo=1;maxaveragebitrate=96000"),
            payload_type: 111,
            mtu: 1200,
            abs_send_time_extension_id: 1,
            frame_duration_ms: 20,
            queue_capacity: 64,
            idle_timeout_ms: 10_000,
            read_timeout_ms: 10,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self, TransportError> {
        let config: EngineConfig =
            serde_json::from_str(json).map_err(|e| TransportError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            TransportError::InvalidConfig(format!("{}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String, TransportError> {
        serde_json::to_string_pretty(self).map_err(|e| TransportError::InvalidConfig(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), TransportError> {
        let invalid = |msg: String| -> Result<(), TransportError> {
            Err(TransportError::InvalidConfig(msg))
        };

        if self.codec.kind() != Some(CodecKind::Audio) {
            return invalid(format!("codec {} is not an audio codec", self.codec.mime_type));
        }
        if let Err(e) = payloader_for_codec(&self.codec) {
            return invalid(e.to_string());
        }
        if self.codec.clock_rate == 0 {
            return invalid("clock_rate must be > 0".to_string());
        }
        if self.payload_type > 127 {
            return invalid(format!("payload_type {} out of range 0-127", self.payload_type));
        }
        if self.mtu < MIN_MTU {
            return invalid(format!("mtu {} below minimum {}", self.mtu, MIN_MTU));
        }
        if self.abs_send_time_extension_id > 14 {
            return invalid(format!(
                "abs_send_time_extension_id {} out of range 0-14",
                self.abs_send_time_extension_id
            ));
        }
        if self.frame_duration_ms == 0 {
            return invalid("frame_duration_ms must be > 0".to_string());
        }
        if self.queue_capacity == 0 {
            return invalid("queue_capacity must be > 0".to_string());
        }
        if self.idle_timeout_ms == 0 || self.read_timeout_ms == 0 {
            return invalid("timeouts must be > 0".to_string());
        }
        if self.read_timeout_ms >= self.idle_timeout_ms {
            return invalid("read_timeout_ms must be shorter than idle_timeout_ms".to_string());
        }
        Ok(())
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(self.frame_duration_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// abs-send-time extension id, `None` when disabled
    pub fn abs_send_time_id(&self) -> Option<u8> {
        match self.abs_send_time_extension_id {
            0 => None,
            id => Some(id),
        }
    }

    pub fn pacing(&self) -> PacingConfig {
        PacingConfig {
            frame_duration: self.frame_duration(),
            queue_capacity: self.queue_capacity,
        }
    }

    pub fn monitor(&self) -> MonitorConfig {
        MonitorConfig {
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
        }
    }
}
