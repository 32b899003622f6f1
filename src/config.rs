//! Configuration for the call engine
//!
//! All sections have usable defaults; a TOML file can override any of them.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub signaling: SignalingConfig,
    pub ice: IceConfig,
    pub call: CallConfig,
}

/// Signaling channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// WebSocket URL of the signaling relay
    pub url: String,

    /// Reconnect attempts before declaring permanent failure
    pub max_reconnect_attempts: u32,

    /// Base reconnect delay in milliseconds, doubled per attempt
    pub base_delay_ms: u64,

    /// Reconnect delay ceiling in milliseconds
    pub max_delay_ms: u64,

    /// Outbound messages buffered while disconnected
    pub max_pending_messages: usize,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080".to_string(),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            base_delay_ms: RECONNECT_BASE_DELAY_MS,
            max_delay_ms: RECONNECT_MAX_DELAY_MS,
            max_pending_messages: MAX_PENDING_MESSAGES,
        }
    }
}

impl SignalingConfig {
    /// Reconnect delay for the given attempt number (1-based).
    pub fn reconnect_delay_ms(&self, attempt: u32) -> u64 {
        let exp = self.base_delay_ms.saturating_mul(1u64 << attempt.min(63));
        exp.min(self.max_delay_ms)
    }
}

/// ICE server configuration
///
/// TURN credentials are provisioned externally; this crate only carries them
/// through to the peer-connection factory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IceConfig {
    pub servers: Vec<IceServer>,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            servers: vec![IceServer {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                username: None,
                credential: None,
            }],
        }
    }
}

/// A single STUN/TURN server entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Call session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Seconds allowed between media acquisition and an active connection
    pub setup_timeout_secs: u64,

    /// Seconds between quality samples
    pub quality_sample_interval_secs: u64,

    /// Bitrate cap in bps applied while network quality is poor
    pub poor_quality_bitrate_cap: u32,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            setup_timeout_secs: CALL_SETUP_TIMEOUT.as_secs(),
            quality_sample_interval_secs: QUALITY_SAMPLE_INTERVAL.as_secs(),
            poor_quality_bitrate_cap: POOR_QUALITY_BITRATE_CAP,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
