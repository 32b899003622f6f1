//! # Call Engine
//!
//! Call signaling and session negotiation for 1:1 voice/video calls.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           APP / UI LAYER                         │
//! │        start_call / accept_call / end_call     CallSnapshot      │
//! └───────────────┬──────────────────────────────────▲──────────────┘
//!                 │ commands                          │ watch
//!                 ▼                                   │
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                 Call Session Runtime (session::runtime)          │
//! │   idle → acquiring-media → offering/answering → connecting       │
//! │        → active → ended/failed                                   │
//! │                                                                  │
//! │   ┌────────────────┐  ┌──────────────────┐  ┌─────────────────┐ │
//! │   │ Media Source   │  │ Peer Connection  │  │ Quality Monitor │ │
//! │   │ (media::)      │  │ (session::peer)  │  │ (quality::)     │ │
//! │   │ cpal devices   │  │ offer/answer/ICE │  │ 2s stats tick   │ │
//! │   └────────────────┘  └──────────────────┘  └─────────────────┘ │
//! └───────────────┬──────────────────────────────────▲──────────────┘
//!                 │ offer/answer/ice-candidate        │ events
//!                 ▼                                   │
//! ┌──────────────────────────────────────────────────────────────────┐
//! │              Signaling Channel (signaling::)                     │
//! │   connecting → open → closed, FIFO pending queue,                │
//! │   exponential-backoff reconnect (max 5 attempts)                 │
//! └───────────────┬──────────────────────────────────────────────────┘
//!                 │ JSON over WebSocket
//!                 ▼
//!                          signaling relay
//! ```
//!
//! The message store, auth provider, and UI are external collaborators; this
//! crate consumes an auth token and a conversation id, and transports
//! signaling payloads on their behalf.

pub mod config;
pub mod error;
pub mod media;
pub mod quality;
pub mod session;
pub mod signaling;

pub use error::{Error, Result};

/// Subsystem-wide constants.
pub mod constants {
    use std::time::Duration;

    /// Base reconnect delay for the signaling channel, doubled per attempt.
    pub const RECONNECT_BASE_DELAY_MS: u64 = 1_000;

    /// Ceiling on the reconnect delay.
    pub const RECONNECT_MAX_DELAY_MS: u64 = 30_000;

    /// Reconnect attempts before the channel is declared permanently failed.
    pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

    /// Outbound messages buffered while the channel is not open. On overflow
    /// the oldest message is dropped.
    pub const MAX_PENDING_MESSAGES: usize = 256;

    /// Interval between peer-connection statistics samples.
    pub const QUALITY_SAMPLE_INTERVAL: Duration = Duration::from_secs(2);

    /// Outbound video bitrate cap applied when network quality is poor.
    pub const POOR_QUALITY_BITRATE_CAP: u32 = 500_000;

    /// Consecutive non-poor samples required before the bitrate cap is lifted.
    pub const BITRATE_RECOVERY_SAMPLES: u32 = 3;

    /// Time allowed between leaving media acquisition and reaching `Active`.
    pub const CALL_SETUP_TIMEOUT: Duration = Duration::from_secs(30);

    /// Fallback video capabilities when device probing fails.
    pub const FALLBACK_MAX_WIDTH: u32 = 1920;
    pub const FALLBACK_MAX_HEIGHT: u32 = 1080;
    pub const FALLBACK_MAX_FRAME_RATE: u32 = 60;
}
