//! Error types for the call engine

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Media acquisition errors
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device access denied: {0}")]
    AccessDenied(String),

    #[error("Unsupported constraints: {0}")]
    UnsupportedConstraints(String),

    #[error("Capability probe failed: {0}")]
    ProbeFailed(String),

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Signaling channel errors
#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Reconnect attempts exhausted after {0} tries")]
    ReconnectExhausted(u32),

    #[error("Message encoding failed: {0}")]
    Encoding(String),
}

/// Call session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("A call is already in progress for conversation {0}")]
    CallInProgress(String),

    #[error("No active call")]
    NoActiveCall,

    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Peer connection failed")]
    PeerConnectionFailed,

    #[error("Call setup timed out")]
    SetupTimeout,

    #[error("Session runtime is gone")]
    RuntimeGone,
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
