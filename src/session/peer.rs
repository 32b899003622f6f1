//! Peer connection seam
//!
//! The platform RTC stack is a collaborator, the same way the original treats
//! the browser's. The session runtime drives it exclusively through these
//! traits; events come back on a channel so every state change flows through
//! the explicit transition functions in the session module.

use std::future::Future;
use tokio::sync::mpsc;

use crate::config::IceConfig;
use crate::error::SessionError;
use crate::media::MediaTrack;
use crate::session::ConnectionStatus;
use crate::signaling::{IceCandidateInit, SessionDescription};

/// Raw connection state reported by the peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerConnectionState {
    /// Map onto the session's observable status.
    pub fn as_status(self) -> ConnectionStatus {
        match self {
            PeerConnectionState::New
            | PeerConnectionState::Disconnected
            | PeerConnectionState::Closed => ConnectionStatus::Disconnected,
            PeerConnectionState::Connecting => ConnectionStatus::Connecting,
            PeerConnectionState::Connected => ConnectionStatus::Connected,
            PeerConnectionState::Failed => ConnectionStatus::Failed,
        }
    }
}

/// Events emitted by a peer connection
#[derive(Debug)]
pub enum PeerEvent {
    ConnectionStateChanged(PeerConnectionState),
    /// A local candidate was discovered and should be signaled to the remote
    /// party.
    IceCandidate(IceCandidateInit),
    /// A remote track arrived.
    RemoteTrack(MediaTrack),
}

/// Inbound video statistics entry from a stats report
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InboundVideoStats {
    pub packets_received: u64,
    pub packets_lost: u64,
    pub jitter_ms: f64,
}

/// Point-in-time statistics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsReport {
    pub inbound_video: Option<InboundVideoStats>,
}

/// The negotiated transport/media connection between two call participants
pub trait PeerConnection: Send + 'static {
    fn add_track(&mut self, track: &MediaTrack);

    fn create_offer(
        &mut self,
    ) -> impl Future<Output = Result<SessionDescription, SessionError>> + Send;

    fn create_answer(
        &mut self,
    ) -> impl Future<Output = Result<SessionDescription, SessionError>> + Send;

    fn set_local_description(
        &mut self,
        description: SessionDescription,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    fn add_ice_candidate(
        &mut self,
        candidate: IceCandidateInit,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    fn stats(&mut self) -> impl Future<Output = Result<StatsReport, SessionError>> + Send;

    /// Cap (or uncap, with `None`) the outbound video sender's bitrate.
    fn set_outgoing_video_bitrate(&mut self, max_bps: Option<u32>);

    /// Close the connection and release transport resources. Idempotent.
    fn close(&mut self);
}

/// Creates peer connections from ICE configuration
pub trait PeerConnectionFactory: Send + 'static {
    type Connection: PeerConnection;

    fn create(
        &self,
        ice: &IceConfig,
    ) -> Result<(Self::Connection, mpsc::Receiver<PeerEvent>), SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_mapping() {
        assert_eq!(
            PeerConnectionState::New.as_status(),
            ConnectionStatus::Disconnected
        );
        assert_eq!(
            PeerConnectionState::Closed.as_status(),
            ConnectionStatus::Disconnected
        );
        assert_eq!(
            PeerConnectionState::Disconnected.as_status(),
            ConnectionStatus::Disconnected
        );
        assert_eq!(
            PeerConnectionState::Connecting.as_status(),
            ConnectionStatus::Connecting
        );
        assert_eq!(
            PeerConnectionState::Connected.as_status(),
            ConnectionStatus::Connected
        );
        assert_eq!(
            PeerConnectionState::Failed.as_status(),
            ConnectionStatus::Failed
        );
    }
}
