//! Call session management
//!
//! One [`manager::CallManager`] per conversation. The session runtime owns the
//! peer connection and both media streams exclusively; they are created and
//! destroyed together.

pub mod manager;
pub mod peer;
pub(crate) mod runtime;

pub use manager::{CallManager, CallManagerEvent};
pub use peer::{
    InboundVideoStats, PeerConnection, PeerConnectionFactory, PeerConnectionState, PeerEvent,
    StatsReport,
};

use crate::media::MediaStream;
use crate::quality::NetworkQuality;
use crate::signaling::CallType;

/// Call lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    AcquiringMedia,
    Offering,
    Answering,
    Connecting,
    Active,
    Ending,
    Ended,
    Failed,
}

impl CallState {
    /// Terminal states: nothing further happens to the session.
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Idle | CallState::Ended | CallState::Failed)
    }

    /// States in which remote ICE candidates and renegotiation messages are
    /// applied to the peer connection.
    pub fn accepts_remote_updates(self) -> bool {
        matches!(
            self,
            CallState::Offering | CallState::Answering | CallState::Connecting | CallState::Active
        )
    }
}

/// Who initiated the call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

/// Mirrors the underlying transport's state; distinct from [`CallState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Observable copy of the session, published on a watch channel for the UI
#[derive(Debug, Clone)]
pub struct CallSnapshot {
    pub state: CallState,
    pub direction: Option<CallDirection>,
    pub call_type: Option<CallType>,
    pub connection_status: ConnectionStatus,
    pub network_quality: NetworkQuality,
    pub local_stream: Option<MediaStream>,
    pub remote_stream: Option<MediaStream>,
}

impl Default for CallSnapshot {
    fn default() -> Self {
        Self {
            state: CallState::Idle,
            direction: None,
            call_type: None,
            connection_status: ConnectionStatus::Disconnected,
            network_quality: NetworkQuality::Good,
            local_stream: None,
            remote_stream: None,
        }
    }
}

/// Side effect requested by a connection-state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionEffect {
    None,
    /// The call just became active: stop the setup timer, start sampling.
    CallActivated,
    /// The transport failed: tear the session down as failed.
    CallFailed,
}

/// Pure transition for a mapped peer-connection status change.
pub(crate) fn apply_connection_status(
    state: CallState,
    status: ConnectionStatus,
) -> (CallState, ConnectionEffect) {
    match (state, status) {
        (
            CallState::Offering | CallState::Answering | CallState::Connecting,
            ConnectionStatus::Connected,
        ) => (CallState::Active, ConnectionEffect::CallActivated),
        (CallState::Offering | CallState::Answering, ConnectionStatus::Connecting) => {
            (CallState::Connecting, ConnectionEffect::None)
        }
        (state, ConnectionStatus::Failed) if !state.is_terminal() => {
            (CallState::Failed, ConnectionEffect::CallFailed)
        }
        (state, _) => (state, ConnectionEffect::None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connected_activates_from_any_negotiating_state() {
        for state in [CallState::Offering, CallState::Answering, CallState::Connecting] {
            let (next, effect) = apply_connection_status(state, ConnectionStatus::Connected);
            assert_eq!(next, CallState::Active);
            assert_eq!(effect, ConnectionEffect::CallActivated);
        }
    }

    #[test]
    fn test_connecting_status_advances_negotiation() {
        let (next, effect) = apply_connection_status(CallState::Offering, ConnectionStatus::Connecting);
        assert_eq!(next, CallState::Connecting);
        assert_eq!(effect, ConnectionEffect::None);
    }

    #[test]
    fn test_failure_fails_live_session_only() {
        let (next, effect) = apply_connection_status(CallState::Active, ConnectionStatus::Failed);
        assert_eq!(next, CallState::Failed);
        assert_eq!(effect, ConnectionEffect::CallFailed);

        let (next, effect) = apply_connection_status(CallState::Ended, ConnectionStatus::Failed);
        assert_eq!(next, CallState::Ended);
        assert_eq!(effect, ConnectionEffect::None);
    }

    #[test]
    fn test_disconnected_status_does_not_end_active_call() {
        // ICE may restart; a disconnected transport is not a failed call.
        let (next, effect) =
            apply_connection_status(CallState::Active, ConnectionStatus::Disconnected);
        assert_eq!(next, CallState::Active);
        assert_eq!(effect, ConnectionEffect::None);
    }
}
