//! Call manager handle
//!
//! Public entry point for one conversation's calls. The manager spawns the
//! session runtime and talks to it over channels; it enforces nothing itself
//! beyond delivering commands, so every invariant lives in one place (the
//! runtime task).

use tokio::sync::{mpsc, oneshot, watch};

use crate::config::{CallConfig, IceConfig};
use crate::error::{Error, Result, SessionError};
use crate::media::MediaSource;
use crate::session::peer::PeerConnectionFactory;
use crate::session::runtime::{CallCommand, CallRuntime};
use crate::session::CallSnapshot;
use crate::signaling::{CallType, SessionDescription, SignalingChannel, SignalingEvent};

const COMMAND_BUFFER: usize = 16;
const EVENT_BUFFER: usize = 16;

/// Events the application layer reacts to (ringing, error surfaces)
#[derive(Debug)]
pub enum CallManagerEvent {
    /// The remote party proposed a call; answer with
    /// [`CallManager::accept_call`].
    IncomingCall {
        conversation_id: String,
        offer: SessionDescription,
        call_type: CallType,
    },
    /// The signaling channel exhausted its reconnect attempts.
    SignalingFailed { attempts: u32 },
}

/// Handle to the per-conversation call runtime
#[derive(Clone)]
pub struct CallManager {
    cmd_tx: mpsc::Sender<CallCommand>,
    snapshot_rx: watch::Receiver<CallSnapshot>,
}

impl CallManager {
    /// Spawn the session runtime for one conversation.
    ///
    /// `signaling_events` must be the receiver returned by
    /// [`SignalingChannel::connect`] so the runtime sees inbound messages.
    pub fn new<M, F>(
        conversation_id: impl Into<String>,
        media: M,
        factory: F,
        signaling: SignalingChannel,
        signaling_events: mpsc::Receiver<SignalingEvent>,
        call_config: CallConfig,
        ice: IceConfig,
    ) -> (Self, mpsc::Receiver<CallManagerEvent>)
    where
        M: MediaSource,
        F: PeerConnectionFactory,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(CallSnapshot::default());

        let runtime = CallRuntime::new(
            conversation_id.into(),
            media,
            factory,
            signaling,
            signaling_events,
            call_config,
            ice,
            cmd_rx,
            event_tx,
            snapshot_tx,
        );
        tokio::spawn(runtime.run());

        (
            Self {
                cmd_tx,
                snapshot_rx,
            },
            event_rx,
        )
    }

    /// Start an outgoing call. Resolves once the offer has been handed to the
    /// signaling channel; rejects on acquisition or negotiation failure, or if
    /// a call is already in progress.
    pub async fn start_call(&self, call_type: CallType) -> Result<()> {
        let (reply, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(CallCommand::StartCall { call_type, reply })
            .await
            .map_err(|_| Error::Session(SessionError::RuntimeGone))?;
        reply_rx
            .await
            .map_err(|_| Error::Session(SessionError::RuntimeGone))?
    }

    /// Answer an incoming call previously surfaced via
    /// [`CallManagerEvent::IncomingCall`].
    pub async fn accept_call(
        &self,
        offer: SessionDescription,
        call_type: CallType,
    ) -> Result<()> {
        let (reply, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(CallCommand::AcceptCall {
                offer,
                call_type,
                reply,
            })
            .await
            .map_err(|_| Error::Session(SessionError::RuntimeGone))?;
        reply_rx
            .await
            .map_err(|_| Error::Session(SessionError::RuntimeGone))?
    }

    /// End the current call. Idempotent: ending an already-ended (or never
    /// started) call is a no-op. Resolves once all owned resources are
    /// released.
    pub async fn end_call(&self) -> Result<()> {
        let (reply, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(CallCommand::EndCall { reply })
            .await
            .map_err(|_| Error::Session(SessionError::RuntimeGone))?;
        reply_rx
            .await
            .map_err(|_| Error::Session(SessionError::RuntimeGone))
    }

    /// Current observable session state.
    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Watch channel for state updates (UI binding).
    pub fn watch_state(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshot_rx.clone()
    }
}
