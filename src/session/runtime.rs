//! Call session runtime
//!
//! One task per conversation owns the whole session: peer connection, both
//! media streams, the pending-candidate buffer, the setup timer, and the
//! quality sampling tick. Everything reaches it over channels, so handlers
//! run to completion without locks and `end_call` has a single place to
//! cancel from.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Duration, Instant, Interval, MissedTickBehavior};

use crate::config::{CallConfig, IceConfig};
use crate::constants::BITRATE_RECOVERY_SAMPLES;
use crate::error::{Error, MediaError, SessionError};
use crate::media::{MediaSource, MediaStream, QualityProfile};
use crate::quality::{BitrateAction, BitrateController, NetworkQuality, QualitySample};
use crate::session::manager::CallManagerEvent;
use crate::session::peer::{PeerConnection, PeerConnectionFactory, PeerEvent};
use crate::session::{
    apply_connection_status, CallDirection, CallSnapshot, CallState, ConnectionEffect,
    ConnectionStatus,
};
use crate::signaling::{
    CallType, IceCandidateInit, SessionDescription, SignalingChannel, SignalingEvent,
    SignalingMessage,
};

/// Remote candidates held while no remote description exists.
const CANDIDATE_BUFFER_LIMIT: usize = 64;

pub(crate) enum CallCommand {
    StartCall {
        call_type: CallType,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    AcceptCall {
        offer: SessionDescription,
        call_type: CallType,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    EndCall {
        reply: oneshot::Sender<()>,
    },
}

/// The one live session. Created whole, destroyed whole.
struct Session<P> {
    epoch: u64,
    direction: CallDirection,
    call_type: CallType,
    state: CallState,
    connection_status: ConnectionStatus,
    network_quality: NetworkQuality,
    local_stream: Option<MediaStream>,
    remote_stream: Option<MediaStream>,
    peer: Option<P>,
    remote_description_set: bool,
    pending_offer: Option<SessionDescription>,
    bitrate: BitrateController,
}

pub(crate) struct CallRuntime<M: MediaSource, F: PeerConnectionFactory> {
    conversation_id: String,
    media: Arc<M>,
    factory: F,
    signaling: SignalingChannel,
    call_config: CallConfig,
    ice: IceConfig,
    cmd_rx: mpsc::Receiver<CallCommand>,
    signaling_rx: Option<mpsc::Receiver<SignalingEvent>>,
    event_tx: mpsc::Sender<CallManagerEvent>,
    snapshot_tx: watch::Sender<CallSnapshot>,
    media_tx: mpsc::Sender<(u64, Result<MediaStream, MediaError>)>,
    media_rx: mpsc::Receiver<(u64, Result<MediaStream, MediaError>)>,
    session: Option<Session<F::Connection>>,
    peer_rx: Option<mpsc::Receiver<PeerEvent>>,
    quality_interval: Option<Interval>,
    setup_deadline: Option<Instant>,
    setup_reply: Option<oneshot::Sender<Result<(), Error>>>,
    candidate_buffer: Vec<IceCandidateInit>,
    epoch: u64,
}

impl<M: MediaSource, F: PeerConnectionFactory> CallRuntime<M, F> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        conversation_id: String,
        media: M,
        factory: F,
        signaling: SignalingChannel,
        signaling_rx: mpsc::Receiver<SignalingEvent>,
        call_config: CallConfig,
        ice: IceConfig,
        cmd_rx: mpsc::Receiver<CallCommand>,
        event_tx: mpsc::Sender<CallManagerEvent>,
        snapshot_tx: watch::Sender<CallSnapshot>,
    ) -> Self {
        let (media_tx, media_rx) = mpsc::channel(4);
        Self {
            conversation_id,
            media: Arc::new(media),
            factory,
            signaling,
            call_config,
            ice,
            cmd_rx,
            signaling_rx: Some(signaling_rx),
            event_tx,
            snapshot_tx,
            media_tx,
            media_rx,
            session: None,
            peer_rx: None,
            quality_interval: None,
            setup_deadline: None,
            setup_reply: None,
            candidate_buffer: Vec::new(),
            epoch: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd).await,
                    // Manager handle dropped: release everything and exit.
                    None => {
                        self.teardown(CallState::Ended);
                        return;
                    }
                },
                ev = recv_or_pending(&mut self.signaling_rx) => match ev {
                    Some(ev) => self.on_signaling_event(ev).await,
                    None => self.on_signaling_gone().await,
                },
                Some((epoch, result)) = self.media_rx.recv() => {
                    self.on_media_ready(epoch, result).await;
                }
                ev = recv_or_pending(&mut self.peer_rx) => match ev {
                    Some(ev) => self.on_peer_event(ev).await,
                    None => {
                        tracing::debug!("peer event channel closed");
                        self.peer_rx = None;
                    }
                },
                _ = tick_or_pending(&mut self.quality_interval) => {
                    self.on_quality_tick().await;
                }
                _ = sleep_until_or_pending(self.setup_deadline) => {
                    self.on_setup_timeout().await;
                }
            }
        }
    }

    async fn on_command(&mut self, cmd: CallCommand) {
        match cmd {
            CallCommand::StartCall { call_type, reply } => {
                if self.session.is_some() {
                    let _ = reply.send(Err(SessionError::CallInProgress(
                        self.conversation_id.clone(),
                    )
                    .into()));
                    return;
                }
                self.begin_session(CallDirection::Outgoing, call_type, None, reply);
            }
            CallCommand::AcceptCall {
                offer,
                call_type,
                reply,
            } => {
                if self.session.is_some() {
                    let _ = reply.send(Err(SessionError::CallInProgress(
                        self.conversation_id.clone(),
                    )
                    .into()));
                    return;
                }
                self.begin_session(CallDirection::Incoming, call_type, Some(offer), reply);
            }
            CallCommand::EndCall { reply } => {
                self.teardown(CallState::Ended);
                let _ = reply.send(());
            }
        }
    }

    fn begin_session(
        &mut self,
        direction: CallDirection,
        call_type: CallType,
        pending_offer: Option<SessionDescription>,
        reply: oneshot::Sender<Result<(), Error>>,
    ) {
        self.epoch += 1;
        self.session = Some(Session {
            epoch: self.epoch,
            direction,
            call_type,
            state: CallState::AcquiringMedia,
            connection_status: ConnectionStatus::Connecting,
            network_quality: NetworkQuality::Good,
            local_stream: None,
            remote_stream: None,
            peer: None,
            remote_description_set: false,
            pending_offer,
            bitrate: BitrateController::new(
                self.call_config.poor_quality_bitrate_cap,
                BITRATE_RECOVERY_SAMPLES,
            ),
        });
        self.setup_reply = Some(reply);
        self.publish();
        tracing::info!(
            conversation = %self.conversation_id,
            ?direction,
            ?call_type,
            "acquiring media"
        );

        // Acquisition runs off the session task; the result comes back
        // stamped with the epoch so a session ended in the meantime can
        // discard it.
        let media = self.media.clone();
        let media_tx = self.media_tx.clone();
        let epoch = self.epoch;
        let include_video = call_type.has_video();
        tokio::spawn(async move {
            let result = media.acquire(QualityProfile::High, include_video).await;
            let _ = media_tx.send((epoch, result)).await;
        });
    }

    async fn on_media_ready(&mut self, epoch: u64, result: Result<MediaStream, MediaError>) {
        let current = self
            .session
            .as_ref()
            .is_some_and(|s| s.epoch == epoch && s.state == CallState::AcquiringMedia);
        if !current {
            // The session ended while acquisition was in flight; release the
            // stream and forget about it.
            if let Ok(stream) = result {
                stream.stop_all();
            }
            return;
        }

        let stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                self.fail_session(e.into()).await;
                return;
            }
        };

        let (mut peer, peer_rx) = match self.factory.create(&self.ice) {
            Ok(pair) => pair,
            Err(e) => {
                stream.stop_all();
                self.fail_session(e.into()).await;
                return;
            }
        };
        for track in stream.tracks() {
            peer.add_track(track);
        }

        let (direction, call_type, pending_offer) = {
            let Some(s) = self.session.as_mut() else {
                stream.stop_all();
                peer.close();
                return;
            };
            s.local_stream = Some(stream);
            s.state = match s.direction {
                CallDirection::Outgoing => CallState::Offering,
                CallDirection::Incoming => CallState::Answering,
            };
            (s.direction, s.call_type, s.pending_offer.take())
        };
        self.publish();

        let outcome = match direction {
            CallDirection::Outgoing => self.negotiate_offer(&mut peer, call_type).await,
            CallDirection::Incoming => self.negotiate_answer(&mut peer, pending_offer).await,
        };
        if let Err(e) = outcome {
            peer.close();
            self.fail_session(e).await;
            return;
        }

        if let Some(s) = self.session.as_mut() {
            if direction == CallDirection::Incoming {
                s.remote_description_set = true;
            }
            s.peer = Some(peer);
        }
        self.peer_rx = Some(peer_rx);
        self.setup_deadline =
            Some(Instant::now() + Duration::from_secs(self.call_config.setup_timeout_secs));
        if let Some(reply) = self.setup_reply.take() {
            let _ = reply.send(Ok(()));
        }
        self.publish();
    }

    /// Outgoing leg: offer → local description → signaling.
    async fn negotiate_offer(
        &mut self,
        peer: &mut F::Connection,
        call_type: CallType,
    ) -> Result<(), Error> {
        let offer = peer.create_offer().await?;
        peer.set_local_description(offer.clone()).await?;
        self.signaling
            .send(SignalingMessage::Offer {
                offer,
                conversation_id: self.conversation_id.clone(),
                call_type,
            })
            .await?;
        Ok(())
    }

    /// Incoming leg: remote offer → buffered candidates → answer → signaling.
    async fn negotiate_answer(
        &mut self,
        peer: &mut F::Connection,
        offer: Option<SessionDescription>,
    ) -> Result<(), Error> {
        let offer = offer
            .ok_or_else(|| SessionError::Negotiation("incoming call without an offer".into()))?;
        peer.set_remote_description(offer).await?;

        // Candidates that beat the offer/accept are applied in receipt order
        // now that a remote description exists.
        let buffered: Vec<IceCandidateInit> = self.candidate_buffer.drain(..).collect();
        for candidate in buffered {
            peer.add_ice_candidate(candidate).await?;
        }

        let answer = peer.create_answer().await?;
        peer.set_local_description(answer.clone()).await?;
        self.signaling
            .send(SignalingMessage::Answer {
                answer,
                conversation_id: self.conversation_id.clone(),
            })
            .await?;
        Ok(())
    }

    async fn on_signaling_event(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::Open => tracing::debug!("signaling channel open"),
            SignalingEvent::Failed {
                attempts,
                abandoned,
            } => {
                tracing::error!(attempts, abandoned, "signaling channel permanently failed");
                let _ = self
                    .event_tx
                    .send(CallManagerEvent::SignalingFailed { attempts })
                    .await;
                self.fail_if_negotiating().await;
            }
            SignalingEvent::Message(msg) => self.on_signaling_message(msg).await,
        }
    }

    async fn on_signaling_gone(&mut self) {
        self.signaling_rx = None;
        self.fail_if_negotiating().await;
    }

    /// A dead signaling channel cannot complete a negotiation, but an active
    /// call keeps its media path and stays up.
    async fn fail_if_negotiating(&mut self) {
        let negotiating = self
            .session
            .as_ref()
            .is_some_and(|s| !s.state.is_terminal() && s.state != CallState::Active);
        if negotiating {
            self.fail_session(Error::Signaling(
                crate::error::SignalingError::ChannelClosed,
            ))
            .await;
        }
    }

    async fn on_signaling_message(&mut self, msg: SignalingMessage) {
        if let Some(conversation) = msg.conversation_id() {
            if conversation != self.conversation_id {
                tracing::debug!(
                    conversation,
                    "ignoring signaling message for another conversation"
                );
                return;
            }
        }
        match msg {
            SignalingMessage::Offer {
                offer, call_type, ..
            } => self.on_remote_offer(offer, call_type).await,
            SignalingMessage::Answer { answer, .. } => self.on_remote_answer(answer).await,
            SignalingMessage::IceCandidate { candidate, .. } => {
                self.on_remote_candidate(candidate).await;
            }
            SignalingMessage::AuthenticateAck { success, message } => {
                if success {
                    tracing::debug!("signaling authentication acknowledged");
                } else {
                    tracing::warn!(
                        message = message.as_deref().unwrap_or(""),
                        "signaling authentication rejected"
                    );
                }
            }
            SignalingMessage::Authenticate { .. } => {
                tracing::debug!("ignoring authenticate message from relay");
            }
        }
    }

    async fn on_remote_offer(&mut self, offer: SessionDescription, call_type: CallType) {
        let live = self
            .session
            .as_ref()
            .is_some_and(|s| s.state.accepts_remote_updates());
        if !live {
            // Fresh incoming call: surface it and let the app accept.
            self.candidate_buffer.clear();
            let _ = self
                .event_tx
                .send(CallManagerEvent::IncomingCall {
                    conversation_id: self.conversation_id.clone(),
                    offer,
                    call_type,
                })
                .await;
            return;
        }

        // Renegotiation of the live session: answer in place.
        let outcome: Result<SessionDescription, SessionError> = {
            let Some(s) = self.session.as_mut() else { return };
            s.remote_description_set = true;
            let Some(peer) = s.peer.as_mut() else { return };
            async {
                peer.set_remote_description(offer).await?;
                let answer = peer.create_answer().await?;
                peer.set_local_description(answer.clone()).await?;
                Ok(answer)
            }
            .await
        };
        match outcome {
            Ok(answer) => {
                tracing::info!(conversation = %self.conversation_id, "renegotiated session");
                if let Err(e) = self
                    .signaling
                    .send(SignalingMessage::Answer {
                        answer,
                        conversation_id: self.conversation_id.clone(),
                    })
                    .await
                {
                    self.fail_session(e.into()).await;
                }
            }
            Err(e) => self.fail_session(e.into()).await,
        }
    }

    async fn on_remote_answer(&mut self, answer: SessionDescription) {
        let expecting = self.session.as_ref().is_some_and(|s| {
            s.direction == CallDirection::Outgoing
                && matches!(s.state, CallState::Offering | CallState::Connecting)
        });
        if !expecting {
            tracing::warn!("discarding unexpected answer");
            return;
        }

        let buffered: Vec<IceCandidateInit> = self.candidate_buffer.drain(..).collect();
        let outcome: Result<(), SessionError> = {
            let Some(s) = self.session.as_mut() else { return };
            let Some(peer) = s.peer.as_mut() else { return };
            async {
                peer.set_remote_description(answer).await?;
                for candidate in buffered {
                    peer.add_ice_candidate(candidate).await?;
                }
                Ok(())
            }
            .await
        };
        match outcome {
            Ok(()) => {
                if let Some(s) = self.session.as_mut() {
                    s.remote_description_set = true;
                }
            }
            Err(e) => self.fail_session(e.into()).await,
        }
    }

    async fn on_remote_candidate(&mut self, candidate: IceCandidateInit) {
        let ready = self.session.as_ref().is_some_and(|s| {
            s.state.accepts_remote_updates() && s.remote_description_set
        });
        if !ready {
            // No remote description yet (or no session: the offer may still
            // be waiting for the app to accept). Hold the candidate.
            if self.candidate_buffer.len() >= CANDIDATE_BUFFER_LIMIT {
                tracing::warn!("candidate buffer full, dropping oldest");
                self.candidate_buffer.remove(0);
            }
            self.candidate_buffer.push(candidate);
            return;
        }

        let outcome: Result<(), SessionError> = {
            let Some(s) = self.session.as_mut() else { return };
            let Some(peer) = s.peer.as_mut() else { return };
            peer.add_ice_candidate(candidate).await
        };
        if let Err(e) = outcome {
            self.fail_session(e.into()).await;
        }
    }

    async fn on_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::ConnectionStateChanged(state) => {
                let status = state.as_status();
                let effect = {
                    let Some(s) = self.session.as_mut() else { return };
                    s.connection_status = status;
                    let (next, effect) = apply_connection_status(s.state, status);
                    s.state = next;
                    effect
                };
                match effect {
                    ConnectionEffect::CallActivated => {
                        self.setup_deadline = None;
                        self.quality_interval = Some(self.sampling_interval());
                        tracing::info!(conversation = %self.conversation_id, "call active");
                    }
                    ConnectionEffect::CallFailed => {
                        self.fail_session(SessionError::PeerConnectionFailed.into())
                            .await;
                        return;
                    }
                    ConnectionEffect::None => {}
                }
                self.publish();
            }
            PeerEvent::IceCandidate(candidate) => {
                let message = SignalingMessage::IceCandidate {
                    candidate,
                    conversation_id: self.conversation_id.clone(),
                };
                if let Err(e) = self.signaling.send(message).await {
                    tracing::warn!(error = %e, "failed to signal local candidate");
                }
            }
            PeerEvent::RemoteTrack(track) => {
                let Some(s) = self.session.as_mut() else { return };
                s.remote_stream
                    .get_or_insert_with(MediaStream::empty)
                    .add_track(track);
                self.publish();
            }
        }
    }

    fn sampling_interval(&self) -> Interval {
        let period = Duration::from_secs(self.call_config.quality_sample_interval_secs);
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    }

    async fn on_quality_tick(&mut self) {
        let report = {
            let Some(s) = self.session.as_mut() else {
                self.quality_interval = None;
                return;
            };
            if s.state != CallState::Active {
                self.quality_interval = None;
                return;
            }
            let Some(peer) = s.peer.as_mut() else { return };
            peer.stats().await
        };

        let report = match report {
            Ok(report) => report,
            Err(e) => {
                tracing::debug!(error = %e, "statistics unavailable this tick");
                return;
            }
        };

        let sample = QualitySample::from_stats(report.inbound_video);
        let quality = sample.classify();
        tracing::debug!(
            packet_loss = sample.packet_loss,
            jitter_ms = sample.jitter_ms,
            ?quality,
            "quality sample"
        );

        let Some(s) = self.session.as_mut() else { return };
        s.network_quality = quality;
        match s.bitrate.observe(quality) {
            BitrateAction::Cap(bps) => {
                if let Some(peer) = s.peer.as_mut() {
                    peer.set_outgoing_video_bitrate(Some(bps));
                    tracing::info!(bps, "capping outbound video bitrate");
                }
            }
            BitrateAction::Lift => {
                if let Some(peer) = s.peer.as_mut() {
                    peer.set_outgoing_video_bitrate(None);
                    tracing::info!("lifting outbound video bitrate cap");
                }
            }
            BitrateAction::None => {}
        }
        self.publish();
    }

    async fn on_setup_timeout(&mut self) {
        self.setup_deadline = None;
        let stalled = self
            .session
            .as_ref()
            .is_some_and(|s| !s.state.is_terminal() && s.state != CallState::Active);
        if stalled {
            self.fail_session(SessionError::SetupTimeout.into()).await;
        }
    }

    async fn fail_session(&mut self, error: Error) {
        tracing::error!(conversation = %self.conversation_id, error = %error, "call failed");
        if let Some(reply) = self.setup_reply.take() {
            let _ = reply.send(Err(error));
        }
        self.teardown(CallState::Failed);
    }

    /// Release everything the session owns and publish the terminal state.
    /// Safe to call from any state; a second call is a no-op.
    fn teardown(&mut self, final_state: CallState) {
        self.setup_deadline = None;
        self.quality_interval = None;
        self.peer_rx = None;
        self.candidate_buffer.clear();
        if let Some(reply) = self.setup_reply.take() {
            // Ended cleanly before setup finished; that is not an error.
            let _ = reply.send(Ok(()));
        }

        let Some(mut s) = self.session.take() else {
            return;
        };
        self.snapshot_tx.send_modify(|snap| snap.state = CallState::Ending);

        if let Some(stream) = s.local_stream.take() {
            stream.stop_all();
        }
        if let Some(stream) = s.remote_stream.take() {
            stream.stop_all();
        }
        if let Some(mut peer) = s.peer.take() {
            peer.close();
        }

        let _ = self.snapshot_tx.send(CallSnapshot {
            state: final_state,
            connection_status: if final_state == CallState::Failed {
                ConnectionStatus::Failed
            } else {
                ConnectionStatus::Disconnected
            },
            ..CallSnapshot::default()
        });
        tracing::info!(conversation = %self.conversation_id, ?final_state, "session torn down");
    }

    fn publish(&self) {
        let snapshot = match &self.session {
            Some(s) => CallSnapshot {
                state: s.state,
                direction: Some(s.direction),
                call_type: Some(s.call_type),
                connection_status: s.connection_status,
                network_quality: s.network_quality,
                local_stream: s.local_stream.clone(),
                remote_stream: s.remote_stream.clone(),
            },
            None => CallSnapshot::default(),
        };
        let _ = self.snapshot_tx.send(snapshot);
    }
}

async fn recv_or_pending<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn tick_or_pending(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until_or_pending(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
