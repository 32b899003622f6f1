//! Signaling channel
//!
//! Persistent duplex connection to the signaling relay. Authenticates on
//! every (re)open, buffers outbound messages while disconnected and flushes
//! them FIFO once open, reconnects with exponential backoff, and dispatches
//! decoded messages to the owner. Malformed payloads are logged and dropped;
//! they never terminate the channel.

pub mod message;
pub mod transport;

pub use message::{CallType, IceCandidateInit, SdpType, SessionDescription, SignalingMessage};
pub use transport::{Connector, TransportEvent, TransportPair, WsConnector};

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::SignalingConfig;
use crate::error::SignalingError;

const EVENT_BUFFER: usize = 64;
const COMMAND_BUFFER: usize = 64;

/// Connection readiness as seen by the owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Connecting,
    Open,
    Closed,
}

/// Events delivered to the channel owner
#[derive(Debug)]
pub enum SignalingEvent {
    /// The channel (re)opened and authenticated
    Open,
    /// A decoded inbound message
    Message(SignalingMessage),
    /// Reconnect attempts are exhausted; the channel is permanently failed
    /// and `abandoned` queued messages were discarded.
    Failed { attempts: u32, abandoned: usize },
}

enum Command {
    Send(SignalingMessage),
    Close,
}

/// Handle to a running signaling channel
///
/// Cloneable; the channel itself runs as a background task and is shared
/// across call sessions within the process.
#[derive(Clone)]
pub struct SignalingChannel {
    cmd_tx: mpsc::Sender<Command>,
    readiness: Arc<RwLock<Readiness>>,
}

impl SignalingChannel {
    /// Dial the relay and authenticate.
    ///
    /// Rejects only on a transport-level error during this initial attempt;
    /// later drops are recovered internally with backoff.
    pub async fn connect<C: Connector>(
        connector: C,
        config: SignalingConfig,
        auth_token: impl Into<String>,
    ) -> Result<(Self, mpsc::Receiver<SignalingEvent>), SignalingError> {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let readiness = Arc::new(RwLock::new(Readiness::Connecting));

        let mut pair = connector.connect(&config.url).await?;

        let mut runtime = ChannelRuntime {
            connector,
            config,
            token: auth_token.into(),
            cmd_rx,
            event_tx,
            readiness: readiness.clone(),
            pending: VecDeque::new(),
            attempt: 0,
        };
        runtime
            .open_connection(&mut pair)
            .await
            .map_err(|()| SignalingError::ConnectionFailed("authentication send failed".into()))?;

        tokio::spawn(runtime.run(pair));

        Ok((
            Self { cmd_tx, readiness },
            event_rx,
        ))
    }

    /// Send a message, queueing it if the channel is not open.
    pub async fn send(&self, message: SignalingMessage) -> Result<(), SignalingError> {
        self.cmd_tx
            .send(Command::Send(message))
            .await
            .map_err(|_| SignalingError::ChannelClosed)
    }

    /// Explicitly close the channel; suppresses reconnection and discards
    /// the pending queue.
    pub async fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close).await;
    }

    pub fn readiness(&self) -> Readiness {
        *self.readiness.read()
    }
}

enum Phase {
    Dropped,
    Close,
}

struct ChannelRuntime<C: Connector> {
    connector: C,
    config: SignalingConfig,
    token: String,
    cmd_rx: mpsc::Receiver<Command>,
    event_tx: mpsc::Sender<SignalingEvent>,
    readiness: Arc<RwLock<Readiness>>,
    pending: VecDeque<SignalingMessage>,
    attempt: u32,
}

impl<C: Connector> ChannelRuntime<C> {
    async fn run(mut self, mut pair: TransportPair) {
        loop {
            match self.drive_connection(&mut pair).await {
                Phase::Close => {
                    self.pending.clear();
                    self.set_readiness(Readiness::Closed);
                    return;
                }
                Phase::Dropped => {
                    self.set_readiness(Readiness::Closed);
                    tracing::info!("signaling transport dropped");
                }
            }
            match self.reconnect().await {
                Some(new_pair) => pair = new_pair,
                None => return,
            }
        }
    }

    /// Service commands and inbound frames until the connection drops or the
    /// owner closes the channel.
    async fn drive_connection(&mut self, pair: &mut TransportPair) -> Phase {
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Send(msg)) => {
                        if let Err(msg) = transmit(&pair.outbound, msg).await {
                            self.requeue_front(msg);
                            return Phase::Dropped;
                        }
                    }
                    Some(Command::Close) | None => return Phase::Close,
                },
                ev = pair.inbound.recv() => match ev {
                    Some(TransportEvent::Frame(text)) => self.dispatch(&text).await,
                    Some(TransportEvent::Closed) | None => return Phase::Dropped,
                },
            }
        }
    }

    async fn dispatch(&self, text: &str) {
        match serde_json::from_str::<SignalingMessage>(text) {
            Ok(msg) => {
                tracing::debug!(tag = msg.tag(), "signaling message received");
                let _ = self.event_tx.send(SignalingEvent::Message(msg)).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "discarding malformed signaling message");
            }
        }
    }

    /// Reconnect with exponential backoff, buffering sends in the meantime.
    ///
    /// Returns `None` once the channel is done for good (explicit close or
    /// attempts exhausted).
    async fn reconnect(&mut self) -> Option<TransportPair> {
        loop {
            self.attempt += 1;
            if self.attempt > self.config.max_reconnect_attempts {
                let abandoned = self.pending.len();
                self.pending.clear();
                tracing::error!(
                    attempts = self.config.max_reconnect_attempts,
                    abandoned,
                    "signaling channel permanently failed"
                );
                let _ = self
                    .event_tx
                    .send(SignalingEvent::Failed {
                        attempts: self.attempt - 1,
                        abandoned,
                    })
                    .await;
                self.set_readiness(Readiness::Closed);
                return None;
            }

            let delay = Duration::from_millis(self.config.reconnect_delay_ms(self.attempt));
            tracing::info!(
                attempt = self.attempt,
                max = self.config.max_reconnect_attempts,
                delay_ms = delay.as_millis() as u64,
                "scheduling signaling reconnect"
            );
            if self.wait_buffering(delay).await.is_break() {
                self.pending.clear();
                self.set_readiness(Readiness::Closed);
                return None;
            }

            self.set_readiness(Readiness::Connecting);
            match self.connector.connect(&self.config.url).await {
                Ok(mut pair) => {
                    if self.open_connection(&mut pair).await.is_ok() {
                        return Some(pair);
                    }
                    self.set_readiness(Readiness::Closed);
                }
                Err(e) => {
                    tracing::warn!(attempt = self.attempt, error = %e, "signaling reconnect failed");
                    self.set_readiness(Readiness::Closed);
                }
            }
        }
    }

    /// Authenticate and flush the pending queue on a fresh connection.
    async fn open_connection(&mut self, pair: &mut TransportPair) -> Result<(), ()> {
        let auth = SignalingMessage::Authenticate {
            token: self.token.clone(),
        };
        if transmit(&pair.outbound, auth).await.is_err() {
            return Err(());
        }

        while let Some(msg) = self.pending.pop_front() {
            if let Err(msg) = transmit(&pair.outbound, msg).await {
                self.pending.push_front(msg);
                return Err(());
            }
        }

        self.attempt = 0;
        self.set_readiness(Readiness::Open);
        let _ = self.event_tx.send(SignalingEvent::Open).await;
        Ok(())
    }

    /// Sleep for `delay`, queueing any sends that arrive meanwhile.
    /// Breaks on explicit close.
    async fn wait_buffering(&mut self, delay: Duration) -> ControlFlow<()> {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return ControlFlow::Continue(()),
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Send(msg)) => self.enqueue(msg),
                    Some(Command::Close) | None => return ControlFlow::Break(()),
                },
            }
        }
    }

    /// Return a failed send to the head of the queue so FIFO order survives
    /// the reconnect. The failed message is the oldest outstanding one, so on
    /// overflow it is the one dropped.
    fn requeue_front(&mut self, msg: SignalingMessage) {
        if self.pending.len() >= self.config.max_pending_messages {
            tracing::warn!(
                tag = msg.tag(),
                limit = self.config.max_pending_messages,
                "pending signaling queue full, dropping failed send"
            );
            return;
        }
        self.pending.push_front(msg);
    }

    fn enqueue(&mut self, msg: SignalingMessage) {
        if self.pending.len() >= self.config.max_pending_messages {
            if let Some(dropped) = self.pending.pop_front() {
                tracing::warn!(
                    tag = dropped.tag(),
                    limit = self.config.max_pending_messages,
                    "pending signaling queue full, dropping oldest message"
                );
            }
        }
        self.pending.push_back(msg);
    }

    fn set_readiness(&self, readiness: Readiness) {
        *self.readiness.write() = readiness;
    }
}

/// Encode and hand a message to the transport. Returns the message back on
/// transport failure so the caller can requeue it.
async fn transmit(
    outbound: &mpsc::Sender<String>,
    msg: SignalingMessage,
) -> Result<(), SignalingMessage> {
    let text = match serde_json::to_string(&msg) {
        Ok(text) => text,
        Err(e) => {
            // Our own message types always encode; treat a failure as a bug
            // in the payload, not a transport problem.
            tracing::warn!(tag = msg.tag(), error = %e, "failed to encode signaling message");
            return Ok(());
        }
    };
    tracing::debug!(tag = msg.tag(), "signaling message sent");
    outbound.send(text).await.map_err(|_| msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio::time::Instant;

    /// Scripted connector: each dial pops the next outcome. Successful dials
    /// expose the server side of the transport to the test.
    #[derive(Clone)]
    struct FakeConnector {
        script: Arc<Mutex<VecDeque<DialOutcome>>>,
        dial_times: Arc<Mutex<Vec<Instant>>>,
    }

    enum DialOutcome {
        Ok,
        Err,
    }

    struct ServerSide {
        /// Frames the channel wrote to the transport
        sent: mpsc::Receiver<String>,
        /// Injects frames / close events into the channel
        inject: mpsc::Sender<TransportEvent>,
    }

    impl FakeConnector {
        fn new(script: Vec<DialOutcome>) -> (Self, Arc<Mutex<VecDeque<ServerSide>>>) {
            let connector = Self {
                script: Arc::new(Mutex::new(script.into())),
                dial_times: Arc::new(Mutex::new(Vec::new())),
            };
            (connector, Arc::new(Mutex::new(VecDeque::new())))
        }
    }

    /// Connector plus a shared slot the test pulls established server sides
    /// from.
    #[derive(Clone)]
    struct Harness {
        connector: FakeConnector,
        servers: Arc<Mutex<VecDeque<ServerSide>>>,
    }

    impl Harness {
        fn new(script: Vec<DialOutcome>) -> Self {
            let (connector, servers) = FakeConnector::new(script);
            Self { connector, servers }
        }

        fn next_server(&self) -> ServerSide {
            self.servers
                .lock()
                .pop_front()
                .expect("no established connection")
        }

        fn dial_times(&self) -> Vec<Instant> {
            self.connector.dial_times.lock().clone()
        }
    }

    impl Connector for Harness {
        async fn connect(&self, _url: &str) -> Result<TransportPair, SignalingError> {
            self.connector.dial_times.lock().push(Instant::now());
            let outcome = self
                .connector
                .script
                .lock()
                .pop_front()
                .unwrap_or(DialOutcome::Err);
            match outcome {
                DialOutcome::Ok => {
                    let (out_tx, out_rx) = mpsc::channel(64);
                    let (in_tx, in_rx) = mpsc::channel(64);
                    self.servers.lock().push_back(ServerSide {
                        sent: out_rx,
                        inject: in_tx,
                    });
                    Ok(TransportPair {
                        outbound: out_tx,
                        inbound: in_rx,
                    })
                }
                DialOutcome::Err => Err(SignalingError::ConnectionFailed("scripted".into())),
            }
        }
    }

    fn test_config() -> SignalingConfig {
        SignalingConfig::default()
    }

    fn offer_msg(n: u32) -> SignalingMessage {
        SignalingMessage::Offer {
            offer: SessionDescription::offer(format!("sdp-{n}")),
            conversation_id: format!("conv-{n}"),
            call_type: CallType::Audio,
        }
    }

    async fn recv_sent(server: &mut ServerSide) -> SignalingMessage {
        let text = server.sent.recv().await.expect("transport closed");
        serde_json::from_str(&text).expect("channel wrote invalid JSON")
    }

    #[tokio::test(start_paused = true)]
    async fn test_authenticates_on_connect() {
        let harness = Harness::new(vec![DialOutcome::Ok]);
        let (channel, _events) = SignalingChannel::connect(harness.clone(), test_config(), "tok")
            .await
            .unwrap();
        let mut server = harness.next_server();

        match recv_sent(&mut server).await {
            SignalingMessage::Authenticate { token } => assert_eq!(token, "tok"),
            other => panic!("expected authenticate first, got {other:?}"),
        }
        assert_eq!(channel.readiness(), Readiness::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_dial_failure_rejects() {
        let harness = Harness::new(vec![DialOutcome::Err]);
        let result = SignalingChannel::connect(harness, test_config(), "tok").await;
        assert!(matches!(result, Err(SignalingError::ConnectionFailed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_queue_flushes_in_order() {
        let harness = Harness::new(vec![DialOutcome::Ok, DialOutcome::Ok]);
        let (channel, mut events) = SignalingChannel::connect(harness.clone(), test_config(), "tok")
            .await
            .unwrap();
        let mut first = harness.next_server();
        let _ = recv_sent(&mut first).await; // authenticate

        // Consume the initial open event.
        assert!(matches!(events.recv().await, Some(SignalingEvent::Open)));

        // Drop the connection; subsequent sends must queue.
        first.inject.send(TransportEvent::Closed).await.unwrap();
        drop(first);

        for n in 1..=3 {
            channel.send(offer_msg(n)).await.unwrap();
        }

        // Backoff elapses (paused clock auto-advances), second dial succeeds.
        let mut second = harness.next_server_when_ready().await;
        match recv_sent(&mut second).await {
            SignalingMessage::Authenticate { .. } => {}
            other => panic!("expected authenticate on reopen, got {other:?}"),
        }
        for n in 1..=3 {
            assert_eq!(recv_sent(&mut second).await, offer_msg(n));
        }

        // Queue is empty: a fresh send is delivered immediately after.
        channel.send(offer_msg(9)).await.unwrap();
        assert_eq!(recv_sent(&mut second).await, offer_msg(9));
    }

    impl Harness {
        /// Wait for the channel's reconnect loop to establish the next
        /// connection.
        async fn next_server_when_ready(&self) -> ServerSide {
            loop {
                if let Some(server) = self.servers.lock().pop_front() {
                    return server;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sequence_and_exhaustion() {
        // One good dial, then every reconnect fails.
        let harness = Harness::new(vec![DialOutcome::Ok]);
        let (channel, mut events) = SignalingChannel::connect(harness.clone(), test_config(), "tok")
            .await
            .unwrap();
        let mut server = harness.next_server();
        let _ = recv_sent(&mut server).await;
        let dropped_at = Instant::now();

        channel.send(offer_msg(1)).await.unwrap();
        server.inject.send(TransportEvent::Closed).await.unwrap();
        drop(server);

        let failed = loop {
            match events.recv().await {
                Some(SignalingEvent::Failed { attempts, abandoned }) => break (attempts, abandoned),
                Some(_) => continue,
                None => panic!("event stream ended without failure"),
            }
        };
        assert_eq!(failed.0, 5);
        assert_eq!(failed.1, 1);
        assert_eq!(channel.readiness(), Readiness::Closed);

        // Dial 0 is the initial connect; dials 1..=5 are the reconnects.
        let times = harness.dial_times();
        assert_eq!(times.len(), 6, "a sixth reconnect must not be scheduled");
        let expected_gaps = [2_000u64, 4_000, 8_000, 16_000, 30_000];
        let mut previous = dropped_at;
        for (dial, expected) in times[1..].iter().zip(expected_gaps) {
            let gap = dial.duration_since(previous).as_millis() as u64;
            assert!(
                gap >= expected && gap < expected + 100,
                "expected ~{expected}ms backoff, measured {gap}ms"
            );
            previous = *dial;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_close_stops_reconnection() {
        let harness = Harness::new(vec![DialOutcome::Ok, DialOutcome::Ok]);
        let (channel, _events) = SignalingChannel::connect(harness.clone(), test_config(), "tok")
            .await
            .unwrap();
        let mut server = harness.next_server();
        let _ = recv_sent(&mut server).await;

        channel.close().await;
        tokio::time::sleep(Duration::from_secs(120)).await;

        // Only the initial dial ever happened.
        assert_eq!(harness.dial_times().len(), 1);
        assert_eq!(channel.readiness(), Readiness::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_payload_is_dropped_not_fatal() {
        let harness = Harness::new(vec![DialOutcome::Ok]);
        let (channel, mut events) = SignalingChannel::connect(harness.clone(), test_config(), "tok")
            .await
            .unwrap();
        let mut server = harness.next_server();
        let _ = recv_sent(&mut server).await;

        server
            .inject
            .send(TransportEvent::Frame("{not json".into()))
            .await
            .unwrap();
        server
            .inject
            .send(TransportEvent::Frame(
                serde_json::to_string(&offer_msg(7)).unwrap(),
            ))
            .await
            .unwrap();

        match events.recv().await {
            Some(SignalingEvent::Open) => {}
            other => panic!("expected open event, got {other:?}"),
        }
        match events.recv().await {
            Some(SignalingEvent::Message(msg)) => assert_eq!(msg, offer_msg(7)),
            other => panic!("malformed frame must be skipped, got {other:?}"),
        }

        // Channel survived the garbage.
        channel.send(offer_msg(8)).await.unwrap();
        assert_eq!(recv_sent(&mut server).await, offer_msg(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_send_requeues_under_queue_bound() {
        let mut config = test_config();
        config.max_pending_messages = 2;
        let harness = Harness::new(vec![DialOutcome::Ok, DialOutcome::Ok]);
        let (channel, _events) = SignalingChannel::connect(harness.clone(), config, "tok")
            .await
            .unwrap();
        let mut first = harness.next_server();
        let _ = recv_sent(&mut first).await; // authenticate

        // Kill only the send path; the channel discovers the drop through a
        // failed transmit rather than a close frame.
        let ServerSide { sent, inject } = first;
        drop(sent);
        let _inject = inject;

        // The failed send is requeued at the head, then displaced as the
        // oldest entry when later sends overflow the bound.
        for n in 1..=3 {
            channel.send(offer_msg(n)).await.unwrap();
        }

        let mut second = harness.next_server_when_ready().await;
        match recv_sent(&mut second).await {
            SignalingMessage::Authenticate { .. } => {}
            other => panic!("expected authenticate on reopen, got {other:?}"),
        }
        assert_eq!(recv_sent(&mut second).await, offer_msg(2));
        assert_eq!(recv_sent(&mut second).await, offer_msg(3));

        // Queue drained exactly at the bound; a fresh send follows directly.
        channel.send(offer_msg(9)).await.unwrap();
        assert_eq!(recv_sent(&mut second).await, offer_msg(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_overflow_drops_oldest() {
        let mut config = test_config();
        config.max_pending_messages = 2;
        let harness = Harness::new(vec![DialOutcome::Ok, DialOutcome::Ok]);
        let (channel, _events) = SignalingChannel::connect(harness.clone(), config, "tok")
            .await
            .unwrap();
        let mut first = harness.next_server();
        let _ = recv_sent(&mut first).await;

        first.inject.send(TransportEvent::Closed).await.unwrap();
        drop(first);
        for n in 1..=3 {
            channel.send(offer_msg(n)).await.unwrap();
        }

        let mut second = harness.next_server_when_ready().await;
        let _ = recv_sent(&mut second).await; // authenticate
        assert_eq!(recv_sent(&mut second).await, offer_msg(2));
        assert_eq!(recv_sent(&mut second).await, offer_msg(3));
    }
}
