//! Reconnecting push connections
//!
//! One [`ConnectionManager`] per push venue owns a single logical websocket
//! session. Transport failures never reach callers: they are logged and
//! drive a bounded exponential backoff, after which the full tracked token
//! set is resubscribed because venues do not remember past sessions.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, trace, warn};

use oddsfeed_core::{ConnectionConfig, FeedError, FeedResult, Venue};

use crate::adapters::VenueProtocol;
use crate::backoff::Backoff;
use crate::state::PriceCache;

/// Outbound half of a session
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = FeedError> + Send>>;

/// Inbound half of a session
pub type FrameStream = Pin<Box<dyn Stream<Item = FeedResult<Message>> + Send>>;

/// Opens duplex sessions; the websocket implementation is [`WsConnector`]
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> FeedResult<(FrameSink, FrameStream)>;
}

/// tokio-tungstenite connector
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

#[async_trait::async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> FeedResult<(FrameSink, FrameStream)> {
        let (ws_stream, response) = connect_async(url)
            .await
            .map_err(|e| FeedError::ConnectionFailed(e.to_string()))?;
        debug!(url, status = %response.status(), "WebSocket handshake complete");

        let (write, read) = ws_stream.split();
        let sink = write.sink_map_err(|e| FeedError::WebSocket(e.to_string()));
        let stream = read.map(|frame| frame.map_err(|e| FeedError::WebSocket(e.to_string())));

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

/// Lifecycle of one venue transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

/// Token-set changes forwarded to the live session
#[derive(Debug)]
enum Command {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
}

struct Shared {
    venue: Venue,
    url: String,
    config: ConnectionConfig,
    protocol: Arc<dyn VenueProtocol>,
    connector: Arc<dyn Connector>,
    cache: Arc<PriceCache>,

    tokens: RwLock<BTreeSet<String>>,
    state: RwLock<ConnectionState>,
    /// Present only while a session is live
    outbound: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    /// Set once by `disconnect`; a task still winding down after abort
    /// must not publish a live state or session
    closed: AtomicBool,

    sessions: AtomicU64,
    connect_failures: AtomicU64,
    frames_received: AtomicU64,
    writes_applied: AtomicU64,
}

/// Owns the push connection for one venue
pub struct ConnectionManager {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(
        url: impl Into<String>,
        config: ConnectionConfig,
        protocol: Arc<dyn VenueProtocol>,
        connector: Arc<dyn Connector>,
        cache: Arc<PriceCache>,
    ) -> Self {
        let shared = Shared {
            venue: protocol.venue(),
            url: url.into(),
            config,
            protocol,
            connector,
            cache,
            tokens: RwLock::new(BTreeSet::new()),
            state: RwLock::new(ConnectionState::Disconnected),
            outbound: Mutex::new(None),
            closed: AtomicBool::new(false),
            sessions: AtomicU64::new(0),
            connect_failures: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            writes_applied: AtomicU64::new(0),
        };

        Self {
            shared: Arc::new(shared),
            task: Mutex::new(None),
        }
    }

    /// Websocket-backed manager
    pub fn websocket(
        url: impl Into<String>,
        config: ConnectionConfig,
        protocol: Arc<dyn VenueProtocol>,
        cache: Arc<PriceCache>,
    ) -> Self {
        Self::new(url, config, protocol, Arc::new(WsConnector), cache)
    }

    pub fn venue(&self) -> Venue {
        self.shared.venue
    }

    pub fn protocol(&self) -> &Arc<dyn VenueProtocol> {
        &self.shared.protocol
    }

    /// Start the connection task. No-op if already running or after
    /// [`disconnect`](Self::disconnect).
    pub fn connect(&self) {
        if self.shared.is_closed() {
            warn!(venue = %self.shared.venue, "connect() after disconnect is ignored");
            return;
        }

        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        info!(venue = %self.shared.venue, url = %self.shared.url, "Starting push connection");
        let shared = Arc::clone(&self.shared);
        *task = Some(tokio::spawn(async move {
            shared.run().await;
        }));
    }

    /// Terminal shutdown: cancels the receive and heartbeat work for this venue
    pub fn disconnect(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        self.shared.outbound.lock().take();
        self.shared.set_state(ConnectionState::Disconnected);
        info!(venue = %self.shared.venue, "Push connection closed");
    }

    /// Track tokens; only tokens not already tracked produce frames
    pub fn subscribe(&self, tokens: &[String]) {
        let mut tracked = self.shared.tokens.write();
        let added: Vec<String> = tokens
            .iter()
            .filter(|t| tracked.insert((*t).clone()))
            .cloned()
            .collect();
        if added.is_empty() {
            return;
        }

        debug!(venue = %self.shared.venue, count = added.len(), "Tracking new tokens");
        self.shared.forward(Command::Subscribe(added));
    }

    /// Stop tracking tokens; untracked tokens are ignored
    pub fn unsubscribe(&self, tokens: &[String]) {
        let mut tracked = self.shared.tokens.write();
        let removed: Vec<String> = tokens.iter().filter(|t| tracked.remove(*t)).cloned().collect();
        if removed.is_empty() {
            return;
        }

        debug!(venue = %self.shared.venue, count = removed.len(), "Dropping tokens");
        self.shared.forward(Command::Unsubscribe(removed));
    }

    pub fn subscribed_tokens(&self) -> Vec<String> {
        self.shared.tokens.read().iter().cloned().collect()
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// True until [`disconnect`](Self::disconnect) is called
    pub fn is_active(&self) -> bool {
        !self.shared.is_closed() && self.task.lock().is_some()
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            venue: self.shared.venue,
            state: self.state(),
            tracked_tokens: self.shared.tokens.read().len(),
            sessions: self.shared.sessions.load(Ordering::Relaxed),
            connect_failures: self.shared.connect_failures.load(Ordering::Relaxed),
            frames_received: self.shared.frames_received.load(Ordering::Relaxed),
            writes_applied: self.shared.writes_applied.load(Ordering::Relaxed),
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Once closed only `Disconnected` is accepted
    fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.write();
        if self.is_closed() && state != ConnectionState::Disconnected {
            return;
        }
        if *current != state {
            trace!(venue = %self.venue, from = current.name(), to = state.name(), "State change");
            *current = state;
        }
    }

    /// Hand a token-set change to the live session, if any. Without a
    /// session the change is picked up by the next resubscribe.
    fn forward(&self, command: Command) {
        if let Some(tx) = self.outbound.lock().as_ref() {
            let _ = tx.send(command);
        }
    }

    async fn run(self: Arc<Self>) {
        let mut backoff = Backoff::from_config(&self.config.reconnect);

        loop {
            if self.is_closed() {
                return;
            }
            self.set_state(ConnectionState::Connecting);

            match self.connector.connect(&self.url).await {
                Ok((sink, stream)) => {
                    backoff.reset();
                    self.sessions.fetch_add(1, Ordering::Relaxed);
                    let reason = self.run_session(sink, stream).await;
                    warn!(venue = %self.venue, error = %reason, "Push session ended");
                }
                Err(e) => {
                    self.connect_failures.fetch_add(1, Ordering::Relaxed);
                    error!(venue = %self.venue, error = %e, "Push connect failed");
                }
            }

            self.outbound.lock().take();
            self.set_state(ConnectionState::Reconnecting);

            let delay = backoff.next_delay();
            warn!(
                venue = %self.venue,
                delay_ms = delay.as_millis() as u64,
                attempt = backoff.failures(),
                "Reconnecting"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Drive one session until it fails; returns the failure
    async fn run_session(&self, mut sink: FrameSink, mut stream: FrameStream) -> FeedError {
        self.protocol.on_session_start();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let initial: Vec<String> = {
            let tokens = self.tokens.read();
            let mut outbound = self.outbound.lock();
            if self.is_closed() {
                return FeedError::Disconnected;
            }
            *outbound = Some(tx);
            tokens.iter().cloned().collect()
        };

        self.set_state(ConnectionState::Connected);
        info!(venue = %self.venue, tokens = initial.len(), "Push connection established");

        let mut primed = false;
        if !initial.is_empty() {
            if let Err(e) = send_all(&mut sink, self.protocol.initial_frames(&initial)).await {
                return e;
            }
            primed = true;
        }

        let heartbeat_every = self.config.heartbeat_interval();
        let heartbeat_timeout = self.config.heartbeat_timeout();
        let idle_timeout = self.config.idle_timeout();

        let mut heartbeat = interval_at(Instant::now() + heartbeat_every, heartbeat_every);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_frame = Instant::now();

        loop {
            tokio::select! {
                frame = timeout_at(last_frame + idle_timeout, stream.next()) => {
                    let frame = match frame {
                        Err(_) => return FeedError::IdleTimeout(idle_timeout.as_millis() as u64),
                        Ok(None) => return FeedError::Disconnected,
                        Ok(Some(Err(e))) => return e,
                        Ok(Some(Ok(frame))) => frame,
                    };
                    last_frame = Instant::now();
                    self.frames_received.fetch_add(1, Ordering::Relaxed);

                    match frame {
                        Message::Text(text) => self.apply_text(&text),
                        Message::Binary(bytes) => match String::from_utf8(bytes) {
                            Ok(text) => self.apply_text(&text),
                            Err(_) => debug!(venue = %self.venue, "Dropping non-UTF8 binary frame"),
                        },
                        Message::Ping(data) => {
                            if let Err(e) = sink.send(Message::Pong(data)).await {
                                return e;
                            }
                        }
                        Message::Close(frame) => {
                            debug!(venue = %self.venue, ?frame, "Close frame received");
                            return FeedError::Disconnected;
                        }
                        _ => {}
                    }
                }

                Some(command) = rx.recv() => {
                    let frames = match command {
                        Command::Subscribe(tokens) if !primed => {
                            primed = true;
                            self.protocol.initial_frames(&tokens)
                        }
                        Command::Subscribe(tokens) => self.protocol.subscribe_frames(&tokens),
                        Command::Unsubscribe(tokens) => self.protocol.unsubscribe_frames(&tokens),
                    };
                    if let Err(e) = send_all(&mut sink, frames).await {
                        return e;
                    }
                }

                _ = heartbeat.tick() => {
                    match timeout(heartbeat_timeout, sink.send(self.protocol.heartbeat_frame())).await {
                        Ok(Ok(())) => trace!(venue = %self.venue, "Heartbeat sent"),
                        Ok(Err(e)) => return e,
                        Err(_) => return FeedError::HeartbeatTimeout(heartbeat_timeout.as_millis() as u64),
                    }
                }
            }
        }
    }

    fn apply_text(&self, text: &str) {
        for write in self.protocol.parse(text) {
            self.cache.apply_write(write);
            self.writes_applied.fetch_add(1, Ordering::Relaxed);
        }
    }
}

async fn send_all(sink: &mut FrameSink, frames: Vec<Message>) -> FeedResult<()> {
    for frame in frames {
        sink.send(frame).await?;
    }
    Ok(())
}

/// Per-venue transport statistics
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub venue: Venue,
    pub state: ConnectionState,
    pub tracked_tokens: usize,
    pub sessions: u64,
    pub connect_failures: u64,
    pub frames_received: u64,
    pub writes_applied: u64,
}
