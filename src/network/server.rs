//! Lobby TCP Server
//!
//! Connection multiplexer for the lobby. A single task owns the session
//! table, the match registry and the dispatcher; per-connection reader tasks
//! forward raw reads to it and per-connection writer tasks drain a bounded
//! outbound queue. Frames are therefore processed strictly one at a time.
//!
//! ```text
//!   reader task ──Data/Closed──┐
//!   reader task ──Data/Closed──┼──► multiplexer ──► dispatcher
//!   reader task ──Data/Closed──┘         │
//!                                        ├──► writer task (queue) ──► socket
//!                                        └──► writer task (queue) ──► socket
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use chrono::Utc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::lobby::outcome::OutcomeResolver;
use crate::lobby::registry::{MatchRegistry, DEFAULT_CAPACITY};
use crate::lobby::session::{SessionId, SessionTable};
use crate::network::auth::Authenticator;
use crate::network::dispatcher::{Dispatcher, OutboundEvent, ProtocolViolation};
use crate::network::protocol::{OutboundFrame, MAX_FRAME_SIZE, READ_BUFFER_SIZE};

/// Message written to a connection refused at capacity.
pub const MSG_SERVER_FULL: &str = "Server full";

/// Depth of the reader -> multiplexer event channel.
const EVENT_QUEUE: usize = 256;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Maximum live matches in the registry.
    pub max_matches: usize,
    /// Outbound frames buffered per connection before it counts as stalled.
    pub outbound_queue: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], crate::DEFAULT_PORT)),
            max_connections: 10,
            max_matches: DEFAULT_CAPACITY,
            outbound_queue: 32,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = parse_var(&lookup, "LOBBY_BIND_ADDR")? {
            config.bind_addr = addr;
        }
        if let Some(n) = parse_count(&lookup, "LOBBY_MAX_CONNECTIONS")? {
            config.max_connections = n;
        }
        if let Some(n) = parse_count(&lookup, "LOBBY_MAX_MATCHES")? {
            config.max_matches = n;
        }
        if let Some(n) = parse_count(&lookup, "LOBBY_OUTBOUND_QUEUE")? {
            config.outbound_queue = n;
        }

        Ok(config)
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

fn parse_count<F>(lookup: &F, var: &'static str) -> Result<Option<usize>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse_var::<F, usize>(lookup, var)? {
        Some(0) => Err(ConfigError::Zero(var)),
        other => Ok(other),
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A variable could not be parsed.
    #[error("invalid value {value:?} for {var}")]
    Invalid {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },

    /// A count that must be positive was zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Lobby server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The listening socket failed.
    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

// =============================================================================
// SHUTDOWN
// =============================================================================

/// Handle that stops a running [`LobbyServer`].
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    /// Signal the server to tear down every session and stop accepting.
    pub fn shutdown(&self) {
        if self.tx.send(()).is_err() {
            debug!("Shutdown requested for a server that is no longer running");
        }
    }
}

// =============================================================================
// CONNECTIONS
// =============================================================================

/// What a reader task reports to the multiplexer.
#[derive(Debug)]
enum ConnectionEvent {
    /// Bytes of one read.
    Data { id: SessionId, bytes: Vec<u8> },
    /// The read side ended.
    Closed { id: SessionId, reason: CloseReason },
}

/// Why a session is being torn down.
#[derive(Debug)]
enum CloseReason {
    PeerClosed,
    ReadFailed(std::io::Error),
    Violation(ProtocolViolation),
    Stalled,
    WriterGone,
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => write!(f, "peer closed"),
            CloseReason::ReadFailed(e) => write!(f, "read failed: {}", e),
            CloseReason::Violation(v) => write!(f, "protocol violation: {}", v),
            CloseReason::Stalled => write!(f, "outbound queue full"),
            CloseReason::WriterGone => write!(f, "write failed"),
            CloseReason::Shutdown => write!(f, "server shutdown"),
        }
    }
}

/// Multiplexer-side handle to one connection.
struct Connection {
    outbound: mpsc::Sender<OutboundFrame>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Per-connection reader loop. At most one packet per read.
async fn read_loop(
    id: SessionId,
    mut reader: OwnedReadHalf,
    events: mpsc::Sender<ConnectionEvent>,
) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    let reason = loop {
        match reader.read(&mut buf[..MAX_FRAME_SIZE]).await {
            Ok(0) => break CloseReason::PeerClosed,
            Ok(n) => {
                trace!("{} read {} bytes", id, n);
                let event = ConnectionEvent::Data {
                    id,
                    bytes: buf[..n].to_vec(),
                };
                if events.send(event).await.is_err() {
                    return;
                }
            }
            Err(e) => break CloseReason::ReadFailed(e),
        }
    };
    let _ = events.send(ConnectionEvent::Closed { id, reason }).await;
}

/// Per-connection writer loop. Drains the queue, then closes the write side.
async fn write_loop(
    id: SessionId,
    mut writer: OwnedWriteHalf,
    mut frames: mpsc::Receiver<OutboundFrame>,
) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = writer.write_all(&frame.encode()).await {
            debug!("Write to {} failed: {}", id, e);
            return;
        }
    }
    let _ = writer.shutdown().await;
}

/// Refuse a connection without blocking the multiplexer.
fn reject(stream: TcpStream, peer: SocketAddr) {
    let frame = OutboundFrame::failure(MSG_SERVER_FULL).encode();
    if let Err(e) = stream.try_write(&frame) {
        debug!("Could not notify rejected {}: {}", peer, e);
    }
}

// =============================================================================
// MULTIPLEXER
// =============================================================================

/// Sole owner of lobby state while the server runs.
struct Multiplexer<A, R> {
    dispatcher: Dispatcher<A, R>,
    sessions: SessionTable,
    registry: MatchRegistry,
    connections: BTreeMap<SessionId, Connection>,
    outbound_queue: usize,
    events: mpsc::Sender<ConnectionEvent>,
}

impl<A: Authenticator, R: OutcomeResolver> Multiplexer<A, R> {
    fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        let id = match self.sessions.open(peer) {
            Ok(id) => id,
            Err(e) => {
                warn!("Rejecting {}: {}", peer, e);
                reject(stream, peer);
                return;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for {}: {}", peer, e);
        }
        let (reader, writer) = stream.into_split();
        let (outbound, frames) = mpsc::channel(self.outbound_queue);

        let reader = tokio::spawn(read_loop(id, reader, self.events.clone()));
        let writer = tokio::spawn(write_loop(id, writer, frames));
        self.connections.insert(id, Connection { outbound, reader, writer });

        info!("Accepted {} from {} ({} open)", id, peer, self.sessions.len());
    }

    fn on_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Data { id, bytes } => {
                if !self.connections.contains_key(&id) {
                    trace!("Ignoring late data for {}", id);
                    return;
                }
                let dispatch = self
                    .dispatcher
                    .dispatch(&mut self.sessions, &mut self.registry, id, &bytes);
                self.deliver(dispatch.events);
                if let Some(violation) = dispatch.violation {
                    warn!("Protocol violation from {}: {}", id, violation);
                    self.teardown(id, CloseReason::Violation(violation));
                }
            }
            ConnectionEvent::Closed { id, reason } => self.teardown(id, reason),
        }
    }

    /// Queue frames for their targets. A target that cannot take a frame is
    /// torn down, and its teardown notifications join the queue.
    fn deliver(&mut self, events: Vec<OutboundEvent>) {
        let mut pending = VecDeque::from(events);

        while let Some(OutboundEvent { target, frame }) = pending.pop_front() {
            let Some(connection) = self.connections.get(&target) else {
                trace!("Dropping frame for closed {}", target);
                continue;
            };
            match connection.outbound.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    pending.extend(self.close(target, CloseReason::Stalled));
                }
                Err(TrySendError::Closed(_)) => {
                    pending.extend(self.close(target, CloseReason::WriterGone));
                }
            }
        }
    }

    fn teardown(&mut self, id: SessionId, reason: CloseReason) {
        let notifications = self.close(id, reason);
        self.deliver(notifications);
    }

    /// Remove a session and release its slot. Returns notifications for
    /// other sessions affected by the departure.
    fn close(&mut self, id: SessionId, reason: CloseReason) -> Vec<OutboundEvent> {
        let Some(connection) = self.connections.remove(&id) else {
            return Vec::new();
        };
        connection.reader.abort();
        if matches!(reason, CloseReason::Stalled) {
            connection.writer.abort();
        }

        if let Some(session) = self.sessions.get(id) {
            let lifetime = Utc::now() - session.connected_at();
            info!(
                "Closing {} ({}) after {}s in state {}: {}",
                id,
                session.peer(),
                lifetime.num_seconds(),
                session.state().name(),
                reason
            );
        }

        self.dispatcher
            .disconnect(&mut self.sessions, &mut self.registry, id)
    }

    fn shutdown(&mut self) {
        for id in self.sessions.ids() {
            self.teardown(id, CloseReason::Shutdown);
        }
    }
}

// =============================================================================
// SERVER
// =============================================================================

/// The lobby server.
pub struct LobbyServer<A, R> {
    /// Server configuration.
    config: ServerConfig,
    /// Frame router with its collaborators.
    dispatcher: Dispatcher<A, R>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
    /// Subscribed at construction so a signal sent before `run` is kept.
    shutdown_rx: broadcast::Receiver<()>,
}

impl<A: Authenticator, R: OutcomeResolver> LobbyServer<A, R> {
    /// Create a new lobby server.
    pub fn new(config: ServerConfig, authenticator: A, resolver: R) -> Self {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        Self {
            config,
            dispatcher: Dispatcher::new(authenticator, resolver),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handle for stopping the server from another task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Bind to the configured address and run until shutdown.
    #[instrument(skip(self), fields(addr = %self.config.bind_addr))]
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = self.config.bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        self.run_with_listener(listener).await
    }

    /// Run the multiplexer on a pre-bound listener (useful for tests).
    #[instrument(skip_all)]
    pub async fn run_with_listener(self, listener: TcpListener) -> Result<(), ServerError> {
        // Holding the sender keeps `recv` pending until a real signal arrives
        let LobbyServer {
            config,
            dispatcher,
            shutdown_tx: _shutdown_tx,
            mut shutdown_rx,
        } = self;
        let (events_tx, mut events_rx) = mpsc::channel(EVENT_QUEUE);

        let mut mux = Multiplexer {
            dispatcher,
            sessions: SessionTable::new(config.max_connections),
            registry: MatchRegistry::new(config.max_matches),
            connections: BTreeMap::new(),
            outbound_queue: config.outbound_queue,
            events: events_tx,
        };

        match listener.local_addr() {
            Ok(local) => info!("Duel lobby v{} listening on {}", config.version, local),
            Err(_) => info!("Duel lobby v{} listening", config.version),
        }
        info!(
            "Limits: {} connections, {} matches",
            config.max_connections, config.max_matches
        );

        let result = loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => mux.admit(stream, peer),
                        Err(e) => {
                            error!("Accept error: {}", e);
                            break Err(ServerError::Accept(e));
                        }
                    }
                }
                Some(event) = events_rx.recv() => mux.on_event(event),
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break Ok(());
                }
            }
        };

        mux.shutdown();
        drop(listener);
        info!("Lobby stopped");
        result
    }
}

// =============================================================================
// TESTS
// =============================================================================
