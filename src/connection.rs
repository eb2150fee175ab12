//! Connection manager
//!
//! Owns the socket. While connected, a reader loop feeds device frames into
//! the mirror and a paced writer loop drains the command queue. Either loop
//! failing tears both down; the session then backs off, reconnects and
//! re-queues the full startup query sequence.

use crate::config::MixerConfig;
use crate::error::{Dcm1Error, Result};
use crate::listener::ListenerRegistry;
use crate::protocol::{self, Command, FrameBuffer, Response};
use crate::queue::{CommandQueue, Pacer};
use crate::state::MixerState;
use crate::subscription::MixerEvent;
use crate::types::{source_ids, zone_ids, ConnectionState, Priority};
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio::time::{sleep, timeout};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const READ_BUFFER_SIZE: usize = 1024;

/// State shared between the public handle and the session tasks
pub(crate) struct Shared {
    pub config: MixerConfig,
    pub queue: Arc<CommandQueue>,
    /// Written only by the reader loop
    pub state: RwLock<MixerState>,
    pub listeners: ListenerRegistry,
    pub events: broadcast::Sender<MixerEvent>,
    pub connection: watch::Sender<ConnectionState>,
    /// Bumped after every response the mirror accepted
    pub revision: watch::Sender<u64>,
}

impl Shared {
    pub fn new(config: MixerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (connection, _) = watch::channel(ConnectionState::Disconnected);
        let (revision, _) = watch::channel(0);
        Self {
            config,
            queue: Arc::new(CommandQueue::new()),
            state: RwLock::new(MixerState::new()),
            listeners: ListenerRegistry::default(),
            events,
            connection,
            revision,
        }
    }

    pub fn snapshot(&self) -> MixerState {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        let previous = self.connection.send_replace(state);
        if previous != state {
            tracing::info!("Connection state {:?} -> {:?}", previous, state);
            self.publish(MixerEvent::ConnectionStateChanged { state });
        }
    }

    /// Apply a confirmed response, then notify outside the write lock
    pub fn apply(&self, response: &Response) {
        let events = self
            .state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .apply(response);
        if events.is_empty() {
            return;
        }
        self.revision.send_modify(|r| *r += 1);
        for event in events {
            self.publish(event);
        }
    }

    fn publish(&self, event: MixerEvent) {
        self.listeners.dispatch(&event);
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Queries that rebuild the whole mirror
///
/// Labels first, then the 64 per-input enable flags, then live zone state.
pub fn startup_queries() -> Vec<Command> {
    let mut commands: Vec<Command> = source_ids().map(Command::QuerySourceLabel).collect();
    commands.extend(zone_ids().map(Command::QueryZoneLabel));
    for zone in zone_ids() {
        commands.extend(source_ids().map(|source| Command::QueryInputEnabled(zone, source)));
    }
    for zone in zone_ids() {
        commands.extend([
            Command::QueryVolume(zone),
            Command::QuerySource(zone),
            Command::QueryMute(zone),
            Command::QueryEq(zone),
        ]);
    }
    commands
}

/// Open the socket within the configured timeout
pub(crate) async fn open(config: &MixerConfig) -> Result<TcpStream> {
    let addr = config.address();
    tracing::info!("Connecting to {}", addr);

    let stream = timeout(config.connect_timeout(), TcpStream::connect(&addr))
        .await
        .map_err(|_| Dcm1Error::ConnectTimeout)?
        .map_err(Dcm1Error::Connection)?;

    // Commands are tiny and paced; don't let Nagle batch them
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

/// Run the session until stopped, reconnecting as needed
pub(crate) async fn run_session(
    shared: Arc<Shared>,
    first: TcpStream,
    stop_rx: broadcast::Receiver<()>,
) {
    let config = shared.config.clone();
    supervise(shared, first, stop_rx, move || {
        let config = config.clone();
        async move { open(&config).await }
    })
    .await
}

/// Session state machine over any byte stream and a way to reopen it
async fn supervise<S, F, Fut>(
    shared: Arc<Shared>,
    first: S,
    mut stop_rx: broadcast::Receiver<()>,
    mut reopen: F,
) where
    S: AsyncRead + AsyncWrite + Unpin,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<S>>,
{
    let config = shared.config.clone();
    let mut pacer = Pacer::new(config.pacing());
    let mut stream = Some(first);
    let mut backoff = config.reconnect_min();

    loop {
        let socket = match stream.take() {
            Some(socket) => socket,
            None => {
                shared.set_connection_state(ConnectionState::Connecting);
                let attempt = tokio::select! {
                    _ = stop_rx.recv() => break,
                    attempt = reopen() => attempt,
                };
                match attempt {
                    Ok(socket) => socket,
                    Err(e) => {
                        tracing::warn!("Reconnect failed: {}", e);
                        shared.set_connection_state(ConnectionState::Reconnecting);
                        if wait_or_stop(backoff, &mut stop_rx).await {
                            break;
                        }
                        // Exponential backoff: 1s, 2s, 4s ... capped
                        backoff = (backoff * 2).min(config.reconnect_max());
                        continue;
                    }
                }
            }
        };

        backoff = config.reconnect_min();
        shared.queue.begin_resync(startup_queries());
        shared.set_connection_state(ConnectionState::Connected);

        let lost = tokio::select! {
            _ = stop_rx.recv() => break,
            lost = run_connected(&shared, socket, &mut pacer) => lost,
        };

        tracing::warn!("{}", lost);
        shared.set_connection_state(ConnectionState::Reconnecting);
        if wait_or_stop(backoff, &mut stop_rx).await {
            break;
        }
    }

    shared.set_connection_state(ConnectionState::Disconnected);
    tracing::info!("Session stopped");
}

/// Sleep for `delay`; true if a stop arrived first
async fn wait_or_stop(delay: Duration, stop_rx: &mut broadcast::Receiver<()>) -> bool {
    tracing::info!("Reconnecting in {:?}", delay);
    tokio::select! {
        _ = stop_rx.recv() => true,
        _ = sleep(delay) => false,
    }
}

/// Drive reader and writer until either fails; dropping both closes the socket
async fn run_connected<S: AsyncRead + AsyncWrite + Unpin>(
    shared: &Shared,
    socket: S,
    pacer: &mut Pacer,
) -> Dcm1Error {
    let (read_half, mut write_half) = tokio::io::split(socket);
    tokio::select! {
        lost = read_loop(shared, read_half) => lost,
        lost = write_loop(shared, &mut write_half, pacer) => lost,
    }
}

async fn read_loop<R: AsyncRead + Unpin>(shared: &Shared, mut reader: R) -> Dcm1Error {
    let mut frames = FrameBuffer::new();
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return Dcm1Error::TransportLost("connection closed by device".to_string()),
            Ok(n) => n,
            Err(e) => return Dcm1Error::TransportLost(format!("read failed: {}", e)),
        };

        for frame in frames.push(&buf[..n]) {
            tracing::debug!("Received: {}", frame);
            match protocol::decode(&frame) {
                Ok(response) => shared.apply(&response),
                Err(failure) => tracing::debug!("Discarding {}", failure),
            }
        }
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(
    shared: &Shared,
    writer: &mut W,
    pacer: &mut Pacer,
) -> Dcm1Error {
    loop {
        // Pace before choosing, so a user command arriving meanwhile still wins
        pacer.ready().await;
        let queued = shared.queue.pop().await;
        pacer.mark();

        let line = queued.command.encode();
        tracing::debug!(
            "Sending ({:?}, queued {:?}): {}",
            queued.priority,
            queued.enqueued_at.elapsed(),
            line
        );

        let result = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\r\n").await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = result {
            if queued.priority == Priority::User {
                shared.queue.requeue_front(queued);
            }
            return Dcm1Error::TransportLost(format!("write failed: {}", e));
        }
    }
}
