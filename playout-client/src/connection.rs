//! Connection management.
//!
//! A [`Connection`] owns at most one socket at a time. `connect` starts a
//! supervisor task that opens the socket, runs the read loop, and on link loss
//! fails every outstanding command with [`ClientError::Dropped`] and retries
//! after a fixed interval until `disconnect` is called.
//!
//! All reads, parser transitions and response dispatch for one connection run
//! on its read loop task. Submitting writes directly to the socket and does not
//! wait for the reply; the reply is delivered through the returned handle.

use crate::dispatcher::{fail_all, CommandId, Completion, PendingCommand, PendingQueue, Responder};
use crate::error::ClientError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex as SyncMutex;
use playout_protocol::{
    AssembledResponse, Command, CommandKind, Decoder, Encoder, ProtocolError, DEFAULT_PORT,
    MAX_LINE_LENGTH,
};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Default delay between reconnect attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Fixed delay between reconnect attempts.
    pub reconnect_interval: Duration,
    /// Interval of VERSION keepalive probes. Off when `None`.
    pub keepalive_interval: Option<Duration>,
    /// How long a caller waits on a response handle. Unbounded when `None`.
    pub request_timeout: Option<Duration>,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
    /// Longest unterminated line accepted from the server.
    pub max_line_length: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            keepalive_interval: None,
            request_timeout: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_line_length: MAX_LINE_LENGTH,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_keepalive(mut self, interval: Duration) -> Self {
        self.keepalive_interval = Some(interval);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_max_line_length(mut self, max: usize) -> Self {
        self.max_line_length = max;
        self
    }
}

/// Address of a playout server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new("127.0.0.1", DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Notifications that are not the answer to a submitted command.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    StateChanged {
        endpoint: Endpoint,
        state: ConnectionState,
    },
    /// A response that arrived with no command outstanding.
    Unsolicited(AssembledResponse),
    /// A response was dropped by the parser.
    ProtocolError { endpoint: Endpoint, message: String },
}

/// Default capacity for the event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Resolves to the completion of one submitted command.
pub struct ResponseHandle {
    id: CommandId,
    rx: oneshot::Receiver<Completion>,
    timeout: Option<Duration>,
}

impl ResponseHandle {
    pub fn id(&self) -> CommandId {
        self.id
    }

    /// Waits for the response.
    ///
    /// With a request timeout configured this gives up with
    /// [`ClientError::Timeout`]. The command stays queued so that later
    /// responses still line up; its late answer is discarded.
    pub async fn wait(self) -> Result<Completion, ClientError> {
        let completion = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.rx).await.map_err(|_| {
                tracing::debug!(id = self.id, "request timed out");
                ClientError::Timeout
            })?,
            None => self.rx.await,
        };
        completion.map_err(|_| ClientError::ConnectionClosed)
    }
}

/// The write side of a live socket.
struct Link {
    writer: OwnedWriteHalf,
    /// Tells the read loop that a write failed.
    broken: Option<oneshot::Sender<String>>,
}

struct Lifecycle {
    state: ConnectionState,
    endpoint: Option<Endpoint>,
    /// Bumped by every `connect` and `disconnect`; stale tasks compare it.
    epoch: u64,
    supervisor: Option<JoinHandle<()>>,
}

struct Inner {
    config: ConnectionConfig,
    lifecycle: SyncMutex<Lifecycle>,
    link: Mutex<Option<Link>>,
    pending: SyncMutex<PendingQueue>,
    next_id: AtomicU64,
    connected: AtomicBool,
    last_received: SyncMutex<Option<DateTime<Utc>>>,
    events: broadcast::Sender<ConnectionEvent>,
}

/// A connection to one playout server. Cheap to clone; clones share the
/// socket and the pending queue. Dropping the last clone stops reconnecting.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
    _owner: Arc<Owner>,
}

/// Held only by user-facing handles, never by the supervisor task.
struct Owner {
    inner: Arc<Inner>,
}

impl Drop for Owner {
    fn drop(&mut self) {
        let task = {
            let mut lifecycle = self.inner.lifecycle.lock();
            lifecycle.epoch += 1;
            lifecycle.state = ConnectionState::Disconnected;
            lifecycle.supervisor.take()
        };
        self.inner.connected.store(false, Ordering::SeqCst);
        if let Some(task) = task {
            tracing::debug!("connection dropped, stopping supervisor");
            task.abort();
        }
    }
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let inner = Arc::new(Inner {
            config,
            lifecycle: SyncMutex::new(Lifecycle {
                state: ConnectionState::Disconnected,
                endpoint: None,
                epoch: 0,
                supervisor: None,
            }),
            link: Mutex::new(None),
            pending: SyncMutex::new(PendingQueue::default()),
            next_id: AtomicU64::new(1),
            connected: AtomicBool::new(false),
            last_received: SyncMutex::new(None),
            events,
        });
        Self {
            _owner: Arc::new(Owner {
                inner: inner.clone(),
            }),
            inner,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Subscribes to state changes, unsolicited responses and parser errors.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Connects to `host:port`.
    ///
    /// Does nothing if already connected to the same endpoint. Otherwise any
    /// existing socket is torn down and a supervisor task is started; the
    /// result of its first attempt is returned, and on failure it keeps
    /// retrying in the background until [`disconnect`](Self::disconnect).
    pub async fn connect(&self, host: impl Into<String>, port: u16) -> Result<(), ClientError> {
        let endpoint = Endpoint::new(host, port);

        let (epoch, previous) = {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.state == ConnectionState::Connected
                && lifecycle.endpoint.as_ref() == Some(&endpoint)
            {
                tracing::debug!(%endpoint, "already connected");
                return Ok(());
            }
            lifecycle.epoch += 1;
            lifecycle.endpoint = Some(endpoint.clone());
            (lifecycle.epoch, lifecycle.supervisor.take())
        };

        if let Some(task) = previous {
            task.abort();
        }
        let failed = self.inner.teardown(|| ClientError::ConnectionClosed).await;
        if failed > 0 {
            tracing::debug!(%endpoint, failed, "pending commands closed by reconnect");
        }

        let (first_tx, first_rx) = oneshot::channel();
        let task = tokio::spawn(self.inner.clone().supervise(endpoint, epoch, first_tx));
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.epoch == epoch {
                lifecycle.supervisor = Some(task);
            } else {
                // Superseded before the task was recorded.
                task.abort();
            }
        }

        first_rx.await.unwrap_or(Err(ClientError::ConnectionClosed))
    }

    /// Closes the connection and stops reconnecting.
    ///
    /// Outstanding commands fail with [`ClientError::ConnectionClosed`].
    /// Calling this again has no further effect.
    pub async fn disconnect(&self) {
        let (task, previous, endpoint) = {
            let mut lifecycle = self.inner.lifecycle.lock();
            lifecycle.epoch += 1;
            let previous = std::mem::replace(&mut lifecycle.state, ConnectionState::Disconnected);
            (
                lifecycle.supervisor.take(),
                previous,
                lifecycle.endpoint.clone().unwrap_or_default(),
            )
        };

        if let Some(task) = task {
            task.abort();
        }
        self.inner.connected.store(false, Ordering::SeqCst);
        let failed = self.inner.teardown(|| ClientError::ConnectionClosed).await;

        if previous != ConnectionState::Disconnected {
            tracing::info!(%endpoint, failed, "disconnected");
            let _ = self.inner.events.send(ConnectionEvent::StateChanged {
                endpoint,
                state: ConnectionState::Disconnected,
            });
        }
    }

    /// Returns whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lifecycle.lock().state
    }

    /// The endpoint of the last `connect` call.
    pub fn endpoint(&self) -> Option<Endpoint> {
        self.inner.lifecycle.lock().endpoint.clone()
    }

    /// When data was last read from the server.
    pub fn last_received(&self) -> Option<DateTime<Utc>> {
        *self.inner.last_received.lock()
    }

    /// Returns the number of commands awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Writes a command and returns a handle to its response.
    ///
    /// Fails immediately with [`ClientError::NotConnected`] when there is no
    /// live socket, or with [`ClientError::Encoding`] when the command has an
    /// invalid parameter; in both cases nothing is queued.
    pub async fn submit(&self, command: Command) -> Result<ResponseHandle, ClientError> {
        let (tx, rx) = oneshot::channel();
        let id = self.inner.enqueue(command, Responder::Handle(tx)).await?;
        Ok(ResponseHandle {
            id,
            rx,
            timeout: self.inner.config.request_timeout,
        })
    }

    /// Writes a command; its completion is sent on `sink`.
    pub async fn submit_to(
        &self,
        command: Command,
        sink: mpsc::UnboundedSender<Completion>,
    ) -> Result<CommandId, ClientError> {
        self.inner.enqueue(command, Responder::Channel(sink)).await
    }
}

impl Inner {
    async fn supervise(
        self: Arc<Self>,
        endpoint: Endpoint,
        epoch: u64,
        first: oneshot::Sender<Result<(), ClientError>>,
    ) {
        let mut first = Some(first);

        loop {
            if !self.set_state(epoch, &endpoint, ConnectionState::Connecting) {
                return;
            }

            match self.open(&endpoint).await {
                Ok((reader, writer)) => {
                    let (broken_tx, broken_rx) = oneshot::channel();
                    {
                        // Every epoch bump is followed by a teardown that
                        // takes this lock.
                        let mut link = self.link.lock().await;
                        if !self.is_current(epoch) {
                            return;
                        }
                        *link = Some(Link {
                            writer,
                            broken: Some(broken_tx),
                        });
                    }
                    if !self.set_state(epoch, &endpoint, ConnectionState::Connected) {
                        return;
                    }
                    tracing::info!(%endpoint, "connected");
                    if let Some(tx) = first.take() {
                        let _ = tx.send(Ok(()));
                    }

                    let reason = self.run_link(&endpoint, reader, broken_rx).await;
                    if !self.is_current(epoch) {
                        return;
                    }

                    self.connected.store(false, Ordering::SeqCst);
                    let failed = self.teardown(|| ClientError::Dropped).await;
                    if !self.set_state(epoch, &endpoint, ConnectionState::Disconnected) {
                        return;
                    }
                    tracing::warn!(
                        %endpoint,
                        %reason,
                        failed,
                        "connection lost, reconnecting in {:?}",
                        self.config.reconnect_interval
                    );
                }
                Err(e) => {
                    if !self.set_state(epoch, &endpoint, ConnectionState::Disconnected) {
                        return;
                    }
                    tracing::warn!(
                        %endpoint,
                        error = %e,
                        "connect failed, retrying in {:?}",
                        self.config.reconnect_interval
                    );
                    if let Some(tx) = first.take() {
                        let _ = tx.send(Err(e));
                    }
                }
            }

            tokio::time::sleep(self.config.reconnect_interval).await;
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.lifecycle.lock().epoch == epoch
    }

    /// Applies a lifecycle transition unless a newer `connect`/`disconnect`
    /// has taken over. Returns false when this task is stale.
    fn set_state(&self, epoch: u64, endpoint: &Endpoint, state: ConnectionState) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.epoch != epoch {
            return false;
        }
        self.connected
            .store(state == ConnectionState::Connected, Ordering::SeqCst);
        if lifecycle.state != state {
            lifecycle.state = state;
            tracing::debug!(%endpoint, %state, "state changed");
            let _ = self.events.send(ConnectionEvent::StateChanged {
                endpoint: endpoint.clone(),
                state,
            });
        }
        true
    }

    async fn open(&self, endpoint: &Endpoint) -> Result<(OwnedReadHalf, OwnedWriteHalf), ClientError> {
        tracing::debug!(%endpoint, "connecting");

        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
        )
        .await
        .map_err(|_| {
            tracing::debug!(%endpoint, "connection timeout");
            ClientError::Timeout
        })??;

        stream.set_nodelay(true).ok();
        Ok(stream.into_split())
    }

    /// Closes the socket and fails everything outstanding. Returns the number
    /// of commands failed.
    async fn teardown(&self, error: impl Fn() -> ClientError) -> usize {
        if let Some(mut link) = self.link.lock().await.take() {
            let _ = link.writer.shutdown().await;
        }
        let entries = self.pending.lock().drain();
        fail_all(entries, error)
    }

    async fn enqueue(&self, command: Command, responder: Responder) -> Result<CommandId, ClientError> {
        let encoded = Encoder::encode_command(&command)?;
        let wire = String::from_utf8_lossy(&encoded[..encoded.len() - 2]).into_owned();

        // Queue order must equal wire order, so both happen under the link lock.
        let mut guard = self.link.lock().await;
        let link = guard.as_mut().ok_or(ClientError::NotConnected)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(id, %wire, "sending command");
        self.pending
            .lock()
            .push(PendingCommand::new(id, command, wire, responder));

        if let Err(e) = link.writer.write_all(&encoded).await {
            tracing::warn!(id, error = %e, "write failed");
            self.pending.lock().remove(id);
            if let Some(broken) = link.broken.take() {
                let _ = broken.send(format!("write failed: {}", e));
            }
            *guard = None;
            return Err(ClientError::Io(e));
        }

        Ok(id)
    }

    /// Reads until the link goes down. Returns why it did.
    async fn run_link(
        &self,
        endpoint: &Endpoint,
        mut reader: OwnedReadHalf,
        mut broken: oneshot::Receiver<String>,
    ) -> String {
        let mut decoder = Decoder::with_max_line_length(self.config.max_line_length);
        let mut buf = vec![0u8; self.config.read_buffer_size];
        let mut keepalive = self.config.keepalive_interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let mut probe: Option<CommandId> = None;

        loop {
            tokio::select! {
                read = reader.read(&mut buf) => match read {
                    Ok(0) => return "connection closed by server".to_string(),
                    Ok(n) => {
                        tracing::trace!(%endpoint, bytes = n, "read");
                        *self.last_received.lock() = Some(Utc::now());
                        decoder.extend(&buf[..n]);
                        self.dispatch_available(endpoint, &mut decoder);
                    }
                    Err(e) => return format!("read error: {}", e),
                },

                _ = next_tick(&mut keepalive) => {
                    if let Some(id) = probe {
                        if self.pending.lock().contains(id) {
                            return "keepalive probe unanswered".to_string();
                        }
                    }
                    match self.enqueue(Command::Version { component: None }, Responder::Probe).await {
                        Ok(id) => probe = Some(id),
                        Err(e) => return format!("keepalive failed: {}", e),
                    }
                }

                reason = &mut broken => {
                    return reason.unwrap_or_else(|_| "link closed".to_string());
                }
            }
        }
    }

    /// Dispatches every response the decoder can complete.
    fn dispatch_available(&self, endpoint: &Endpoint, decoder: &mut Decoder) {
        loop {
            match decoder.decode_response() {
                Ok(Some(response)) => self.dispatch(endpoint, response),
                Ok(None) => return,
                Err(err) => self.protocol_error(endpoint, err),
            }
        }
    }

    /// Matches a response with the oldest outstanding command.
    fn dispatch(&self, endpoint: &Endpoint, response: AssembledResponse) {
        let oldest = self.pending.lock().pop_oldest();
        let Some(pending) = oldest else {
            tracing::debug!(%endpoint, header = %response.header, "unsolicited response");
            let _ = self.events.send(ConnectionEvent::Unsolicited(response));
            return;
        };

        if response.kind != pending.kind
            && !matches!(response.kind, CommandKind::Unknown | CommandKind::Error)
            && pending.kind != CommandKind::Unknown
        {
            tracing::warn!(
                %endpoint,
                id = pending.id,
                expected = %pending.kind,
                got = %response.kind,
                "response echoes a different command; correlating by order"
            );
        }

        let elapsed = Utc::now() - pending.enqueued_at;
        if pending.is_probe() {
            tracing::trace!(%endpoint, code = response.code, "keepalive answered");
        } else {
            tracing::debug!(
                %endpoint,
                id = pending.id,
                code = response.code,
                elapsed_ms = elapsed.num_milliseconds(),
                "response matched"
            );
        }
        pending.complete(Ok(response));
    }

    fn protocol_error(&self, endpoint: &Endpoint, err: ProtocolError) {
        tracing::warn!(%endpoint, error = %err, "dropping response");
        let message = err.to_string();

        // The server did answer something, so the oldest command is consumed.
        if matches!(err, ProtocolError::UnknownStatus { .. }) {
            let oldest = self.pending.lock().pop_oldest();
            if let Some(pending) = oldest {
                pending.complete(Err(ClientError::Protocol(err)));
            }
        }

        let _ = self.events.send(ConnectionEvent::ProtocolError {
            endpoint: endpoint.clone(),
            message,
        });
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playout_protocol::Target;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    async fn listen() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    /// Accepts one connection and hands the test both halves of it.
    async fn accept(listener: &TcpListener) -> (BufReader<OwnedReadHalf>, OwnedWriteHalf) {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, write) = stream.into_split();
        (BufReader::new(read), write)
    }

    async fn read_command(reader: &mut BufReader<OwnedReadHalf>) -> String {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert!(line.ends_with("\r\n"), "line {:?}", line);
        line.trim_end().to_string()
    }

    fn test_config() -> ConnectionConfig {
        ConnectionConfig::new()
            .with_connect_timeout(Duration::from_secs(2))
            .with_reconnect_interval(Duration::from_millis(50))
    }

    #[test]
    fn test_config_defaults() {
        let config = ConnectionConfig::new();
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.reconnect_interval, Duration::from_secs(5));
        assert_eq!(config.keepalive_interval, None);
        assert_eq!(config.request_timeout, None);
        assert_eq!(config.max_line_length, MAX_LINE_LENGTH);
    }

    #[test]
    fn test_config_buffer_clamping() {
        let config = ConnectionConfig::new().with_read_buffer_size(100);
        assert_eq!(config.read_buffer_size, MIN_READ_BUFFER_SIZE);

        let config = ConnectionConfig::new().with_read_buffer_size(10 * 1024 * 1024);
        assert_eq!(config.read_buffer_size, MAX_READ_BUFFER_SIZE);
    }

    #[test]
    fn test_endpoint_display() {
        assert_eq!(Endpoint::new("playout-a", 5250).to_string(), "playout-a:5250");
        assert_eq!(Endpoint::default().port, DEFAULT_PORT);
    }

    #[tokio::test]
    async fn test_submit_when_not_connected() {
        let conn = Connection::new(test_config());
        assert!(!conn.is_connected());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        let result = conn.submit(Command::play(Target::layer(1, 1))).await;
        assert!(matches!(result, Err(ClientError::NotConnected)));
        assert_eq!(conn.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_load_scenario() {
        let (listener, port) = listen().await;
        let conn = Connection::new(test_config());
        let (accepted, connected) = tokio::join!(accept(&listener), conn.connect("127.0.0.1", port));
        connected.unwrap();
        let (mut reader, mut writer) = accepted;
        assert!(conn.is_connected());
        assert_eq!(conn.state(), ConnectionState::Connected);

        let handle = conn
            .submit(Command::load(Target::layer(1, 1), "CG1"))
            .await
            .unwrap();
        assert_eq!(read_command(&mut reader).await, r#"LOAD 1-1 "CG1""#);
        assert_eq!(conn.pending_count(), 1);

        writer.write_all(b"202 LOAD OK\r\n").await.unwrap();
        let completion = handle.wait().await.unwrap();
        assert_eq!(completion.command.kind(), CommandKind::Load);
        let response = completion.into_response().unwrap();
        assert_eq!(response.code, 202);
        assert_eq!(response.kind, CommandKind::Load);
        assert_eq!(conn.pending_count(), 0);
        assert!(conn.last_received().is_some());

        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_fifo_correlation() {
        let (listener, port) = listen().await;
        let conn = Connection::new(test_config());
        let (accepted, connected) = tokio::join!(accept(&listener), conn.connect("127.0.0.1", port));
        connected.unwrap();
        let (mut reader, mut writer) = accepted;

        let a = conn.submit(Command::Cls { directory: None }).await.unwrap();
        let b = conn.submit(Command::Version { component: None }).await.unwrap();
        let c = conn.submit(Command::Stop { target: Target::layer(1, 1) }).await.unwrap();
        for _ in 0..3 {
            read_command(&mut reader).await;
        }

        writer
            .write_all(b"200 CLS OK\r\n\"AMB\" MOVIE\r\n\r\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        writer.write_all(b"201 VERSION OK\r\n2.3.0\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        writer.write_all(b"202 STOP OK\r\n").await.unwrap();

        let a = a.wait().await.unwrap();
        let b = b.wait().await.unwrap();
        let c = c.wait().await.unwrap();
        assert!(a.id < b.id && b.id < c.id);
        assert_eq!(a.result.unwrap().body, vec!["\"AMB\" MOVIE"]);
        assert_eq!(b.result.unwrap().data(), Some("2.3.0"));
        assert_eq!(c.result.unwrap().code, 202);

        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_submit_to_channel() {
        let (listener, port) = listen().await;
        let conn = Connection::new(test_config());
        let (accepted, connected) = tokio::join!(accept(&listener), conn.connect("127.0.0.1", port));
        connected.unwrap();
        let (mut reader, mut writer) = accepted;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = conn
            .submit_to(Command::Info { target: None }, tx)
            .await
            .unwrap();
        read_command(&mut reader).await;
        writer
            .write_all(b"200 INFO OK\r\n1 640x480 25\r\n\r\n")
            .await
            .unwrap();

        let completion = rx.recv().await.unwrap();
        assert_eq!(completion.id, id);
        assert_eq!(completion.result.unwrap().body, vec!["1 640x480 25"]);

        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_drop_fails_pending_and_reconnects() {
        let (listener, port) = listen().await;
        let conn = Connection::new(test_config());
        let mut events = conn.subscribe();
        let (accepted, connected) = tokio::join!(accept(&listener), conn.connect("127.0.0.1", port));
        connected.unwrap();
        let (mut reader, writer) = accepted;

        let first = conn.submit(Command::play(Target::layer(1, 1))).await.unwrap();
        let second = conn.submit(Command::play(Target::layer(1, 2))).await.unwrap();
        read_command(&mut reader).await;
        read_command(&mut reader).await;

        drop(reader);
        drop(writer);

        assert!(matches!(first.wait().await, Ok(Completion { result: Err(ClientError::Dropped), .. })));
        assert!(matches!(second.wait().await, Ok(Completion { result: Err(ClientError::Dropped), .. })));

        // Connecting, Connected, then Disconnected on the drop.
        let mut saw_disconnected = false;
        while let Ok(event) = tokio::time::timeout(Duration::from_secs(1), events.recv()).await {
            if let Ok(ConnectionEvent::StateChanged { state: ConnectionState::Disconnected, .. }) = event {
                saw_disconnected = true;
                break;
            }
        }
        assert!(saw_disconnected);

        // The supervisor comes back on its own.
        let (_reader, _writer) = tokio::time::timeout(Duration::from_secs(2), accept(&listener))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while !conn.is_connected() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (listener, port) = listen().await;
        let conn = Connection::new(test_config());
        let (accepted, connected) = tokio::join!(accept(&listener), conn.connect("127.0.0.1", port));
        connected.unwrap();
        let (mut reader, _writer) = accepted;

        let handle = conn.submit(Command::play(Target::layer(1, 1))).await.unwrap();
        read_command(&mut reader).await;

        conn.disconnect().await;
        assert!(matches!(
            handle.wait().await,
            Ok(Completion { result: Err(ClientError::ConnectionClosed), .. })
        ));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.pending_count(), 0);

        let mut events = conn.subscribe();
        conn.disconnect().await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.pending_count(), 0);
        assert!(events.try_recv().is_err());

        let result = conn.submit(Command::play(Target::layer(1, 1))).await;
        assert!(matches!(result, Err(ClientError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_same_endpoint_is_noop() {
        let (listener, port) = listen().await;
        let conn = Connection::new(test_config());
        let (_accepted, connected) = tokio::join!(accept(&listener), conn.connect("127.0.0.1", port));
        connected.unwrap();

        conn.connect("127.0.0.1", port).await.unwrap();
        assert!(conn.is_connected());
        // No second socket was opened.
        let second = tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;
        assert!(second.is_err());

        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_connect_other_endpoint_replaces_link() {
        let (listener_a, port_a) = listen().await;
        let (listener_b, port_b) = listen().await;
        let conn = Connection::new(test_config());
        let (accepted, connected) =
            tokio::join!(accept(&listener_a), conn.connect("127.0.0.1", port_a));
        connected.unwrap();
        let (mut reader_a, mut writer_a) = accepted;

        let version = conn.submit(Command::Version { component: None }).await.unwrap();
        assert_eq!(read_command(&mut reader_a).await, "VERSION");
        // Header of a two-line reply; the data line never comes.
        writer_a.write_all(b"201 VERSION OK\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (accepted, connected) =
            tokio::join!(accept(&listener_b), conn.connect("127.0.0.1", port_b));
        connected.unwrap();
        let (mut reader_b, mut writer_b) = accepted;
        assert_eq!(conn.endpoint(), Some(Endpoint::new("127.0.0.1", port_b)));

        assert!(matches!(
            version.wait().await,
            Ok(Completion { result: Err(ClientError::ConnectionClosed), .. })
        ));

        // The old socket is closed.
        let mut rest = String::new();
        let read = tokio::time::timeout(Duration::from_secs(1), reader_a.read_line(&mut rest))
            .await
            .unwrap();
        assert_eq!(read.unwrap(), 0);

        // A fresh parser: this one-line reply is not taken as VERSION data.
        let play = conn.submit(Command::play(Target::layer(1, 1))).await.unwrap();
        assert_eq!(read_command(&mut reader_b).await, "PLAY 1-1");
        writer_b.write_all(b"202 PLAY OK\r\n").await.unwrap();
        let response = play.wait().await.unwrap().into_response().unwrap();
        assert_eq!(response.code, 202);
        assert_eq!(response.kind, CommandKind::Play);

        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_disconnect_after_failed_connect_stops_retrying() {
        let (listener, port) = listen().await;
        drop(listener);

        let conn = Connection::new(test_config());
        assert!(conn.connect("127.0.0.1", port).await.is_err());
        conn.disconnect().await;

        // The server comes back; nobody should knock.
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let knock = tokio::time::timeout(Duration::from_millis(300), listener.accept()).await;
        assert!(knock.is_err());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_dropping_last_handle_stops_supervisor() {
        let (listener, port) = listen().await;
        let conn = Connection::new(test_config());
        let clone = conn.clone();
        let (accepted, connected) = tokio::join!(accept(&listener), conn.connect("127.0.0.1", port));
        connected.unwrap();
        let (mut reader, _writer) = accepted;

        // A remaining clone keeps the connection alive.
        drop(conn);
        assert!(clone.is_connected());

        drop(clone);
        let mut rest = String::new();
        let read = tokio::time::timeout(Duration::from_secs(1), reader.read_line(&mut rest))
            .await
            .unwrap();
        assert_eq!(read.unwrap(), 0);

        // No reconnect after the socket went away.
        let again = tokio::time::timeout(Duration::from_millis(300), listener.accept()).await;
        assert!(again.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_disconnect_racing_connect_leaves_no_link() {
        let (listener, port) = listen().await;
        let accepting = tokio::spawn(async move {
            let mut sockets = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                sockets.push(stream);
            }
        });

        for _ in 0..50 {
            let conn = Connection::new(test_config());
            let connecting = {
                let conn = conn.clone();
                tokio::spawn(async move { conn.connect("127.0.0.1", port).await })
            };
            tokio::task::yield_now().await;
            conn.disconnect().await;
            let _ = connecting.await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;

            // Either the connect won outright or nothing may be left behind.
            if conn.state() == ConnectionState::Disconnected {
                let result = conn.submit(Command::play(Target::layer(1, 1))).await;
                assert!(matches!(result, Err(ClientError::NotConnected)));
                assert_eq!(conn.pending_count(), 0);
                assert!(!conn.is_connected());
            }
            conn.disconnect().await;
        }

        accepting.abort();
    }

    #[tokio::test]
    async fn test_connect_failure_reports_first_attempt() {
        let (listener, port) = listen().await;
        drop(listener);

        let conn = Connection::new(test_config());
        let result = conn.connect("127.0.0.1", port).await;
        assert!(result.is_err());
        assert!(!conn.is_connected());
        conn.disconnect().await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_unsolicited_response_is_broadcast() {
        let (listener, port) = listen().await;
        let conn = Connection::new(test_config());
        let mut events = conn.subscribe();
        let (accepted, connected) = tokio::join!(accept(&listener), conn.connect("127.0.0.1", port));
        connected.unwrap();
        let (_reader, mut writer) = accepted;

        writer.write_all(b"202 PLAY OK\r\n").await.unwrap();

        let response = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Ok(ConnectionEvent::Unsolicited(response)) = events.recv().await {
                    return response;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(response.kind, CommandKind::Play);

        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_protocol_errors_do_not_drop_link() {
        let (listener, port) = listen().await;
        let conn = Connection::new(test_config());
        let (accepted, connected) = tokio::join!(accept(&listener), conn.connect("127.0.0.1", port));
        connected.unwrap();
        let (mut reader, mut writer) = accepted;

        let odd = conn.submit(Command::custom("DIAG")).await.unwrap();
        let stop = conn.submit(Command::Stop { target: Target::layer(1, 1) }).await.unwrap();
        read_command(&mut reader).await;
        read_command(&mut reader).await;

        writer
            .write_all(b"not a header\r\n299 DIAG OK\r\n202 STOP OK\r\n")
            .await
            .unwrap();

        let odd = odd.wait().await.unwrap();
        assert!(matches!(
            odd.result,
            Err(ClientError::Protocol(ProtocolError::UnknownStatus { code: 299, .. }))
        ));
        assert_eq!(stop.wait().await.unwrap().result.unwrap().code, 202);
        assert!(conn.is_connected());

        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_request_timeout_keeps_order() {
        let (listener, port) = listen().await;
        let conn = Connection::new(test_config().with_request_timeout(Duration::from_millis(250)));
        let (accepted, connected) = tokio::join!(accept(&listener), conn.connect("127.0.0.1", port));
        connected.unwrap();
        let (mut reader, mut writer) = accepted;

        let slow = conn.submit(Command::Cls { directory: None }).await.unwrap();
        assert!(matches!(slow.wait().await, Err(ClientError::Timeout)));
        assert_eq!(conn.pending_count(), 1);

        let next = conn.submit(Command::Stop { target: Target::layer(1, 1) }).await.unwrap();
        read_command(&mut reader).await;
        read_command(&mut reader).await;

        writer.write_all(b"200 CLS OK\r\n\r\n202 STOP OK\r\n").await.unwrap();
        let completion = next.wait().await.unwrap();
        assert_eq!(completion.result.unwrap().kind, CommandKind::Stop);

        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_unanswered_keepalive_drops_link() {
        let (listener, port) = listen().await;
        let conn = Connection::new(test_config().with_keepalive(Duration::from_millis(50)));
        let (accepted, connected) = tokio::join!(accept(&listener), conn.connect("127.0.0.1", port));
        connected.unwrap();
        let mut events = conn.subscribe();
        let (mut reader, _writer) = accepted;

        assert_eq!(read_command(&mut reader).await, "VERSION");

        let state = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(ConnectionEvent::StateChanged { state, .. }) = events.recv().await {
                    return state;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(state, ConnectionState::Disconnected);

        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_invalid_command_is_not_queued() {
        let (listener, port) = listen().await;
        let conn = Connection::new(test_config());
        let (_accepted, connected) = tokio::join!(accept(&listener), conn.connect("127.0.0.1", port));
        connected.unwrap();

        let result = conn.submit(Command::load(Target::layer(0, 1), "CG1")).await;
        assert!(matches!(result, Err(ClientError::Encoding(_))));
        assert_eq!(conn.pending_count(), 0);

        conn.disconnect().await;
    }
}
