//! Transport multiplexer for the beer game client.
//!
//! [`GraphQlClient`] owns a background stream loop task and the request
//! channel. Cheap, cloneable [`ClientHandle`]s route each operation to the
//! channel that carries it: subscriptions go to the single shared streaming
//! channel, queries and mutations go to the request channel.
//!
//! The streaming channel is opened lazily on the first subscription, kept
//! alive with `ping` frames, and re-established transparently when it is
//! lost: every live subscription is re-sent on the new channel under its
//! original id, so subscribers only ever observe a gap between pushes.
//!
//! # Example
//!
//! ```rust,ignore
//! let config = ClientConfig::for_origin("https://beer.example.com");
//! let client = GraphQlClient::connect(config);
//! let handle = client.handle();
//!
//! let mut game = handle.subscribe::<GameSubscription>(GameVariables {
//!     game_id: "g1".into(),
//! })?;
//! while game.changed().await {
//!     println!("{:?}", game.state());
//! }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{BeerGameError, OperationError, Result};
use crate::operation::{ExistsVariables, GameExistsQuery, GraphQlOperation, OperationKind};
use crate::protocol::{ClientMessage, GraphQlRequest, GraphQlResponse, ServerMessage};
use crate::subscription::{decode_response, StableSubscription};
use crate::transport::{Connector, RequestChannel, Transport};

/// Path of the request/response endpoint.
pub const REQUEST_PATH: &str = "/graphql";

/// Path of the streaming endpoint.
pub const STREAM_PATH: &str = "/wsgraphql";

/// Default interval between keep-alive pings.
const DEFAULT_KEEP_ALIVE: Duration = Duration::from_millis(1000);

/// Default time allowed for the server to acknowledge `connection_init`.
const DEFAULT_CONNECTION_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default pause between attempts to re-establish the streaming channel.
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`GraphQlClient`].
///
/// # Example
///
/// ```
/// use beer_game_client::client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::for_origin("https://beer.example.com")
///     .with_reconnect_delay(Duration::from_secs(2));
/// assert_eq!(config.http_url, "https://beer.example.com/graphql");
/// assert_eq!(config.ws_url, "wss://beer.example.com/wsgraphql");
/// assert_eq!(config.origin.as_deref(), Some("https://beer.example.com"));
/// assert_eq!(config.keep_alive, Some(Duration::from_millis(1000)));
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// URL of the request/response endpoint.
    pub http_url: String,
    /// URL of the streaming endpoint.
    pub ws_url: String,
    /// Origin presented in the streaming handshake's `Origin` header.
    ///
    /// Set by [`for_origin`](Self::for_origin); `None` sends no header.
    pub origin: Option<String>,
    /// Interval between keep-alive pings on the streaming channel.
    ///
    /// A ping that has not been answered by the next tick tears the channel
    /// down. Defaults to **1 second**; `None` disables keep-alive, which
    /// servers that never answer `ping` require.
    pub keep_alive: Option<Duration>,
    /// Time allowed for the server to acknowledge a new channel.
    ///
    /// Defaults to **5 seconds**.
    pub connection_ack_timeout: Duration,
    /// Pause between attempts to re-establish a lost streaming channel.
    ///
    /// Defaults to **500 ms**.
    pub reconnect_delay: Duration,
    /// Timeout for the graceful shutdown of the stream loop.
    ///
    /// Defaults to **1 second**. A zero timeout aborts the loop immediately.
    pub shutdown_timeout: Duration,
}

impl ClientConfig {
    /// Create a configuration for explicit endpoint URLs.
    pub fn new(http_url: impl Into<String>, ws_url: impl Into<String>) -> Self {
        Self {
            http_url: http_url.into(),
            ws_url: ws_url.into(),
            origin: None,
            keep_alive: Some(DEFAULT_KEEP_ALIVE),
            connection_ack_timeout: DEFAULT_CONNECTION_ACK_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Derive both endpoints from the origin the client was served from.
    ///
    /// The streaming scheme mirrors the origin: `https` pairs with `wss`,
    /// anything else with `ws`. A path on the origin is ignored. The origin
    /// itself is presented in the streaming handshake.
    pub fn for_origin(origin: &str) -> Self {
        let (secure, rest) = if let Some(rest) = origin.strip_prefix("https://") {
            (true, rest)
        } else if let Some(rest) = origin.strip_prefix("http://") {
            (false, rest)
        } else {
            (false, origin)
        };
        let host = rest.split('/').next().unwrap_or(rest);
        let (http, ws) = if secure {
            ("https", "wss")
        } else {
            ("http", "ws")
        };
        Self::new(
            format!("{http}://{host}{REQUEST_PATH}"),
            format!("{ws}://{host}{STREAM_PATH}"),
        )
        .with_origin(format!("{http}://{host}"))
    }

    /// Set the origin presented in the streaming handshake.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// A [`WebSocketConnector`](crate::transports::WebSocketConnector) for
    /// the streaming endpoint, presenting the configured origin.
    #[cfg(feature = "transport-websocket")]
    pub fn websocket_connector(&self) -> crate::transports::WebSocketConnector {
        let connector = crate::transports::WebSocketConnector::new(self.ws_url.clone());
        match &self.origin {
            Some(origin) => connector.with_origin(origin.clone()),
            None => connector,
        }
    }

    /// Set the keep-alive interval, or disable keep-alive with `None`.
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Option<Duration>) -> Self {
        self.keep_alive = keep_alive.filter(|period| !period.is_zero());
        self
    }

    /// Set the time allowed for the server to acknowledge a new channel.
    #[must_use]
    pub fn with_connection_ack_timeout(mut self, timeout: Duration) -> Self {
        self.connection_ack_timeout = timeout;
        self
    }

    /// Set the pause between re-establishment attempts.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the timeout for the graceful shutdown.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

// ── Shared state ────────────────────────────────────────────────────

/// State shared between handles and the stream loop.
struct LinkState {
    /// A streaming channel is currently established and acknowledged.
    connected: AtomicBool,
    /// The client has shut down; new operations are refused.
    closed: AtomicBool,
    /// Live [`RawSubscription`] handles.
    active: AtomicUsize,
    /// Streaming channels established over the client's lifetime.
    connections: AtomicUsize,
}

impl LinkState {
    fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            active: AtomicUsize::new(0),
            connections: AtomicUsize::new(0),
        }
    }
}

/// Commands from handles to the stream loop.
enum Command {
    Subscribe {
        id: String,
        request: GraphQlRequest,
        events: mpsc::UnboundedSender<StreamEvent>,
    },
    Unsubscribe {
        id: String,
    },
}

/// One item delivered to a single subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A new result; supersedes every earlier one.
    Next(GraphQlResponse),
    /// The operation failed; no further results follow.
    Error(OperationError),
    /// The server finished the operation.
    Complete,
}

// ── Raw subscription ────────────────────────────────────────────────

/// A live operation on the streaming channel.
///
/// Dropping it sends `complete` for its id and releases the subscriber slot,
/// so a subscription never outlives the value that owns it.
pub struct RawSubscription {
    id: String,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    state: Arc<LinkState>,
}

impl RawSubscription {
    /// The operation id used on the wire.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the next event. Returns `None` once the client has shut down.
    ///
    /// Cancel-safe.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Take an already-delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<StreamEvent> {
        self.events.try_recv().ok()
    }
}

impl std::fmt::Debug for RawSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawSubscription")
            .field("id", &self.id)
            .finish()
    }
}

impl Drop for RawSubscription {
    fn drop(&mut self) {
        self.state.active.fetch_sub(1, Ordering::AcqRel);
        let id = std::mem::take(&mut self.id);
        if self.cmd_tx.send(Command::Unsubscribe { id }).is_err() {
            debug!("stream loop already stopped; nothing to release");
        }
    }
}

/// Where [`ClientHandle::dispatch`] sent an operation.
pub enum Dispatch {
    /// A query or mutation in flight on the request channel.
    Response(BoxFuture<'static, Result<GraphQlResponse>>),
    /// A subscription registered on the streaming channel.
    Stream(RawSubscription),
}

impl std::fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Response(_) => f.write_str("Dispatch::Response(..)"),
            Self::Stream(raw) => f.debug_tuple("Dispatch::Stream").field(raw).finish(),
        }
    }
}

// ── Client handle ───────────────────────────────────────────────────

/// Cloneable handle for issuing operations.
///
/// Request/response operations run concurrently and independently: a
/// failure only ever affects the operation that failed.
#[derive(Clone)]
pub struct ClientHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    requests: Arc<dyn RequestChannel>,
    state: Arc<LinkState>,
}

impl ClientHandle {
    /// Classify `request` and send it over the matching channel.
    ///
    /// # Errors
    ///
    /// Returns [`BeerGameError::UnsupportedOperation`] if the document has no
    /// operation definition, or [`BeerGameError::NotConnected`] after shutdown.
    pub fn dispatch(&self, request: GraphQlRequest) -> Result<Dispatch> {
        let kind = OperationKind::of(&request.query).ok_or(BeerGameError::UnsupportedOperation)?;
        if kind.is_streaming() {
            return self.open_stream(request).map(Dispatch::Stream);
        }
        self.ensure_open()?;
        let requests = Arc::clone(&self.requests);
        Ok(Dispatch::Response(Box::pin(async move {
            requests.execute(request).await
        })))
    }

    /// Execute a query or mutation on the request channel.
    ///
    /// # Errors
    ///
    /// Returns [`BeerGameError::WrongChannel`] for subscription documents, or
    /// any error of the request channel itself.
    pub async fn execute(&self, request: GraphQlRequest) -> Result<GraphQlResponse> {
        let kind = OperationKind::of(&request.query).ok_or(BeerGameError::UnsupportedOperation)?;
        if kind.is_streaming() {
            return Err(BeerGameError::WrongChannel {
                kind,
                channel: "request",
            });
        }
        self.ensure_open()?;
        self.requests.execute(request).await
    }

    /// Register a subscription on the streaming channel.
    ///
    /// The channel is opened if this is the first live subscription.
    ///
    /// # Errors
    ///
    /// Returns [`BeerGameError::WrongChannel`] for non-subscription documents
    /// and [`BeerGameError::NotConnected`] after shutdown.
    pub fn open_stream(&self, request: GraphQlRequest) -> Result<RawSubscription> {
        let kind = OperationKind::of(&request.query).ok_or(BeerGameError::UnsupportedOperation)?;
        if !kind.is_streaming() {
            return Err(BeerGameError::WrongChannel {
                kind,
                channel: "streaming",
            });
        }
        self.ensure_open()?;

        let id = uuid::Uuid::new_v4().to_string();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.cmd_tx
            .send(Command::Subscribe {
                id: id.clone(),
                request,
                events: events_tx,
            })
            .map_err(|_| BeerGameError::NotConnected)?;
        self.state.active.fetch_add(1, Ordering::AcqRel);

        Ok(RawSubscription {
            id,
            events: events_rx,
            cmd_tx: self.cmd_tx.clone(),
            state: Arc::clone(&self.state),
        })
    }

    /// Run a typed query and decode its data.
    ///
    /// # Errors
    ///
    /// Returns [`BeerGameError::Operation`] when the server reports errors,
    /// [`BeerGameError::Contract`] when the data breaks an invariant, or any
    /// channel error.
    pub async fn query<O: GraphQlOperation>(&self, variables: O::Variables) -> Result<O::Data> {
        let response = self.execute(O::request(&variables)?).await?;
        decode_response::<O>(response)
    }

    /// Run a typed mutation and decode its data.
    ///
    /// # Errors
    ///
    /// Same as [`query`](Self::query).
    pub async fn mutate<O: GraphQlOperation>(&self, variables: O::Variables) -> Result<O::Data> {
        self.query::<O>(variables).await
    }

    /// Send a mutation without waiting for its result.
    ///
    /// Failures are logged; the returned handle may be awaited or dropped.
    pub fn fire<O: GraphQlOperation>(
        &self,
        variables: O::Variables,
    ) -> tokio::task::JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            match handle.mutate::<O>(variables).await {
                Ok(data) => debug!(operation = O::NAME, ?data, "mutation completed"),
                Err(e) => error!(operation = O::NAME, "mutation failed: {e}"),
            }
        })
    }

    /// Open a stabilized subscription for `O`.
    ///
    /// # Errors
    ///
    /// Same as [`open_stream`](Self::open_stream).
    pub fn subscribe<O: GraphQlOperation>(
        &self,
        variables: O::Variables,
    ) -> Result<StableSubscription<O>> {
        StableSubscription::open(self, variables)
    }

    /// Whether a game with this id exists on the server.
    ///
    /// # Errors
    ///
    /// Same as [`query`](Self::query).
    pub async fn game_exists(&self, game_id: impl Into<String>) -> Result<bool> {
        let data = self
            .query::<GameExistsQuery>(ExistsVariables { id: game_id.into() })
            .await?;
        Ok(data.game_exists)
    }

    /// Returns `true` while an acknowledged streaming channel is up.
    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Acquire)
    }

    /// Number of live subscription handles.
    pub fn active_subscriptions(&self) -> usize {
        self.state.active.load(Ordering::Acquire)
    }

    /// Number of streaming channels established so far.
    pub fn connections_established(&self) -> usize {
        self.state.connections.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.closed.load(Ordering::Acquire) {
            return Err(BeerGameError::NotConnected);
        }
        Ok(())
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("connected", &self.is_connected())
            .field("active_subscriptions", &self.active_subscriptions())
            .finish()
    }
}

// ── Client ──────────────────────────────────────────────────────────

/// Owner of the stream loop task and the request channel.
///
/// Created via [`GraphQlClient::start`]; hand out [`ClientHandle`]s with
/// [`handle`](Self::handle).
pub struct GraphQlClient {
    handle: ClientHandle,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl GraphQlClient {
    /// Spawn the stream loop and return the client.
    ///
    /// No connection is made until the first subscription is opened.
    pub fn start(
        connector: impl Connector,
        requests: impl RequestChannel,
        config: ClientConfig,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let state = Arc::new(LinkState::new());

        let stream_loop = StreamLoop {
            connector: Box::new(connector),
            keep_alive: config.keep_alive,
            ack_timeout: config.connection_ack_timeout,
            reconnect_delay: config.reconnect_delay,
            subscribers: HashMap::new(),
            state: Arc::clone(&state),
            cmd_rx,
            shutdown_rx,
        };
        let task = tokio::spawn(stream_loop.run());

        Self {
            handle: ClientHandle {
                cmd_tx,
                requests: Arc::new(requests),
                state,
            },
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    /// Start a client on the built-in WebSocket and HTTP channels.
    #[cfg(all(feature = "transport-websocket", feature = "transport-http"))]
    pub fn connect(config: ClientConfig) -> Self {
        let connector = config.websocket_connector();
        let requests = crate::transports::HttpRequestChannel::new(config.http_url.clone());
        Self::start(connector, requests, config)
    }

    /// A cloneable handle for issuing operations.
    pub fn handle(&self) -> ClientHandle {
        self.handle.clone()
    }

    /// Shut down the client, closing the streaming channel.
    ///
    /// Live subscriptions observe the end of their stream; new operations
    /// fail with [`BeerGameError::NotConnected`].
    pub async fn shutdown(&mut self) {
        debug!("GraphQlClient: shutdown requested");
        self.handle.state.closed.store(true, Ordering::Release);

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("stream loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("stream loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("stream loop aborted: {join_err}");
                    }
                }
            }
        }

        self.handle.state.connected.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for GraphQlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphQlClient")
            .field("handle", &self.handle)
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for GraphQlClient {
    fn drop(&mut self) {
        // No executor context here to drive a graceful close; abort instead.
        self.handle.state.closed.store(true, Ordering::Release);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Stream loop ─────────────────────────────────────────────────────

struct Subscriber {
    request: GraphQlRequest,
    events: mpsc::UnboundedSender<StreamEvent>,
}

/// Why a connection attempt or session ended.
enum Exit {
    /// The client shut down; the loop must stop.
    Shutdown,
    /// The channel failed; it may be re-established.
    Lost(String),
}

struct StreamLoop {
    connector: Box<dyn Connector>,
    keep_alive: Option<Duration>,
    ack_timeout: Duration,
    reconnect_delay: Duration,
    subscribers: HashMap<String, Subscriber>,
    state: Arc<LinkState>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    shutdown_rx: oneshot::Receiver<()>,
}

impl StreamLoop {
    async fn run(mut self) {
        debug!("stream loop started");

        loop {
            while let Ok(cmd) = self.cmd_rx.try_recv() {
                self.apply_offline(cmd);
            }

            // Idle until there is something to stream.
            while self.subscribers.is_empty() {
                tokio::select! {
                    cmd = self.cmd_rx.recv() => match cmd {
                        Some(cmd) => self.apply_offline(cmd),
                        None => {
                            debug!("command channel closed, stopping stream loop");
                            return self.finish();
                        }
                    },
                    _ = &mut self.shutdown_rx => return self.finish(),
                }
            }

            let exit = match self.establish().await {
                Ok(mut transport) => {
                    let exit = self.session(&mut transport).await;
                    if let Err(e) = transport.close().await {
                        debug!("closing streaming channel failed: {e}");
                    }
                    exit
                }
                Err(exit) => exit,
            };
            self.state.connected.store(false, Ordering::Release);

            match exit {
                Exit::Shutdown => return self.finish(),
                Exit::Lost(reason) => {
                    warn!(%reason, "streaming channel lost");
                    if !self.subscribers.is_empty() && !self.pause().await {
                        return self.finish();
                    }
                }
            }
        }
    }

    fn finish(&mut self) {
        self.state.closed.store(true, Ordering::Release);
        self.state.connected.store(false, Ordering::Release);
        // Dropping the senders ends every subscriber's stream.
        self.subscribers.clear();
        debug!("stream loop exited");
    }

    /// Sleep before re-establishing. Returns `false` if shutdown was requested.
    async fn pause(&mut self) -> bool {
        tokio::select! {
            () = tokio::time::sleep(self.reconnect_delay) => true,
            _ = &mut self.shutdown_rx => false,
        }
    }

    /// Open, initialise and repopulate a new streaming channel.
    async fn establish(&mut self) -> std::result::Result<Box<dyn Transport>, Exit> {
        let connected = tokio::select! {
            result = self.connector.connect() => result,
            _ = &mut self.shutdown_rx => return Err(Exit::Shutdown),
        };
        let mut transport = connected.map_err(|e| Exit::Lost(format!("connect failed: {e}")))?;

        send_message(&mut transport, &ClientMessage::ConnectionInit { payload: None })
            .await
            .map_err(Exit::Lost)?;

        let acked = tokio::select! {
            result = tokio::time::timeout(self.ack_timeout, await_ack(&mut transport)) => result,
            _ = &mut self.shutdown_rx => return Err(Exit::Shutdown),
        };
        match acked {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => return Err(Exit::Lost(reason)),
            Err(_) => return Err(Exit::Lost("connection_ack timed out".into())),
        }

        self.state.connected.store(true, Ordering::Release);
        let count = self.state.connections.fetch_add(1, Ordering::AcqRel) + 1;
        info!(
            connection = count,
            subscriptions = self.subscribers.len(),
            "streaming channel ready"
        );

        for (id, subscriber) in &self.subscribers {
            let msg = ClientMessage::Subscribe {
                id: id.clone(),
                payload: subscriber.request.clone(),
            };
            send_message(&mut transport, &msg)
                .await
                .map_err(Exit::Lost)?;
        }

        Ok(transport)
    }

    /// Multiplex commands, keep-alive and incoming frames until the channel ends.
    async fn session(&mut self, transport: &mut Box<dyn Transport>) -> Exit {
        let mut keep_alive = self.keep_alive.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let mut awaiting_pong = false;

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => {
                        if let Err(reason) = self.apply(cmd, transport).await {
                            return Exit::Lost(reason);
                        }
                    }
                    None => {
                        debug!("command channel closed, stopping stream loop");
                        return Exit::Shutdown;
                    }
                },

                _ = &mut self.shutdown_rx => {
                    debug!("shutdown signal received");
                    return Exit::Shutdown;
                }

                () = tick(&mut keep_alive) => {
                    if awaiting_pong {
                        return Exit::Lost("keep-alive ping was not acknowledged".into());
                    }
                    if let Err(reason) =
                        send_message(transport, &ClientMessage::Ping { payload: None }).await
                    {
                        return Exit::Lost(reason);
                    }
                    awaiting_pong = true;
                }

                incoming = transport.recv() => match incoming {
                    Some(Ok(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(ServerMessage::Pong { .. }) => awaiting_pong = false,
                        Ok(ServerMessage::Ping { .. }) => {
                            if let Err(reason) =
                                send_message(transport, &ClientMessage::Pong { payload: None }).await
                            {
                                return Exit::Lost(reason);
                            }
                        }
                        Ok(msg) => self.route(msg),
                        Err(e) => {
                            warn!("failed to deserialize server message: {e}, raw: {text}");
                        }
                    },
                    Some(Err(e)) => return Exit::Lost(e.to_string()),
                    None => return Exit::Lost("channel closed by server".into()),
                },
            }
        }
    }

    async fn apply(
        &mut self,
        cmd: Command,
        transport: &mut Box<dyn Transport>,
    ) -> std::result::Result<(), String> {
        match cmd {
            Command::Subscribe {
                id,
                request,
                events,
            } => {
                debug!(%id, "subscribing");
                let msg = ClientMessage::Subscribe {
                    id: id.clone(),
                    payload: request.clone(),
                };
                self.subscribers
                    .insert(id, Subscriber { request, events });
                send_message(transport, &msg).await
            }
            Command::Unsubscribe { id } => {
                if self.subscribers.remove(&id).is_none() {
                    return Ok(());
                }
                debug!(%id, "unsubscribing");
                send_message(transport, &ClientMessage::Complete { id }).await
            }
        }
    }

    /// Record a command while no channel is up; it takes effect on the next one.
    fn apply_offline(&mut self, cmd: Command) {
        match cmd {
            Command::Subscribe {
                id,
                request,
                events,
            } => {
                self.subscribers
                    .insert(id, Subscriber { request, events });
            }
            Command::Unsubscribe { id } => {
                self.subscribers.remove(&id);
            }
        }
    }

    /// Deliver a server message to the one subscriber it belongs to.
    fn route(&mut self, msg: ServerMessage) {
        let (id, event, done) = match msg {
            ServerMessage::Next { id, payload } => (id, StreamEvent::Next(payload), false),
            ServerMessage::Error { id, payload } => {
                let err = OperationError {
                    messages: payload.into_iter().map(|e| e.message).collect(),
                };
                (id, StreamEvent::Error(err), true)
            }
            ServerMessage::Complete { id } => (id, StreamEvent::Complete, true),
            ServerMessage::ConnectionAck { .. } => {
                debug!("ignoring repeated connection_ack");
                return;
            }
            ServerMessage::Ping { .. } | ServerMessage::Pong { .. } => return,
        };

        let Some(subscriber) = self.subscribers.get(&id) else {
            warn!(%id, "dropping message for unknown operation id");
            return;
        };
        if subscriber.events.send(event).is_err() {
            debug!(%id, "subscriber already released");
        }
        if done {
            self.subscribers.remove(&id);
        }
    }
}

/// Wait for `connection_ack`, answering pings in the meantime.
async fn await_ack(transport: &mut Box<dyn Transport>) -> std::result::Result<(), String> {
    loop {
        match transport.recv().await {
            Some(Ok(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                Ok(ServerMessage::ConnectionAck { .. }) => return Ok(()),
                Ok(ServerMessage::Ping { .. }) => {
                    send_message(transport, &ClientMessage::Pong { payload: None }).await?;
                }
                Ok(other) => debug!(?other, "ignoring message before connection_ack"),
                Err(e) => warn!("failed to deserialize server message: {e}, raw: {text}"),
            },
            Some(Err(e)) => return Err(e.to_string()),
            None => return Err("channel closed before connection_ack".into()),
        }
    }
}

async fn send_message(
    transport: &mut Box<dyn Transport>,
    msg: &ClientMessage,
) -> std::result::Result<(), String> {
    let json = match serde_json::to_string(msg) {
        Ok(json) => json,
        Err(e) => {
            // Serialization errors are programming bugs; don't kill the channel.
            error!("failed to serialize ClientMessage: {e}");
            return Ok(());
        }
    };
    transport
        .send(json)
        .await
        .map_err(|e| format!("transport send error: {e}"))
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    // ── Loopback channel ────────────────────────────────────────────

    struct Loopback {
        tx: mpsc::UnboundedSender<String>,
        rx: mpsc::UnboundedReceiver<String>,
    }

    #[async_trait]
    impl Transport for Loopback {
        async fn send(&mut self, message: String) -> std::result::Result<(), BeerGameError> {
            self.tx
                .send(message)
                .map_err(|e| BeerGameError::TransportSend(e.to_string()))
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, BeerGameError>> {
            self.rx.recv().await.map(Ok)
        }

        async fn close(&mut self) -> std::result::Result<(), BeerGameError> {
            Ok(())
        }
    }

    /// Server side of one loopback connection.
    struct Server {
        rx: mpsc::UnboundedReceiver<String>,
        tx: mpsc::UnboundedSender<String>,
    }

    impl Server {
        async fn recv(&mut self) -> ClientMessage {
            let text = tokio::time::timeout(Duration::from_secs(2), self.rx.recv())
                .await
                .expect("timed out waiting for client frame")
                .expect("client closed the channel");
            serde_json::from_str(&text).unwrap()
        }

        fn send(&self, msg: &ServerMessage) {
            self.tx.send(serde_json::to_string(msg).unwrap()).unwrap();
        }

        async fn accept(&mut self) {
            assert!(matches!(
                self.recv().await,
                ClientMessage::ConnectionInit { .. }
            ));
            self.send(&ServerMessage::ConnectionAck { payload: None });
        }
    }

    struct LoopbackConnector {
        servers: mpsc::UnboundedSender<Server>,
    }

    #[async_trait]
    impl Connector for LoopbackConnector {
        async fn connect(&self) -> std::result::Result<Box<dyn Transport>, BeerGameError> {
            let (client_tx, server_rx) = mpsc::unbounded_channel();
            let (server_tx, client_rx) = mpsc::unbounded_channel();
            self.servers
                .send(Server {
                    rx: server_rx,
                    tx: server_tx,
                })
                .map_err(|_| BeerGameError::TransportClosed)?;
            Ok(Box::new(Loopback {
                tx: client_tx,
                rx: client_rx,
            }))
        }
    }

    #[derive(Default)]
    struct RecordingRequests {
        seen: Arc<StdMutex<Vec<GraphQlRequest>>>,
    }

    #[async_trait]
    impl RequestChannel for RecordingRequests {
        async fn execute(
            &self,
            request: GraphQlRequest,
        ) -> std::result::Result<GraphQlResponse, BeerGameError> {
            self.seen.lock().unwrap().push(request);
            Ok(GraphQlResponse::from_data(json!({ "gameExists": true })))
        }
    }

    fn start(
        config: ClientConfig,
    ) -> (
        GraphQlClient,
        mpsc::UnboundedReceiver<Server>,
        Arc<StdMutex<Vec<GraphQlRequest>>>,
    ) {
        let (servers_tx, servers_rx) = mpsc::unbounded_channel();
        let requests = RecordingRequests::default();
        let seen = Arc::clone(&requests.seen);
        let client = GraphQlClient::start(
            LoopbackConnector {
                servers: servers_tx,
            },
            requests,
            config,
        );
        (client, servers_rx, seen)
    }

    fn test_config() -> ClientConfig {
        ClientConfig::new("http://test/graphql", "ws://test/wsgraphql")
            .with_keep_alive(None)
            .with_reconnect_delay(Duration::from_millis(10))
    }

    fn subscription(doc: &str) -> GraphQlRequest {
        GraphQlRequest::new(doc).with_variables(json!({ "gameId": "g1" }))
    }

    async fn next_server(servers: &mut mpsc::UnboundedReceiver<Server>) -> Server {
        tokio::time::timeout(Duration::from_secs(2), servers.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[test]
    fn config_defaults() {
        let config = ClientConfig::new("http://h/graphql", "ws://h/wsgraphql");
        assert_eq!(config.keep_alive, Some(Duration::from_millis(1000)));
        assert_eq!(config.connection_ack_timeout, Duration::from_secs(5));
        assert_eq!(config.reconnect_delay, Duration::from_millis(500));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
    }

    #[test]
    fn origin_scheme_selects_stream_scheme() {
        let plain = ClientConfig::for_origin("http://localhost:8080/game/abc");
        assert_eq!(plain.http_url, "http://localhost:8080/graphql");
        assert_eq!(plain.ws_url, "ws://localhost:8080/wsgraphql");

        let secure = ClientConfig::for_origin("https://beer.example.com");
        assert_eq!(secure.ws_url, "wss://beer.example.com/wsgraphql");
    }

    #[test]
    fn origin_is_kept_without_its_path() {
        let config = ClientConfig::for_origin("http://localhost:8080/game/abc");
        assert_eq!(config.origin.as_deref(), Some("http://localhost:8080"));
        assert_eq!(
            ClientConfig::new("http://h/graphql", "ws://h/wsgraphql").origin,
            None
        );
    }

    #[cfg(feature = "transport-websocket")]
    #[test]
    fn websocket_connector_presents_configured_origin() {
        let connector = ClientConfig::for_origin("https://beer.example.com").websocket_connector();
        assert_eq!(connector.url(), "wss://beer.example.com/wsgraphql");
        assert_eq!(connector.origin(), Some("https://beer.example.com"));

        let bare = ClientConfig::new("http://h/graphql", "ws://h/wsgraphql").websocket_connector();
        assert_eq!(bare.origin(), None);
    }

    #[test]
    fn zero_keep_alive_disables_pings() {
        let config = test_config().with_keep_alive(Some(Duration::ZERO));
        assert_eq!(config.keep_alive, None);
    }

    #[tokio::test]
    async fn no_connection_until_first_subscription() {
        let (mut client, mut servers, _seen) = start(test_config());
        let handle = client.handle();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(servers.try_recv().is_err());
        assert_eq!(handle.connections_established(), 0);

        let _sub = handle.open_stream(subscription("subscription { game }")).unwrap();
        let mut server = next_server(&mut servers).await;
        server.accept().await;
        assert!(matches!(server.recv().await, ClientMessage::Subscribe { .. }));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn queries_use_request_channel_and_subscriptions_the_stream() {
        let (mut client, mut servers, seen) = start(test_config());
        let handle = client.handle();

        let exists = handle.game_exists("g1").await.unwrap();
        assert!(exists);
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(servers.try_recv().is_err());

        match handle.dispatch(subscription("subscription S { game }")).unwrap() {
            Dispatch::Stream(_raw) => {}
            other => panic!("expected stream dispatch, got {other:?}"),
        }
        match handle.dispatch(GraphQlRequest::new("mutation { startGame }")).unwrap() {
            Dispatch::Response(fut) => {
                fut.await.unwrap();
            }
            other => panic!("expected response dispatch, got {other:?}"),
        }
        assert_eq!(seen.lock().unwrap().len(), 2);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn wrong_channel_is_rejected() {
        let (mut client, _servers, _seen) = start(test_config());
        let handle = client.handle();

        let err = handle
            .execute(GraphQlRequest::new("subscription { game }"))
            .await
            .unwrap_err();
        assert!(matches!(err, BeerGameError::WrongChannel { channel: "request", .. }));

        let err = handle
            .open_stream(GraphQlRequest::new("query { gameRoles { name } }"))
            .unwrap_err();
        assert!(matches!(err, BeerGameError::WrongChannel { channel: "streaming", .. }));

        let err = handle.dispatch(GraphQlRequest::new("# nothing")).unwrap_err();
        assert!(matches!(err, BeerGameError::UnsupportedOperation));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn messages_are_routed_by_operation_id() {
        let (mut client, mut servers, _seen) = start(test_config());
        let handle = client.handle();

        let mut first = handle.open_stream(subscription("subscription A { a }")).unwrap();
        let mut second = handle.open_stream(subscription("subscription B { b }")).unwrap();

        let mut server = next_server(&mut servers).await;
        server.accept().await;
        let _ = server.recv().await;
        let _ = server.recv().await;

        server.send(&ServerMessage::Next {
            id: second.id().to_string(),
            payload: GraphQlResponse::from_data(json!({ "b": 2 })),
        });
        server.send(&ServerMessage::Next {
            id: "unknown".into(),
            payload: GraphQlResponse::from_data(json!({ "x": 0 })),
        });
        server.send(&ServerMessage::Next {
            id: first.id().to_string(),
            payload: GraphQlResponse::from_data(json!({ "a": 1 })),
        });

        assert_eq!(
            first.recv().await,
            Some(StreamEvent::Next(GraphQlResponse::from_data(json!({ "a": 1 }))))
        );
        assert_eq!(
            second.recv().await,
            Some(StreamEvent::Next(GraphQlResponse::from_data(json!({ "b": 2 }))))
        );
        assert!(first.try_recv().is_none());
        assert!(second.try_recv().is_none());

        client.shutdown().await;
    }

    #[tokio::test]
    async fn dropping_subscription_sends_complete() {
        let (mut client, mut servers, _seen) = start(test_config());
        let handle = client.handle();

        let sub = handle.open_stream(subscription("subscription { game }")).unwrap();
        let id = sub.id().to_string();
        assert_eq!(handle.active_subscriptions(), 1);

        let mut server = next_server(&mut servers).await;
        server.accept().await;
        let _ = server.recv().await;

        drop(sub);
        assert_eq!(handle.active_subscriptions(), 0);
        assert_eq!(server.recv().await, ClientMessage::Complete { id });

        client.shutdown().await;
    }

    #[tokio::test]
    async fn lost_channel_is_reestablished_and_resubscribed() {
        let (mut client, mut servers, _seen) = start(test_config());
        let handle = client.handle();

        let mut sub = handle.open_stream(subscription("subscription { game }")).unwrap();
        let id = sub.id().to_string();

        let mut server = next_server(&mut servers).await;
        server.accept().await;
        let _ = server.recv().await;
        drop(server);

        let mut server = next_server(&mut servers).await;
        server.accept().await;
        match server.recv().await {
            ClientMessage::Subscribe { id: resent, .. } => assert_eq!(resent, id),
            other => panic!("expected resubscribe, got {other:?}"),
        }
        assert_eq!(handle.connections_established(), 2);

        server.send(&ServerMessage::Next {
            id,
            payload: GraphQlResponse::from_data(json!({ "game": 1 })),
        });
        assert!(matches!(sub.recv().await, Some(StreamEvent::Next(_))));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn unanswered_ping_tears_channel_down() {
        let config = test_config().with_keep_alive(Some(Duration::from_millis(30)));
        let (mut client, mut servers, _seen) = start(config);
        let handle = client.handle();

        let _sub = handle.open_stream(subscription("subscription { game }")).unwrap();
        let mut server = next_server(&mut servers).await;
        server.accept().await;
        let _ = server.recv().await;
        assert!(matches!(server.recv().await, ClientMessage::Ping { .. }));
        // No pong: the next tick gives up on this channel.

        let mut replacement = next_server(&mut servers).await;
        replacement.accept().await;
        assert!(matches!(
            replacement.recv().await,
            ClientMessage::Subscribe { .. }
        ));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn answered_pings_keep_channel() {
        let config = test_config().with_keep_alive(Some(Duration::from_millis(20)));
        let (mut client, mut servers, _seen) = start(config);
        let handle = client.handle();

        let _sub = handle.open_stream(subscription("subscription { game }")).unwrap();
        let mut server = next_server(&mut servers).await;
        server.accept().await;
        let _ = server.recv().await;
        for _ in 0..3 {
            assert!(matches!(server.recv().await, ClientMessage::Ping { .. }));
            server.send(&ServerMessage::Pong { payload: None });
        }
        assert_eq!(handle.connections_established(), 1);
        assert!(handle.is_connected());

        client.shutdown().await;
    }

    #[tokio::test]
    async fn server_ping_is_answered() {
        let (mut client, mut servers, _seen) = start(test_config());
        let handle = client.handle();

        let _sub = handle.open_stream(subscription("subscription { game }")).unwrap();
        let mut server = next_server(&mut servers).await;
        server.accept().await;
        let _ = server.recv().await;
        server.send(&ServerMessage::Ping { payload: None });
        assert!(matches!(server.recv().await, ClientMessage::Pong { .. }));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_ends_streams_and_refuses_operations() {
        let (mut client, mut servers, _seen) = start(test_config());
        let handle = client.handle();

        let mut sub = handle.open_stream(subscription("subscription { game }")).unwrap();
        let mut server = next_server(&mut servers).await;
        server.accept().await;

        client.shutdown().await;
        assert_eq!(sub.recv().await, None);
        assert!(!handle.is_connected());
        assert!(matches!(
            handle.open_stream(subscription("subscription { game }")),
            Err(BeerGameError::NotConnected)
        ));
        assert!(matches!(
            handle.game_exists("g1").await,
            Err(BeerGameError::NotConnected)
        ));
    }
}
