#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for beer game client integration tests.
//!
//! Provides a channel-backed loopback [`Transport`], a [`Connector`] that
//! hands the server half of every new connection to the test, a recording
//! [`RequestChannel`], and builders for game payload JSON.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use beer_game_client::protocol::{ClientMessage, GraphQlRequest, GraphQlResponse, ServerMessage};
use beer_game_client::{
    BeerGameError, ClientConfig, Connector, GraphQlClient, RequestChannel, Transport,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;

/// Upper bound for any single wait in a test.
pub const WAIT: Duration = Duration::from_secs(2);

// ── Loopback streaming channel ──────────────────────────────────────

/// Client half of a loopback connection.
pub struct LoopbackTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, message: String) -> Result<(), BeerGameError> {
        self.tx
            .send(message)
            .map_err(|e| BeerGameError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, BeerGameError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), BeerGameError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// Server half of a loopback connection, driven by the test.
pub struct ServerEnd {
    rx: mpsc::UnboundedReceiver<String>,
    tx: mpsc::UnboundedSender<String>,
    /// Whether the client closed its half.
    pub closed: Arc<AtomicBool>,
}

impl ServerEnd {
    /// Next frame from the client.
    pub async fn recv(&mut self) -> ClientMessage {
        let text = tokio::time::timeout(WAIT, self.rx.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client dropped the channel");
        serde_json::from_str(&text).expect("client frame is not a valid message")
    }

    /// Next frame from the client, if one arrives within `within`.
    pub async fn try_recv(&mut self, within: Duration) -> Option<ClientMessage> {
        match tokio::time::timeout(within, self.rx.recv()).await {
            Ok(Some(text)) => Some(serde_json::from_str(&text).unwrap()),
            _ => None,
        }
    }

    pub fn send(&self, msg: &ServerMessage) {
        self.tx.send(serde_json::to_string(msg).unwrap()).unwrap();
    }

    pub fn send_raw(&self, text: &str) {
        self.tx.send(text.to_string()).unwrap();
    }

    /// Complete the `connection_init` handshake.
    pub async fn accept(&mut self) {
        let msg = self.recv().await;
        assert!(
            matches!(msg, ClientMessage::ConnectionInit { .. }),
            "expected connection_init, got {msg:?}"
        );
        self.send(&ServerMessage::ConnectionAck { payload: None });
    }

    /// Expect a `subscribe` frame and return its id and request.
    pub async fn expect_subscribe(&mut self) -> (String, GraphQlRequest) {
        match self.recv().await {
            ClientMessage::Subscribe { id, payload } => (id, payload),
            other => panic!("expected subscribe, got {other:?}"),
        }
    }

    /// Expect a `complete` frame and return its id.
    pub async fn expect_complete(&mut self) -> String {
        match self.recv().await {
            ClientMessage::Complete { id } => id,
            other => panic!("expected complete, got {other:?}"),
        }
    }

    /// Push `data` as the next result of operation `id`.
    pub fn push(&self, id: &str, data: Value) {
        self.send(&ServerMessage::Next {
            id: id.to_string(),
            payload: GraphQlResponse::from_data(data),
        });
    }
}

/// Connector producing loopback connections.
pub struct LoopbackConnector {
    servers: mpsc::UnboundedSender<ServerEnd>,
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, BeerGameError> {
        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        self.servers
            .send(ServerEnd {
                rx: server_rx,
                tx: server_tx,
                closed: Arc::clone(&closed),
            })
            .map_err(|_| BeerGameError::TransportClosed)?;
        Ok(Box::new(LoopbackTransport {
            tx: client_tx,
            rx: client_rx,
            closed,
        }))
    }
}

/// Receives the server half of each connection the client opens.
pub struct Servers {
    rx: mpsc::UnboundedReceiver<ServerEnd>,
}

impl Servers {
    /// Wait for the client to open a connection.
    pub async fn next(&mut self) -> ServerEnd {
        tokio::time::timeout(WAIT, self.rx.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }

    /// Wait for a connection and complete its handshake.
    pub async fn accept(&mut self) -> ServerEnd {
        let mut server = self.next().await;
        server.accept().await;
        server
    }

    /// Whether a connection is already waiting.
    pub fn has_pending(&mut self) -> bool {
        match self.rx.try_recv() {
            Ok(_) => true,
            Err(_) => false,
        }
    }
}

// ── Recording request channel ───────────────────────────────────────

/// A [`RequestChannel`] that records every request and answers from a
/// table keyed by operation name.
#[derive(Clone, Default)]
pub struct RecordingRequests {
    pub seen: Arc<StdMutex<Vec<GraphQlRequest>>>,
    responses: Arc<StdMutex<HashMap<String, Result<GraphQlResponse, String>>>>,
}

impl RecordingRequests {
    /// Answer operation `name` with `data`.
    pub fn respond(&self, name: &str, data: Value) {
        self.responses
            .lock()
            .unwrap()
            .insert(name.to_string(), Ok(GraphQlResponse::from_data(data)));
    }

    /// Fail operation `name` at the channel level.
    pub fn fail(&self, name: &str, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(name.to_string(), Err(message.to_string()));
    }

    /// Operation names seen so far, in order.
    pub fn names(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.operation_name.clone().unwrap_or_default())
            .collect()
    }

    /// Variables of every request named `name`.
    pub fn variables_of(&self, name: &str) -> Vec<Value> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.operation_name.as_deref() == Some(name))
            .map(|r| r.variables.clone().unwrap_or(Value::Null))
            .collect()
    }

    /// Wait until at least `count` requests named `name` were seen.
    pub async fn wait_for(&self, name: &str, count: usize) {
        let deadline = tokio::time::Instant::now() + WAIT;
        while self.variables_of(name).len() < count {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {count} `{name}` request(s); saw {:?}",
                self.names()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl RequestChannel for RecordingRequests {
    async fn execute(&self, request: GraphQlRequest) -> Result<GraphQlResponse, BeerGameError> {
        let name = request.operation_name.clone().unwrap_or_default();
        self.seen.lock().unwrap().push(request);
        match self.responses.lock().unwrap().get(&name) {
            Some(Ok(response)) => Ok(response.clone()),
            Some(Err(message)) => Err(BeerGameError::Http(message.clone())),
            None => Ok(GraphQlResponse::from_data(json!({}))),
        }
    }
}

// ── Client setup ────────────────────────────────────────────────────

/// Fast-failing configuration without keep-alive.
pub fn test_config() -> ClientConfig {
    ClientConfig::new("http://test/graphql", "ws://test/wsgraphql")
        .with_keep_alive(None)
        .with_reconnect_delay(Duration::from_millis(10))
        .with_connection_ack_timeout(Duration::from_secs(1))
}

/// Start a client on loopback channels.
pub fn start_client(config: ClientConfig) -> (GraphQlClient, Servers, RecordingRequests) {
    let (servers_tx, servers_rx) = mpsc::unbounded_channel();
    let requests = RecordingRequests::default();
    requests.respond(
        "Roles",
        json!({ "gameRoles": [
            { "name": "Retailer", "value": 1 },
            { "name": "Wholesaler", "value": 2 },
            { "name": "Distributor", "value": 3 },
            { "name": "Factory", "value": 4 },
        ]}),
    );
    let client = GraphQlClient::start(
        LoopbackConnector {
            servers: servers_tx,
        },
        requests.clone(),
        config,
    );
    (client, Servers { rx: servers_rx }, requests)
}

// ── JSON builders ───────────────────────────────────────────────────

/// A player state with `weeks` entries in every history series.
pub fn player_state_json(id: &str, role: i64, outgoing: i64, weeks: usize) -> Value {
    let series: Vec<i64> = (1..=weeks as i64).collect();
    json!({
        "player": { "id": id, "name": format!("Player {id}") },
        "role": { "name": format!("Role {role}"), "value": role },
        "incoming": 4,
        "outgoing": outgoing,
        "stock": 12,
        "backlog": 0,
        "lastsent": 4,
        "pending0": 4,
        "outstanding": 8,
        "costs": 6,
        "incomingprev": series,
        "outgoingprev": series,
        "stockbackprev": series,
        "deliveredprev": series,
        "costprev": series,
    })
}

/// `{ "game": ... }` with the given phase and `(id, role, outgoing)` players.
pub fn game_json(phase: &str, players: &[(&str, i64, i64)]) -> Value {
    let states: Vec<Value> = players
        .iter()
        .map(|(id, role, outgoing)| player_state_json(id, *role, *outgoing, 2))
        .collect();
    let roster: Vec<Value> = players
        .iter()
        .map(|(id, _, _)| json!({ "id": id, "name": format!("Player {id}") }))
        .collect();
    json!({
        "game": {
            "id": "g1",
            "week": 2,
            "lastweek": 20,
            "totalcustomer": 40,
            "holiday": 0,
            "settings": [{ "name": "maxweeks", "value": 20 }],
            "players": roster,
            "state": { "name": phase },
            "playerState": states,
        }
    })
}

/// `{ "playerState": ... }` for a single player.
pub fn player_json(id: &str, role: i64, outgoing: i64, weeks: usize) -> Value {
    json!({ "playerState": player_state_json(id, role, outgoing, weeks) })
}
