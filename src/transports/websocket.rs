//! WebSocket streaming channel using `tokio-tungstenite`.
//!
//! This module provides [`WebSocketTransport`], a [`Transport`] over one
//! WebSocket connection negotiated with the `graphql-transport-ws`
//! sub-protocol, and [`WebSocketConnector`], which opens a new one each time
//! the client needs to (re-)establish its streaming channel.
//!
//! # Feature gate
//!
//! This module is only available when the `transport-websocket` feature is enabled
//! (it is enabled by default).
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), beer_game_client::BeerGameError> {
//! use beer_game_client::{Transport, WebSocketTransport};
//!
//! let mut transport = WebSocketTransport::connect("ws://localhost/wsgraphql").await?;
//! transport.send(r#"{"type":"connection_init"}"#.to_string()).await?;
//!
//! if let Some(Ok(msg)) = transport.recv().await {
//!     println!("received: {msg}");
//! }
//!
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::close_codes::CloseCode;
use crate::error::BeerGameError;
use crate::protocol::SUBPROTOCOL;
use crate::transport::{Connector, Transport};

/// Type alias for the underlying WebSocket stream.
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] implementation backed by a WebSocket connection.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method is cancel-safe. Dropping the future
/// returned by `recv` before it completes will not consume or lose any messages,
/// making it safe to use inside `tokio::select!`.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

fn io_error(e: tokio_tungstenite::tungstenite::Error) -> BeerGameError {
    let kind = match &e {
        tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
        _ => std::io::ErrorKind::Other,
    };
    BeerGameError::Io(std::io::Error::new(kind, e))
}

impl WebSocketTransport {
    /// Establish a new WebSocket connection to the given URL, requesting the
    /// `graphql-transport-ws` sub-protocol.
    ///
    /// # Errors
    ///
    /// Returns [`BeerGameError::Io`] if the URL is invalid or the connection
    /// cannot be established. When the underlying error is an I/O error its
    /// [`ErrorKind`](std::io::ErrorKind) is preserved.
    pub async fn connect(url: &str) -> Result<Self, BeerGameError> {
        Self::connect_from(url, None).await
    }

    /// Like [`connect`](Self::connect), presenting `origin` in the `Origin`
    /// header the way a page served from that origin would.
    ///
    /// Servers that check the handshake origin refuse connections without one.
    ///
    /// # Errors
    ///
    /// Returns [`BeerGameError::Io`] with
    /// [`InvalidInput`](std::io::ErrorKind::InvalidInput) if `origin` is not a
    /// valid header value, or any error that [`connect`](Self::connect) may
    /// return.
    pub async fn connect_from(url: &str, origin: Option<&str>) -> Result<Self, BeerGameError> {
        tracing::debug!(url = %url, ?origin, "connecting to streaming endpoint");

        let mut request = url.into_client_request().map_err(io_error)?;
        let headers = request.headers_mut();
        headers.insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SUBPROTOCOL));
        if let Some(origin) = origin {
            let value = HeaderValue::from_str(origin).map_err(|e| {
                BeerGameError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
            })?;
            headers.insert("Origin", value);
        }

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(io_error)?;

        tracing::info!(url = %url, "streaming channel established");

        Ok(Self {
            stream,
            closed: false,
        })
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), BeerGameError> {
        if self.closed {
            return Err(BeerGameError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| BeerGameError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, BeerGameError>> {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    return Some(Err(BeerGameError::TransportReceive(e.to_string())));
                }
                None => return None,
            };

            match msg {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Close(frame) => {
                    match frame
                        .as_ref()
                        .and_then(|f| CloseCode::from_u16(u16::from(f.code)))
                    {
                        Some(code) => tracing::warn!(%code, "server closed streaming channel"),
                        None => tracing::debug!(?frame, "received WebSocket close frame"),
                    }
                    return None;
                }
                Message::Ping(_) | Message::Pong(_) => {
                    // tungstenite answers pings itself; protocol-level liveness
                    // uses graphql-transport-ws ping/pong text frames.
                }
                Message::Binary(_) => {
                    tracing::warn!("received unexpected binary WebSocket frame, skipping");
                }
                Message::Frame(_) => {
                    tracing::debug!("received raw WebSocket frame, skipping");
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), BeerGameError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| BeerGameError::TransportSend(e.to_string()))
    }
}

/// Opens [`WebSocketTransport`]s to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    origin: Option<String>,
    timeout: Duration,
}

impl WebSocketConnector {
    /// Default timeout for opening a connection.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            origin: None,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Present `origin` in the `Origin` header of every handshake.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Set the timeout for opening a connection.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, BeerGameError> {
        let transport = tokio::time::timeout(
            self.timeout,
            WebSocketTransport::connect_from(&self.url, self.origin.as_deref()),
        )
        .await
        .map_err(|_| BeerGameError::Timeout)??;
        Ok(Box::new(transport))
    }
}

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
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;

    #[test]
    fn websocket_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketTransport>();
    }

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let result = WebSocketTransport::connect("not-a-valid-url").await;
        let err = result.unwrap_err();
        assert!(matches!(err, BeerGameError::Io(_)));
    }

    #[tokio::test]
    async fn connect_fails_with_unreachable_host() {
        let result = WebSocketTransport::connect("ws://127.0.0.1:1").await;
        let err = result.unwrap_err();
        assert!(matches!(err, BeerGameError::Io(_)));
    }

    // ── Mock-stream helpers ──────────────────────────────────────────────

    /// Start a local server that accepts one connection with the
    /// `graphql-transport-ws` sub-protocol, runs `handler` on it, and returns
    /// the URL to connect to.
    async fn start_mock_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_hdr_async(
                tcp,
                |req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
                    let requested = req
                        .headers()
                        .get("Sec-WebSocket-Protocol")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default();
                    assert_eq!(requested, SUBPROTOCOL);
                    resp.headers_mut().insert(
                        "Sec-WebSocket-Protocol",
                        HeaderValue::from_static(SUBPROTOCOL),
                    );
                    Ok(resp)
                },
            )
            .await
            .unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}")
    }

    /// Start a local server that accepts one handshake and reports the
    /// `Origin` header it carried.
    async fn start_origin_server() -> (String, tokio::sync::oneshot::Receiver<Option<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (origin_tx, origin_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_hdr_async(
                tcp,
                move |req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
                    let origin = req
                        .headers()
                        .get("Origin")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let _ = origin_tx.send(origin);
                    resp.headers_mut().insert(
                        "Sec-WebSocket-Protocol",
                        HeaderValue::from_static(SUBPROTOCOL),
                    );
                    Ok(resp)
                },
            )
            .await
            .unwrap();
            ws.close(None).await.unwrap();
        });

        (format!("ws://{addr}/wsgraphql"), origin_rx)
    }

    // ── Mock-stream tests ────────────────────────────────────────────────

    #[tokio::test]
    async fn recv_receives_text_messages() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Text(r#"{"type":"connection_ack"}"#.into()))
                .await
                .unwrap();
            ws.send(Message::Text(r#"{"type":"pong"}"#.into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert_eq!(
            transport.recv().await.unwrap().unwrap(),
            r#"{"type":"connection_ack"}"#
        );
        assert_eq!(transport.recv().await.unwrap().unwrap(), r#"{"type":"pong"}"#);
    }

    #[tokio::test]
    async fn recv_returns_none_on_protocol_close() {
        let url = start_mock_server(|mut ws| async move {
            ws.close(Some(CloseFrame {
                code: WsCloseCode::from(4403),
                reason: "Forbidden".into(),
            }))
            .await
            .unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn recv_skips_binary_frames() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Binary(vec![0xDE, 0xAD].into()))
                .await
                .unwrap();
            ws.send(Message::Text("after_binary".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        let msg = transport.recv().await.unwrap().unwrap();
        assert_eq!(msg, "after_binary");
    }

    #[tokio::test]
    async fn send_after_close_returns_transport_closed() {
        let url = start_mock_server(|mut ws| async move {
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        let err = transport.send("oops".to_string()).await.unwrap_err();
        assert!(matches!(err, BeerGameError::TransportClosed));
    }

    #[tokio::test]
    async fn connector_opens_fresh_connections() {
        let url = start_mock_server(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let connector = WebSocketConnector::new(url).with_timeout(Duration::from_secs(5));
        let mut transport = connector.connect().await.unwrap();
        transport
            .send(r#"{"type":"ping"}"#.to_string())
            .await
            .unwrap();
        let echoed = transport.recv().await.unwrap().unwrap();
        assert_eq!(echoed, r#"{"type":"ping"}"#);
    }

    #[tokio::test]
    async fn connector_times_out() {
        // Non-routable address guarantees the deadline is hit.
        let connector = WebSocketConnector::new("ws://192.0.2.1:1")
            .with_origin("http://192.0.2.1")
            .with_timeout(Duration::from_millis(50));

        let err = connector.connect().await.err().unwrap();
        assert!(matches!(err, BeerGameError::Timeout));
    }

    #[tokio::test]
    async fn connector_presents_origin_in_handshake() {
        let (url, origin) = start_origin_server().await;

        let connector = WebSocketConnector::new(url).with_origin("http://localhost:8080");
        assert_eq!(connector.origin(), Some("http://localhost:8080"));
        let _transport = connector.connect().await.unwrap();

        assert_eq!(
            origin.await.unwrap().as_deref(),
            Some("http://localhost:8080")
        );
    }

    #[tokio::test]
    async fn plain_connect_sends_no_origin() {
        let (url, origin) = start_origin_server().await;
        let _transport = WebSocketTransport::connect(&url).await.unwrap();
        assert_eq!(origin.await.unwrap(), None);
    }

    #[tokio::test]
    async fn invalid_origin_is_rejected_before_connecting() {
        let err = WebSocketTransport::connect_from("ws://127.0.0.1:1", Some("bad\norigin"))
            .await
            .unwrap_err();
        assert!(
            matches!(err, BeerGameError::Io(ref io) if io.kind() == std::io::ErrorKind::InvalidInput)
        );
    }
}
