//! Transport layer for the terminal link.
//!
//! A [`Connector`] knows how to reach the terminal and hands out one live
//! [`FrameTransport`] per successful connection. Frames are whole JSON text
//! messages; framing is the transport's business (WebSocket messages or
//! newline-delimited lines over TCP).

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

use super::error::{Result, TpeError};

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;
const DEFAULT_TCP_PORT: u16 = 8787;
/// Longest newline-delimited frame accepted over raw TCP.
const MAX_LINE_LENGTH: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// One established connection to the terminal.
#[async_trait]
pub trait FrameTransport: Send {
    /// Write one frame.
    async fn send(&mut self, frame: &str) -> Result<()>;

    /// Next inbound frame. `None` once the peer has closed the link.
    async fn recv(&mut self) -> Option<Result<String>>;

    /// Close the link. Errors are irrelevant at this point and swallowed.
    async fn close(&mut self);

    fn description(&self) -> String;
}

/// Opens fresh connections to the terminal; called again on every reconnect.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn FrameTransport>>;

    /// Human-readable description of the connection target.
    fn description(&self) -> String;
}

// ---------------------------------------------------------------------------
// WebSocket transport
// ---------------------------------------------------------------------------

/// Text-frame WebSocket link (the terminal bridge's native interface).
pub struct WebSocketTransport {
    url: String,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FrameTransport for WebSocketTransport {
    async fn send(&mut self, frame: &str) -> Result<()> {
        debug!("WS TX ({} bytes)", frame.len());
        self.stream
            .send(Message::Text(frame.to_owned().into()))
            .await
            .map_err(|e| TpeError::Transport(format!("WebSocket send: {e}")))
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => {
                    debug!("WS RX ({} bytes)", text.len());
                    return Some(Ok(text.as_str().to_owned()));
                }
                Ok(Message::Binary(bytes)) => {
                    debug!("WS RX binary ({} bytes)", bytes.len());
                    return Some(Ok(String::from_utf8_lossy(&bytes).into_owned()));
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "WS close frame received");
                    return None;
                }
                // Ping/pong are answered by tungstenite itself.
                Ok(_) => continue,
                Err(e) => {
                    return Some(Err(TpeError::Transport(format!("WebSocket read: {e}"))))
                }
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
        info!("WebSocket {} closed", self.url);
    }

    fn description(&self) -> String {
        format!("WebSocket({})", self.url)
    }
}

/// Connects to a `ws://` / `wss://` endpoint.
pub struct WebSocketConnector {
    url: String,
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(url: &str, connect_timeout_ms: u64) -> Self {
        Self {
            url: url.to_string(),
            connect_timeout: Duration::from_millis(connect_timeout_ms),
        }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Box<dyn FrameTransport>> {
        info!("Connecting WebSocket to {}", self.url);
        let (stream, _response) =
            tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
                .await
                .map_err(|_| {
                    TpeError::Transport(format!(
                        "WebSocket connect to {} timed out after {}ms",
                        self.url,
                        self.connect_timeout.as_millis()
                    ))
                })?
                .map_err(|e| {
                    TpeError::Transport(format!("WebSocket connect to {} failed: {e}", self.url))
                })?;
        Ok(Box::new(WebSocketTransport {
            url: self.url.clone(),
            stream,
        }))
    }

    fn description(&self) -> String {
        format!("WebSocket({})", self.url)
    }
}

// ---------------------------------------------------------------------------
// Network (TCP) transport
// ---------------------------------------------------------------------------

/// Newline-delimited JSON over a plain TCP socket.
pub struct TcpTransport {
    addr: String,
    framed: Framed<TcpStream, LinesCodec>,
}

#[async_trait]
impl FrameTransport for TcpTransport {
    async fn send(&mut self, frame: &str) -> Result<()> {
        debug!("TCP TX ({} bytes)", frame.len());
        self.framed
            .send(frame)
            .await
            .map_err(|e| TpeError::Transport(format!("TCP write: {e}")))
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        // Framed yields one `None` after a decode error before reading on.
        let mut after_decode_error = false;
        loop {
            let item = match self.framed.next().await {
                Some(item) => item,
                None if after_decode_error => {
                    after_decode_error = false;
                    continue;
                }
                None => return None,
            };
            after_decode_error = false;
            match item {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => {
                    debug!("TCP RX ({} bytes)", line.len());
                    return Some(Ok(line));
                }
                // The codec drops the rest of the line and resyncs on the next newline.
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!("TCP RX line over {MAX_LINE_LENGTH} bytes discarded");
                    after_decode_error = true;
                }
                Err(LinesCodecError::Io(e)) => {
                    return Some(Err(TpeError::Transport(format!("TCP read: {e}"))))
                }
            }
        }
    }

    async fn close(&mut self) {
        let _ = <Framed<TcpStream, LinesCodec> as SinkExt<&str>>::close(&mut self.framed).await;
        info!("TCP disconnected from {}", self.addr);
    }

    fn description(&self) -> String {
        format!("TCP({})", self.addr)
    }
}

/// Connects to `host:port` over TCP.
pub struct TcpConnector {
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(host: &str, port: u16, connect_timeout_ms: u64) -> Self {
        Self {
            host: host.to_string(),
            port,
            connect_timeout: Duration::from_millis(connect_timeout_ms),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Box<dyn FrameTransport>> {
        let addr = format!("{}:{}", self.host, self.port);
        info!("Connecting TCP to {addr}");
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| TpeError::Transport(format!("TCP connect to {addr} timed out")))?
            .map_err(|e| TpeError::Transport(format!("TCP connect to {addr} failed: {e}")))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("TCP_NODELAY not set on {addr}: {e}");
        }

        Ok(Box::new(TcpTransport {
            addr,
            framed: Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)),
        }))
    }

    fn description(&self) -> String {
        format!("TCP({}:{})", self.host, self.port)
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Create a connector from connection type and details JSON.
pub fn create_connector(
    connection_type: &str,
    details: &serde_json::Value,
) -> Result<Box<dyn Connector>> {
    let timeout = details
        .get("connectTimeoutMs")
        .and_then(|v| v.as_u64())
        .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS);

    match connection_type {
        "websocket" | "ws" => {
            let url = details
                .get("url")
                .and_then(|v| v.as_str())
                .ok_or_else(|| TpeError::Config("Missing 'url' in connection details".into()))?;
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(TpeError::Config(format!(
                    "WebSocket url must start with ws:// or wss://, got '{url}'"
                )));
            }
            Ok(Box::new(WebSocketConnector::new(url, timeout)))
        }
        "network" | "tcp" => {
            let host = details
                .get("ip")
                .and_then(|v| v.as_str())
                .ok_or_else(|| TpeError::Config("Missing 'ip' in connection details".into()))?;
            let port = match details.get("port").and_then(|v| v.as_u64()) {
                None => DEFAULT_TCP_PORT,
                Some(p) => u16::try_from(p)
                    .map_err(|_| TpeError::Config(format!("Invalid TCP port: {p}")))?,
            };
            Ok(Box::new(TcpConnector::new(host, port, timeout)))
        }
        other => Err(TpeError::Config(format!(
            "Unknown connection type: '{other}'. Supported: websocket, network"
        ))),
    }
}

// ---------------------------------------------------------------------------
// In-memory connector for tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    /// Terminal side of one accepted mock connection. Dropping it closes the link.
    pub(crate) struct MockTerminal {
        pub sent: mpsc::UnboundedReceiver<String>,
        reply: mpsc::UnboundedSender<String>,
    }

    impl MockTerminal {
        pub async fn next_frame(&mut self) -> String {
            self.sent.recv().await.expect("adapter dropped the link")
        }

        pub fn reply(&self, frame: &str) {
            self.reply.send(frame.to_string()).expect("adapter dropped the link");
        }
    }

    /// Test-side controls for a [`MockConnector`].
    pub(crate) struct MockHandle {
        accepted: mpsc::UnboundedReceiver<MockTerminal>,
        refuse: Arc<AtomicBool>,
        attempts: Arc<AtomicUsize>,
    }

    impl MockHandle {
        pub async fn accept(&mut self) -> MockTerminal {
            self.accepted.recv().await.expect("connector dropped")
        }

        pub fn refuse_connections(&self, refuse: bool) {
            self.refuse.store(refuse, Ordering::SeqCst);
        }

        pub fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    pub(crate) struct MockConnector {
        accepted: mpsc::UnboundedSender<MockTerminal>,
        refuse: Arc<AtomicBool>,
        attempts: Arc<AtomicUsize>,
    }

    impl MockConnector {
        pub fn new() -> (Self, MockHandle) {
            let (tx, rx) = mpsc::unbounded_channel();
            let refuse = Arc::new(AtomicBool::new(false));
            let attempts = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    accepted: tx,
                    refuse: refuse.clone(),
                    attempts: attempts.clone(),
                },
                MockHandle {
                    accepted: rx,
                    refuse,
                    attempts,
                },
            )
        }
    }

    struct MockLink {
        to_terminal: mpsc::UnboundedSender<String>,
        from_terminal: mpsc::UnboundedReceiver<String>,
    }

    #[async_trait]
    impl FrameTransport for MockLink {
        async fn send(&mut self, frame: &str) -> Result<()> {
            self.to_terminal
                .send(frame.to_string())
                .map_err(|_| TpeError::Transport("mock peer gone".into()))
        }

        async fn recv(&mut self) -> Option<Result<String>> {
            self.from_terminal.recv().await.map(Ok)
        }

        async fn close(&mut self) {
            self.from_terminal.close();
        }

        fn description(&self) -> String {
            "Mock".into()
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(&self) -> Result<Box<dyn FrameTransport>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.refuse.load(Ordering::SeqCst) {
                return Err(TpeError::Transport("connection refused".into()));
            }
            let (to_terminal, sent) = mpsc::unbounded_channel();
            let (reply, from_terminal) = mpsc::unbounded_channel();
            self.accepted
                .send(MockTerminal { sent, reply })
                .map_err(|_| TpeError::Transport("mock handle dropped".into()))?;
            Ok(Box::new(MockLink {
                to_terminal,
                from_terminal,
            }))
        }

        fn description(&self) -> String {
            "Mock".into()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
