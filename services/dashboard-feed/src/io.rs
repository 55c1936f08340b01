//! I/O traits and implementations for the dashboard feed
//!
//! This module provides trait abstractions for the WebSocket transport and
//! for HTTP requests. These traits enable mockall-based testing without
//! requiring actual network operations.
//!
//! The default implementations use tokio-tungstenite and reqwest.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::{FeedError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Socket pair containing a frame reader and writer
pub struct SocketPair {
    /// Reader for receiving frames
    pub reader: Box<dyn FrameReader>,
    /// Writer for sending frames
    pub writer: Box<dyn FrameWriter>,
}

// ============================================================================
// FrameReader trait and implementations
// ============================================================================

/// Trait for reading text frames from a socket
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait FrameReader: Send {
    /// Read the next text frame
    ///
    /// Returns `Ok(Some(text))` for a frame, `Ok(None)` once the socket is
    /// closed, or an error if reading failed.
    async fn next_frame(&mut self) -> Result<Option<String>>;
}

/// WebSocket implementation of FrameReader
pub struct WsFrameReader {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl FrameReader for WsFrameReader {
    async fn next_frame(&mut self) -> Result<Option<String>> {
        loop {
            match self.stream.next().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(FeedError::Connection(format!("Read error: {}", e))),
                Some(Ok(Message::Text(text))) => return Ok(Some(text.to_string())),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => debug!("Ignoring non-UTF-8 binary frame ({} bytes)", bytes.len()),
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!("Close frame received: {:?}", frame);
                    return Ok(None);
                }
                // ping/pong are answered by tungstenite
                Some(Ok(_)) => {}
            }
        }
    }
}

// ============================================================================
// FrameWriter trait and implementations
// ============================================================================

/// Trait for writing text frames to a socket
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait FrameWriter: Send {
    /// Send one text frame
    async fn send_frame(&mut self, text: &str) -> Result<()>;

    /// Close the socket
    async fn close(&mut self) -> Result<()>;
}

/// WebSocket implementation of FrameWriter
pub struct WsFrameWriter {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameWriter for WsFrameWriter {
    async fn send_frame(&mut self, text: &str) -> Result<()> {
        self.sink
            .send(Message::text(text.to_string()))
            .await
            .map_err(|e| FeedError::Connection(format!("Send failed: {}", e)))
    }

    async fn close(&mut self) -> Result<()> {
        self.sink
            .close()
            .await
            .map_err(|e| FeedError::Connection(format!("Close failed: {}", e)))
    }
}

// ============================================================================
// SocketConnector trait and implementations
// ============================================================================

/// Trait for opening sockets
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait SocketConnector: Send + Sync {
    /// Open a socket to the given URL
    async fn connect(&self, url: &str, timeout: Duration) -> Result<SocketPair>;
}

/// tokio-tungstenite implementation of SocketConnector
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SocketConnector for WsConnector {
    async fn connect(&self, url: &str, timeout: Duration) -> Result<SocketPair> {
        debug!("Connecting to {} with timeout {:?}", url, timeout);

        let (stream, _response) =
            tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url))
                .await
                .map_err(|_| FeedError::Timeout(format!("Connection to {} timed out", url)))?
                .map_err(|e| {
                    FeedError::Connection(format!("Failed to connect to {}: {}", url, e))
                })?;

        debug!("WebSocket established to {}", url);

        let (sink, stream) = stream.split();
        Ok(SocketPair {
            reader: Box::new(WsFrameReader { stream }),
            writer: Box::new(WsFrameWriter { sink }),
        })
    }
}

// ============================================================================
// In-memory sockets
// ============================================================================

/// Connector that hands out in-process sockets
///
/// Every successful `connect` yields a [`ServerSocket`] from the paired
/// [`MemoryListener`]. Useful for driving the feed without a network.
#[derive(Debug)]
pub struct MemoryConnector {
    accepted: mpsc::UnboundedSender<ServerSocket>,
    refusing: AtomicBool,
    attempts: AtomicU32,
}

impl MemoryConnector {
    pub fn new() -> (Arc<MemoryConnector>, MemoryListener) {
        let (accepted, incoming) = mpsc::unbounded_channel();
        let connector = MemoryConnector {
            accepted,
            refusing: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
        };
        (Arc::new(connector), MemoryListener { incoming })
    }

    /// Make subsequent connection attempts fail
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Number of connection attempts so far, successful or not
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SocketConnector for MemoryConnector {
    async fn connect(&self, url: &str, _timeout: Duration) -> Result<SocketPair> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refusing.load(Ordering::SeqCst) {
            return Err(FeedError::Connection(format!("{} refused connection", url)));
        }

        let (to_client, client_rx) = mpsc::unbounded_channel();
        let (client_tx, from_client) = mpsc::unbounded_channel();
        let server = ServerSocket {
            to_client: Some(to_client),
            from_client,
        };
        self.accepted
            .send(server)
            .map_err(|_| FeedError::Connection(format!("No listener for {}", url)))?;

        Ok(SocketPair {
            reader: Box::new(MemoryFrameReader { rx: client_rx }),
            writer: Box::new(MemoryFrameWriter { tx: Some(client_tx) }),
        })
    }
}

/// Accepts sockets opened through a [`MemoryConnector`]
#[derive(Debug)]
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<ServerSocket>,
}

impl MemoryListener {
    /// Wait for the next client connection
    pub async fn accept(&mut self) -> Option<ServerSocket> {
        self.incoming.recv().await
    }
}

/// Server end of an in-memory socket
#[derive(Debug)]
pub struct ServerSocket {
    to_client: Option<mpsc::UnboundedSender<String>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl ServerSocket {
    /// Push a frame to the client; false once either side has closed
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.to_client
            .as_ref()
            .is_some_and(|tx| tx.send(text.into()).is_ok())
    }

    /// Next frame written by the client, `None` once the client closed
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Frame written by the client, if one is already queued
    pub fn try_recv(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }

    /// Close the socket from the server side
    pub fn close(&mut self) {
        self.to_client = None;
    }
}

struct MemoryFrameReader {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl FrameReader for MemoryFrameReader {
    async fn next_frame(&mut self) -> Result<Option<String>> {
        Ok(self.rx.recv().await)
    }
}

struct MemoryFrameWriter {
    tx: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl FrameWriter for MemoryFrameWriter {
    async fn send_frame(&mut self, text: &str) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| FeedError::Connection("Socket closed".to_string()))?;
        tx.send(text.to_string())
            .map_err(|_| FeedError::Connection("Peer closed".to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

// ============================================================================
// HttpClient trait and implementations
// ============================================================================

/// HTTP response from a request
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Abstraction over HTTP client for dependency injection
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait HttpClient: Send + Sync {
    /// Send a GET request to the given URL
    async fn get(&self, url: &str) -> Result<HttpResponse>;
}

/// Production HTTP client using reqwest
#[derive(Default)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(&self, url: &str) -> Result<HttpResponse> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FeedError::Http(format!("GET {} failed: {}", url, e)))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| FeedError::Http(format!("Reading response body: {}", e)))?;

        debug!("GET {} -> {} ({} bytes)", url, status, body.len());
        Ok(HttpResponse { status, body })
    }
}
