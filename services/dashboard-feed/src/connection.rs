//! Reconnecting socket transport
//!
//! A [`Connection`] owns one background task that connects, reads frames and
//! reconnects with exponential backoff. Everything it observes is delivered
//! as [`TransportEvent`]s on a single channel, in the order it happened on
//! the network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TransportConfig;
use crate::io::{FrameReader, FrameWriter, SocketConnector};

/// Lifecycle and data events observed on the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A socket was (re)established
    Opened,
    /// A text frame arrived
    Frame(String),
    /// The socket went away; `terminal` means no further reconnects
    Closed { reason: String, terminal: bool },
}

type WriterSlot = Arc<Mutex<Option<Box<dyn FrameWriter>>>>;

/// Handle to a reconnecting socket
#[derive(Clone)]
pub struct Connection {
    url: Arc<str>,
    writer: WriterSlot,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Connection {
    /// Start connecting in the background
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(
        config: &TransportConfig,
        url: impl Into<String>,
        connector: Arc<dyn SocketConnector>,
    ) -> (Connection, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let connection = Connection {
            url: Arc::from(url.into()),
            writer: Arc::new(Mutex::new(None)),
            open: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        };

        tokio::spawn(run(
            config.clone(),
            connection.clone(),
            connector,
            events,
        ));

        (connection, receiver)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Send a text frame if the socket is open
    ///
    /// Returns `false` when the frame was dropped because no socket is open
    /// or the write failed.
    pub async fn send(&self, text: &str) -> bool {
        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            debug!("Socket not open, dropping frame ({} bytes)", text.len());
            return false;
        };

        match writer.send_frame(text).await {
            Ok(()) => {
                debug!("Sent frame: {}", text);
                true
            }
            Err(e) => {
                debug!("Failed to send frame: {}", e);
                false
            }
        }
    }

    /// Close the socket and stop reconnecting
    ///
    /// The event stream ends with `Closed { terminal: true }`.
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            debug!("Closing connection to {}", self.url);
            self.cancel.cancel();
        }
    }

    async fn take_writer(&self) {
        self.open.store(false, Ordering::SeqCst);
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.close().await {
                debug!("Error closing socket writer: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.url)
            .field("open", &self.is_open())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Why the reader stopped
enum ReadEnd {
    Cancelled,
    Lost(String),
}

async fn run(
    config: TransportConfig,
    connection: Connection,
    connector: Arc<dyn SocketConnector>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let timeout = config.connection_timeout();
    let max_retries = config.reconnect.max_retries;
    let mut failures = 0u32;

    let reason = loop {
        debug!("Connecting to {}", connection.url);
        let attempt = tokio::select! {
            result = connector.connect(&connection.url, timeout) => result,
            _ = connection.cancel.cancelled() => break "Closed by client".to_string(),
        };

        match attempt {
            Ok(pair) => {
                failures = 0;
                *connection.writer.lock().await = Some(pair.writer);
                connection.open.store(true, Ordering::SeqCst);
                info!("Connected to {}", connection.url);

                if events.send(TransportEvent::Opened).is_err() {
                    break "Event receiver dropped".to_string();
                }

                let end = read_frames(pair.reader, &events, &connection.cancel).await;
                connection.take_writer().await;

                match end {
                    ReadEnd::Cancelled => break "Closed by client".to_string(),
                    ReadEnd::Lost(reason) => {
                        info!("Connection to {} lost: {}", connection.url, reason);
                        let closed = TransportEvent::Closed {
                            reason,
                            terminal: false,
                        };
                        if events.send(closed).is_err() {
                            break "Event receiver dropped".to_string();
                        }
                    }
                }
            }
            Err(e) => {
                failures += 1;
                debug!("Connection attempt {} failed: {}", failures, e);
                if failures > max_retries {
                    warn!(
                        "Giving up on {}: max retries ({}) exceeded",
                        connection.url, max_retries
                    );
                    break format!("Max retries ({}) exceeded", max_retries);
                }
            }
        }

        let delay = config.reconnect.backoff(failures);
        debug!("Reconnecting to {} in {:?}", connection.url, delay);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = connection.cancel.cancelled() => break "Closed by client".to_string(),
        }
    };

    connection.take_writer().await;
    connection.cancel.cancel();
    debug!("Connection to {} finished: {}", connection.url, reason);
    let _ = events.send(TransportEvent::Closed {
        reason,
        terminal: true,
    });
}

async fn read_frames(
    mut reader: Box<dyn FrameReader>,
    events: &mpsc::UnboundedSender<TransportEvent>,
    cancel: &CancellationToken,
) -> ReadEnd {
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ReadEnd::Cancelled,
            frame = reader.next_frame() => frame,
        };

        match frame {
            Ok(Some(text)) => {
                if events.send(TransportEvent::Frame(text)).is_err() {
                    cancel.cancel();
                    return ReadEnd::Cancelled;
                }
            }
            Ok(None) => return ReadEnd::Lost("Connection closed by server".to_string()),
            Err(e) => return ReadEnd::Lost(e.to_string()),
        }
    }
}
