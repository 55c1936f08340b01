//! Feed client: joins the transport, the session handshake and the router
//!
//! One dispatch task owns the session and the subscription list and handles
//! transport events and commands one at a time. Handshake and routing
//! therefore never race, and subscriptions are replayed exactly once per
//! authentication.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::config::TransportConfig;
use crate::connection::{Connection, TransportEvent};
use crate::envelope::Notification;
use crate::error::{FeedError, Result};
use crate::io::SocketConnector;
use crate::router::Router;
use crate::session::{HandshakeOutcome, Session};
use crate::subscription::{Subscription, HISTORICAL_STATUS};

enum Command {
    Subscribe {
        subscription: Subscription,
        ack: oneshot::Sender<()>,
    },
}

/// Handle to a running feed
#[derive(Debug)]
pub struct FeedClient {
    commands: mpsc::UnboundedSender<Command>,
    session: watch::Receiver<Session>,
    connection: Connection,
    bus: EventBus,
    finished: CancellationToken,
}

impl FeedClient {
    /// Open the socket and start the dispatch task
    pub fn start(
        config: &TransportConfig,
        url: impl Into<String>,
        connector: Arc<dyn SocketConnector>,
        bus: EventBus,
    ) -> FeedClient {
        let (connection, events) = Connection::open(config, url, connector);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (session_tx, session) = watch::channel(Session::default());
        let finished = CancellationToken::new();

        let dispatcher = Dispatcher {
            connection: connection.clone(),
            router: Router::new(bus.clone()),
            subscriptions: Vec::new(),
            session: Session::default(),
            session_tx,
        };
        tokio::spawn(dispatcher.run(command_rx, events, finished.clone()));

        FeedClient {
            commands,
            session,
            connection,
            bus,
            finished,
        }
    }

    /// Register a subscription
    ///
    /// Identical subscriptions are registered once. If the session is already
    /// authenticated the request is sent right away; otherwise it goes out
    /// with the next identity token. Returns once the dispatch task has bound
    /// the subscription's channel.
    ///
    /// Envelopes carry no page identifier, so with several service
    /// subscriptions only the first one's channel receives data; status
    /// subscriptions get the envelopes whose `dataType` names them.
    pub async fn subscribe(&self, subscription: Subscription) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(Command::Subscribe { subscription, ack })
            .map_err(|_| FeedError::Closed("feed client has stopped".to_string()))?;
        done.await
            .map_err(|_| FeedError::Closed("feed client has stopped".to_string()))
    }

    /// Current handshake state
    pub fn session(&self) -> Session {
        *self.session.borrow()
    }

    /// Observe handshake state changes
    pub fn watch_session(&self) -> watch::Receiver<Session> {
        self.session.clone()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn is_closed(&self) -> bool {
        self.finished.is_cancelled()
    }

    /// Close the socket and wait for the dispatch task to finish
    pub async fn close(&self) {
        self.connection.close();
        self.closed().await;
    }

    /// Wait until the dispatch task has finished
    ///
    /// Happens after `close()` or once the transport has given up.
    pub async fn closed(&self) {
        self.finished.cancelled().await;
    }
}

/// Ask the backend once whether it is still loading historical data
///
/// Opens a dedicated connection subscribed only to `historicalStatus`, waits
/// for the first status notification and closes the connection again.
pub async fn probe_historical_status(
    config: &TransportConfig,
    url: impl Into<String>,
    connector: Arc<dyn SocketConnector>,
    timeout: Duration,
) -> Result<Notification> {
    let bus = EventBus::new(8);
    let mut status = bus.subscribe(HISTORICAL_STATUS).await;
    let client = FeedClient::start(config, url, connector, bus);
    client.subscribe(Subscription::HistoricalStatus).await?;

    let outcome = tokio::select! {
        received = tokio::time::timeout(timeout, status.recv()) => match received {
            Ok(Ok(notification)) => Ok(notification),
            Ok(Err(e)) => Err(FeedError::Closed(format!("status channel: {}", e))),
            Err(_) => Err(FeedError::Timeout(format!(
                "No historical status within {:?}",
                timeout
            ))),
        },
        _ = client.closed() => Err(FeedError::Closed(
            "connection gave up before a status arrived".to_string(),
        )),
    };

    client.close().await;
    outcome
}

struct Dispatcher {
    connection: Connection,
    router: Router,
    subscriptions: Vec<Subscription>,
    session: Session,
    session_tx: watch::Sender<Session>,
}

impl Dispatcher {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        finished: CancellationToken,
    ) {
        let mut accepting_commands = true;

        loop {
            tokio::select! {
                command = commands.recv(), if accepting_commands => match command {
                    Some(Command::Subscribe { subscription, ack }) => {
                        self.subscribe(subscription).await;
                        let _ = ack.send(());
                    }
                    None => {
                        debug!("All feed client handles dropped, closing connection");
                        accepting_commands = false;
                        self.connection.close();
                    }
                },
                event = events.recv() => match event {
                    Some(event) => {
                        if !self.handle(event).await {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        self.set_session(Session::Unauthenticated);
        finished.cancel();
        debug!("Feed dispatch task finished");
    }

    /// Handle one transport event; false once the transport is finished
    async fn handle(&mut self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Opened => {
                self.set_session(self.session.reset());
                true
            }
            TransportEvent::Frame(raw) => {
                self.on_frame(&raw).await;
                true
            }
            TransportEvent::Closed { reason, terminal } => {
                self.set_session(self.session.reset());
                if terminal {
                    info!("Feed finished: {}", reason);
                    false
                } else {
                    debug!("Socket closed ({}), waiting for reconnect", reason);
                    true
                }
            }
        }
    }

    async fn on_frame(&mut self, raw: &str) {
        let (session, outcome) = self.session.accept(raw);
        match outcome {
            HandshakeOutcome::Authenticated(client_id) => {
                info!("Session established as {}", client_id);
                self.set_session(session);
                self.flush(client_id).await;
            }
            HandshakeOutcome::Ignored => {}
            HandshakeOutcome::NotIdentity => {
                self.router.route(raw).await;
            }
        }
    }

    async fn subscribe(&mut self, subscription: Subscription) {
        if self.subscriptions.contains(&subscription) {
            debug!("Already subscribed to {}", subscription);
            return;
        }

        self.router.bind(&subscription);
        if let Some(client_id) = self.session.client_id() {
            self.send_request(&subscription, client_id).await;
        }
        self.subscriptions.push(subscription);
    }

    async fn flush(&self, client_id: uuid::Uuid) {
        debug!("Sending {} subscription(s)", self.subscriptions.len());
        for subscription in &self.subscriptions {
            self.send_request(subscription, client_id).await;
        }
    }

    async fn send_request(&self, subscription: &Subscription, client_id: uuid::Uuid) {
        match subscription.request(client_id).to_json() {
            Ok(json) => {
                if !self.connection.send(&json).await {
                    debug!("Subscription {} not sent, socket not open", subscription);
                }
            }
            Err(e) => warn!("Failed to serialize subscription {}: {}", subscription, e),
        }
    }

    fn set_session(&mut self, session: Session) {
        self.session = session;
        self.session_tx.send_if_modified(|current| {
            let changed = *current != session;
            *current = session;
            changed
        });
    }
}
