//! BDD test world for the dashboard feed

use std::collections::HashMap;
use std::time::Duration;

use cucumber::World;
use dashboard_feed::heartbeat::{HeartbeatRecord, Liveness};
use dashboard_feed::io::{MemoryListener, ServerSocket};
use dashboard_feed::router::Router;
use dashboard_feed::session::HandshakeOutcome;
use dashboard_feed::{FeedClient, Notification, Session};
use tokio::sync::broadcast;

#[derive(Debug, Default, World)]
pub struct FeedWorld {
    // Handshake testing
    pub session: Session,
    pub last_outcome: Option<HandshakeOutcome>,

    // Feed client over in-memory sockets
    pub client: Option<FeedClient>,
    pub listener: Option<MemoryListener>,
    pub server: Option<ServerSocket>,

    // Routing testing
    pub router: Option<Router>,
    pub listeners: HashMap<String, broadcast::Receiver<Notification>>,
    pub published: Option<bool>,

    // Heartbeat testing
    pub now: f64,
    pub allowance: Duration,
    pub retry: Duration,
    pub record: Option<HeartbeatRecord>,
    pub dependency_active: Option<bool>,
    pub liveness: Option<Liveness>,
}
