//! BDD step definitions for the session handshake

use std::time::Duration;

use cucumber::gherkin::Step;
use cucumber::{given, then, when};
use serde_json::Value;

use dashboard_feed::config::{ReconnectConfig, TransportConfig};
use dashboard_feed::io::MemoryConnector;
use dashboard_feed::session::HandshakeOutcome;
use dashboard_feed::{EventBus, FeedClient, Session, Subscription};

use crate::world::FeedWorld;

const WAIT: Duration = Duration::from_secs(2);

fn page_subscription(page_type: &str, page_id: &str) -> Subscription {
    let mut parts = page_id.split('/');
    Subscription::service(page_type, parts.next(), parts.next(), parts.next())
}

#[given("an unauthenticated session")]
fn unauthenticated_session(world: &mut FeedWorld) {
    world.session = Session::Unauthenticated;
}

#[given(expr = "a session authenticated as {string}")]
fn authenticated_session(world: &mut FeedWorld, token: String) {
    let (session, outcome) = Session::Unauthenticated.accept(&token);
    assert!(
        matches!(outcome, HandshakeOutcome::Authenticated(_)),
        "'{}' is not an identity token",
        token
    );
    world.session = session;
}

#[when(expr = "the frame {string} arrives")]
fn frame_arrives(world: &mut FeedWorld, frame: String) {
    let (session, outcome) = world.session.accept(&frame);
    world.session = session;
    world.last_outcome = Some(outcome);
}

#[when("the transport reopens")]
fn transport_reopens(world: &mut FeedWorld) {
    world.session = world.session.reset();
}

#[then(expr = "the session is authenticated as {string}")]
fn session_authenticated_as(world: &mut FeedWorld, token: String) {
    assert_eq!(
        world.session.client_id().map(|id| id.to_string()),
        Some(token)
    );
}

#[then("the session is unauthenticated")]
fn session_unauthenticated(world: &mut FeedWorld) {
    assert_eq!(world.session, Session::Unauthenticated);
}

#[then("the frame is handed to the router")]
fn frame_handed_on(world: &mut FeedWorld) {
    assert_eq!(world.last_outcome, Some(HandshakeOutcome::NotIdentity));
}

#[then("the frame is ignored")]
fn frame_ignored(world: &mut FeedWorld) {
    assert_eq!(world.last_outcome, Some(HandshakeOutcome::Ignored));
}

// ============================================================================
// Feed client over an in-memory socket
// ============================================================================

#[given(expr = "a feed client subscribed to the {word} page {string}")]
async fn feed_client_subscribed(world: &mut FeedWorld, page_type: String, page_id: String) {
    let config = TransportConfig {
        reconnect: ReconnectConfig {
            max_retries: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        },
        ..Default::default()
    };
    let (connector, listener) = MemoryConnector::new();
    let client = FeedClient::start(&config, "mem://dashboard/ws", connector, EventBus::new(16));
    client
        .subscribe(page_subscription(&page_type, &page_id))
        .await
        .expect("dispatcher gone");

    world.client = Some(client);
    world.listener = Some(listener);
}

async fn accept_connection(world: &mut FeedWorld) {
    let listener = world.listener.as_mut().expect("no feed client");
    let server = tokio::time::timeout(WAIT, listener.accept())
        .await
        .expect("timed out waiting for connection")
        .expect("connector dropped");
    world.server = Some(server);
}

#[given("the server accepted the connection")]
async fn server_accepted(world: &mut FeedWorld) {
    accept_connection(world).await;
}

#[when("the client reconnects")]
async fn client_reconnects(world: &mut FeedWorld) {
    accept_connection(world).await;
}

#[when("the server drops the connection")]
fn server_drops(world: &mut FeedWorld) {
    world.server.as_mut().expect("no connection").close();
}

#[when(expr = "the server sends the frame {string}")]
fn server_sends(world: &mut FeedWorld, frame: String) {
    assert!(world.server.as_ref().expect("no connection").send(frame));
}

#[then("the server receives nothing")]
async fn server_receives_nothing(world: &mut FeedWorld) {
    tokio::time::sleep(Duration::from_millis(30)).await;
    let server = world.server.as_mut().expect("no connection");
    assert_eq!(server.try_recv(), None);
}

#[then("the server receives the request:")]
async fn server_receives_request(world: &mut FeedWorld, step: &Step) {
    let docstring = step.docstring.as_deref().expect("request docstring");
    let expected: Value = serde_json::from_str(docstring).expect("docstring is not JSON");

    let server = world.server.as_mut().expect("no connection");
    let frame = tokio::time::timeout(WAIT, server.recv())
        .await
        .expect("timed out waiting for request")
        .expect("client closed socket");
    let actual: Value = serde_json::from_str(&frame).expect("request is not JSON");

    assert_eq!(actual, expected);
}
