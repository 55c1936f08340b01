//! BDD step definitions for event routing

use cucumber::gherkin::Step;
use cucumber::{given, then, when};
use serde_json::{json, Value};
use tokio::sync::broadcast::error::TryRecvError;

use dashboard_feed::codec;
use dashboard_feed::router::Router;
use dashboard_feed::{EventBus, Notification, Subscription};

use crate::world::FeedWorld;

fn router(world: &mut FeedWorld) -> &mut Router {
    world.router.as_mut().expect("router not set")
}

fn received(world: &mut FeedWorld, channel: &str) -> Notification {
    let rx = world
        .listeners
        .get_mut(channel)
        .unwrap_or_else(|| panic!("no listener on '{}'", channel));
    rx.try_recv()
        .unwrap_or_else(|e| panic!("nothing received on '{}': {}", channel, e))
}

#[given(expr = "a router bound to the {word} page {string}")]
fn router_bound_to_page(world: &mut FeedWorld, page_type: String, page_id: String) {
    let mut parts = page_id.split('/');
    let subscription = Subscription::service(page_type, parts.next(), parts.next(), None);
    let mut router = Router::new(EventBus::new(16));
    router.bind(&subscription);
    world.router = Some(router);
}

#[given("the router is also bound to historical status")]
fn router_bound_to_status(world: &mut FeedWorld) {
    router(world).bind(&Subscription::HistoricalStatus);
}

#[given(expr = "a listener on the {string} channel")]
async fn listener_on_channel(world: &mut FeedWorld, channel: String) {
    let rx = router(world).bus().subscribe(&channel).await;
    world.listeners.insert(channel, rx);
}

#[when(expr = "the frame {string} is routed")]
async fn frame_routed(world: &mut FeedWorld, frame: String) {
    let published = router(world).route(&frame).await;
    world.published = Some(published);
}

#[when(expr = "a compressed {string} envelope carrying {string} is routed")]
async fn compressed_envelope_routed(world: &mut FeedWorld, data_type: String, payload: String) {
    let payload: Value = serde_json::from_str(&payload).expect("payload is not JSON");
    let frame = json!({
        "dataType": data_type,
        "payload": codec::encode(&payload),
        "compressed": true,
    })
    .to_string();
    let published = router(world).route(&frame).await;
    world.published = Some(published);
}

#[then("nothing is published")]
fn nothing_published(world: &mut FeedWorld) {
    assert_eq!(world.published, Some(false));
}

#[then(expr = "the {string} listener receives:")]
fn listener_receives(world: &mut FeedWorld, channel: String, step: &Step) {
    let docstring = step.docstring.as_deref().expect("notification docstring");
    let expected: Value = serde_json::from_str(docstring).expect("docstring is not JSON");

    let notification = received(world, &channel);
    assert_eq!(serde_json::to_value(&notification).unwrap(), expected);
}

#[then(expr = "the {string} listener receives data {string}")]
fn listener_receives_data(world: &mut FeedWorld, channel: String, data: String) {
    let expected: Value = serde_json::from_str(&data).expect("data is not JSON");
    assert_eq!(received(world, &channel).data(), Some(&expected));
}

#[then(expr = "the {string} listener receives the error {string}")]
fn listener_receives_error(world: &mut FeedWorld, channel: String, reason: String) {
    assert_eq!(received(world, &channel).error(), Some(reason.as_str()));
}

#[then(expr = "the {string} listener receives nothing")]
fn listener_receives_nothing(world: &mut FeedWorld, channel: String) {
    let rx = world
        .listeners
        .get_mut(&channel)
        .unwrap_or_else(|| panic!("no listener on '{}'", channel));
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}
