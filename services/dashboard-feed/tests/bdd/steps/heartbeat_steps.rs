//! BDD step definitions for heartbeat liveness

use std::time::Duration;

use cucumber::{given, then, when};
use serde_json::json;

use dashboard_feed::heartbeat::{evaluate, HeartbeatRecord, HeartbeatResponse};

use crate::world::FeedWorld;

#[given(expr = "the clock reads {int}")]
fn clock_reads(world: &mut FeedWorld, now: i64) {
    world.now = now as f64;
}

#[given(expr = "a network allowance of {int} seconds")]
fn network_allowance(world: &mut FeedWorld, seconds: u64) {
    world.allowance = Duration::from_secs(seconds);
}

#[given(expr = "a retry interval of {int} seconds")]
fn retry_interval(world: &mut FeedWorld, seconds: u64) {
    world.retry = Duration::from_secs(seconds);
}

#[given(expr = "the last heartbeat announced the next one at {int}")]
fn last_heartbeat(world: &mut FeedWorld, next: i64) {
    world.record = Some(HeartbeatRecord {
        service: "rubintv".to_string(),
        time: world.now,
        next: next as f64,
        errors: json!({}),
        active: false,
    });
}

#[given(expr = "the heartbeat response {string}")]
fn heartbeat_response(world: &mut FeedWorld, body: String) {
    let response: HeartbeatResponse =
        serde_json::from_str(&body).expect("not a heartbeat response");
    world.record = Some(response.into_record());
}

#[given(expr = "the dependency is {word}")]
fn dependency_state(world: &mut FeedWorld, state: String) {
    let active = match state.as_str() {
        "active" => true,
        "stopped" => false,
        other => panic!("Unknown dependency state: {}", other),
    };
    world.dependency_active = Some(active);
}

#[when("liveness is evaluated")]
fn liveness_evaluated(world: &mut FeedWorld) {
    let record = world.record.as_ref().expect("no heartbeat record");
    world.liveness = Some(evaluate(
        record,
        world.now,
        world.allowance,
        world.retry,
        world.dependency_active.unwrap_or(true),
    ));
}

#[then("the service is active")]
fn service_active(world: &mut FeedWorld) {
    assert!(world.liveness.expect("not evaluated").active);
}

#[then("the service is stopped")]
fn service_stopped(world: &mut FeedWorld) {
    assert!(!world.liveness.expect("not evaluated").active);
}

#[then(expr = "the next check is in {int} second(s)")]
fn next_check_in(world: &mut FeedWorld, seconds: u64) {
    assert_eq!(
        world.liveness.expect("not evaluated").next_check,
        Duration::from_secs(seconds)
    );
}

#[then(expr = "the record belongs to {string}")]
fn record_belongs_to(world: &mut FeedWorld, service: String) {
    assert_eq!(world.record.as_ref().expect("no record").service, service);
}
