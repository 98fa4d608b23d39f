use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use rabbit_pipe::config::PublishTopology;
use rabbit_pipe::rabbitmq::{ExchangeSpec, OutboundSession, PublishError, Publisher, SessionState};

use crate::common::{params, publish_topology, wait_for_state, FakeBroker};

fn spawn_session(
    broker: &FakeBroker,
    topology: PublishTopology,
) -> (Publisher, watch::Receiver<SessionState>) {
    let session = OutboundSession::new(Arc::new(broker.clone()), params("rabbit-out"), topology);
    let publisher = session.publisher().unwrap();
    let state = session.state();
    tokio::spawn(session.run());
    (publisher, state)
}

fn spawn_publish(publisher: &Publisher, kind: &str) -> JoinHandle<Result<(), PublishError>> {
    let publisher = publisher.clone();
    let record = json!({ "kind": kind });
    tokio::spawn(async move { publisher.publish(&record).await })
}

#[tokio::test(start_paused = true)]
async fn publish_issued_before_ready_waits_for_the_gate() {
    let broker = FakeBroker::new();
    broker.refuse_connections(1);
    let session = OutboundSession::new(
        Arc::new(broker.clone()),
        params("rabbit-out"),
        publish_topology("records.{kind}"),
    );
    let publisher = session.publisher().unwrap();
    let mut state = session.state();

    let pending = spawn_publish(&publisher, "early");
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!pending.is_finished());

    tokio::spawn(session.run());
    wait_for_state(&mut state, SessionState::Ready).await;

    pending.await.unwrap().unwrap();
    let published = broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].routing_key, "records.early");
    assert_eq!(published[0].channel, 0);
    assert_eq!(broker.connect_attempts().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn publish_during_outage_goes_to_the_next_channel() {
    let broker = FakeBroker::new();
    let (publisher, mut state) = spawn_session(&broker, publish_topology("records.{kind}"));
    wait_for_state(&mut state, SessionState::Ready).await;

    let dropped_at = Instant::now();
    broker.drop_connection("heartbeat timeout");
    wait_for_state(&mut state, SessionState::Disconnected).await;

    let pending = spawn_publish(&publisher, "late");
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!pending.is_finished());
    assert!(broker.published().is_empty());

    wait_for_state(&mut state, SessionState::Ready).await;
    pending.await.unwrap().unwrap();

    let published = broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].channel, 1);
    let reconnected_after = broker.connect_attempts()[1] - dropped_at;
    assert!(reconnected_after >= Duration::from_secs(5));
    assert!(reconnected_after < Duration::from_secs(5) + Duration::from_millis(50));
}

#[tokio::test(start_paused = true)]
async fn failed_exchange_declare_is_retried_after_one_second() {
    let broker = FakeBroker::new();
    broker.fail_declares(1);
    let (publisher, mut state) = spawn_session(&broker, publish_topology("records.{kind}"));
    wait_for_state(&mut state, SessionState::Ready).await;

    let attempts = broker.connect_attempts();
    assert_eq!(attempts.len(), 2);
    assert!(attempts[1] - attempts[0] >= Duration::from_secs(1));
    assert!(attempts[1] - attempts[0] < Duration::from_secs(2));
    assert!(broker.channel(0).is_closed());

    spawn_publish(&publisher, "a").await.unwrap().unwrap();
    assert_eq!(broker.published()[0].channel, 1);
}

#[tokio::test(start_paused = true)]
async fn declares_durable_exchange_and_enables_confirms() {
    let broker = FakeBroker::new();
    let topology = PublishTopology {
        confirm: true,
        ..publish_topology("records.{kind}")
    };
    let (_publisher, mut state) = spawn_session(&broker, topology);
    wait_for_state(&mut state, SessionState::Ready).await;

    assert_eq!(
        broker.exchanges(),
        vec![ExchangeSpec {
            name: "records".to_string(),
            kind: "direct".to_string(),
            durable: true,
        }]
    );
    assert_eq!(broker.confirms(), 1);
}

#[tokio::test(start_paused = true)]
async fn confirms_stay_off_by_default() {
    let broker = FakeBroker::new();
    let (_publisher, mut state) = spawn_session(&broker, publish_topology("records.{kind}"));
    wait_for_state(&mut state, SessionState::Ready).await;

    assert_eq!(broker.confirms(), 0);
}
