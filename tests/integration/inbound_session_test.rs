use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use rabbit_pipe::message::{utf8_text, Outcome};
use rabbit_pipe::rabbitmq::{BoxError, ExchangeSpec, InboundSession, QueueSpec, SessionState};
use rabbit_pipe::MessageProcessor;

use crate::common::{consume_topology, eventually, params, wait_for_state, FakeBroker, Settlement};

fn discard_processor() -> Arc<MessageProcessor<String, String>> {
    Arc::new(MessageProcessor::new(utf8_text, |_: String| async {
        Ok::<Outcome<String>, BoxError>(Outcome::Nothing)
    }))
}

fn spawn_session(
    broker: &FakeBroker,
    processor: Arc<MessageProcessor<String, String>>,
) -> tokio::sync::watch::Receiver<SessionState> {
    let session = InboundSession::new(
        Arc::new(broker.clone()),
        params("rabbit-in"),
        consume_topology(),
        processor,
    );
    let state = session.state();
    tokio::spawn(session.run());
    state
}

fn assert_gap(from: Instant, to: Instant, expected: Duration) {
    let gap = to - from;
    assert!(
        gap >= expected && gap < expected + Duration::from_millis(50),
        "expected a {:?} gap, got {:?}",
        expected,
        gap
    );
}

#[tokio::test(start_paused = true)]
async fn refused_connect_is_retried_after_one_second() {
    let broker = FakeBroker::new();
    broker.refuse_connections(2);

    let mut state = spawn_session(&broker, discard_processor());
    wait_for_state(&mut state, SessionState::Consuming).await;

    let attempts = broker.connect_attempts();
    assert_eq!(attempts.len(), 3);
    assert_gap(attempts[0], attempts[1], Duration::from_secs(1));
    assert_gap(attempts[1], attempts[2], Duration::from_secs(1));
    assert_eq!(broker.channel_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_declare_closes_the_channel_and_retries() {
    let broker = FakeBroker::new();
    broker.fail_declares(1);

    let mut state = spawn_session(&broker, discard_processor());
    wait_for_state(&mut state, SessionState::Consuming).await;

    let attempts = broker.connect_attempts();
    assert_eq!(attempts.len(), 2);
    assert_gap(attempts[0], attempts[1], Duration::from_secs(1));
    assert!(broker.channel(0).is_closed());
    assert!(!broker.channel(1).is_closed());
}

#[tokio::test(start_paused = true)]
async fn declares_durable_topology_before_consuming() {
    let broker = FakeBroker::new();

    let mut state = spawn_session(&broker, discard_processor());
    wait_for_state(&mut state, SessionState::Consuming).await;

    assert_eq!(
        broker.exchanges(),
        vec![ExchangeSpec {
            name: "events".to_string(),
            kind: "topic".to_string(),
            durable: true,
        }]
    );
    assert_eq!(
        broker.queues(),
        vec![QueueSpec {
            name: "events.worker".to_string(),
            durable: true,
            auto_delete: false,
            exclusive: false,
        }]
    );
    assert_eq!(
        broker.bindings(),
        vec![(
            "events.worker".to_string(),
            "events".to_string(),
            "events.#".to_string()
        )]
    );
    assert_eq!(broker.prefetch(), vec![10]);
}

#[tokio::test(start_paused = true)]
async fn lost_connection_is_rebuilt_after_five_seconds_every_time() {
    let broker = FakeBroker::new();
    let mut state = spawn_session(&broker, discard_processor());
    wait_for_state(&mut state, SessionState::Consuming).await;

    for round in 1..=3 {
        let dropped_at = Instant::now();
        broker.drop_connection("CONNECTION_FORCED");
        wait_for_state(&mut state, SessionState::Disconnected).await;
        assert!(broker.channel(round - 1).is_closed());

        wait_for_state(&mut state, SessionState::Consuming).await;
        let attempts = broker.connect_attempts();
        assert_eq!(attempts.len(), round + 1);
        assert_gap(dropped_at, attempts[round], Duration::from_secs(5));
    }

    broker.deliver(1, Some("text/plain"), b"after recovery");
    eventually(|| broker.settlements() == vec![Settlement::Ack(1)]).await;
}

#[tokio::test]
async fn slow_message_does_not_hold_up_the_next_ones() {
    let release = Arc::new(Notify::new());
    let gate = release.clone();
    let processor = Arc::new(MessageProcessor::new(utf8_text, move |text: String| {
        let gate = gate.clone();
        async move {
            if text == "slow" {
                gate.notified().await;
            }
            Ok::<Outcome<String>, BoxError>(Outcome::Nothing)
        }
    }));

    let broker = FakeBroker::new();
    let mut state = spawn_session(&broker, processor);
    wait_for_state(&mut state, SessionState::Consuming).await;

    broker.deliver(1, Some("text/plain"), b"slow");
    broker.deliver(2, Some("text/plain"), b"fast");
    broker.deliver(3, Some("text/plain"), b"fast");

    eventually(|| {
        let settled = broker.settlements();
        settled.contains(&Settlement::Ack(2)) && settled.contains(&Settlement::Ack(3))
    })
    .await;
    assert!(!broker.settlements().contains(&Settlement::Ack(1)));

    release.notify_one();
    eventually(|| broker.settlements().contains(&Settlement::Ack(1))).await;
}
