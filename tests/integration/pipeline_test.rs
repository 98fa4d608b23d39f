use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;

use rabbit_pipe::message::{self, Outcome};
use rabbit_pipe::rabbitmq::{BoxError, PipelineError, SessionState};
use rabbit_pipe::{Pipeline, PipeConfig};

use crate::common::{eventually, pipe_config, wait_for_state, FakeBroker, HostRouter, Settlement};

fn echo_pipeline(config: PipeConfig, inbound: &FakeBroker, outbound: &FakeBroker) -> Pipeline<Value, Value> {
    let router = HostRouter::default()
        .with("rabbit-in", inbound)
        .with("rabbit-out", outbound);
    Pipeline::new(config, message::json::<Value>(), |record: Value| async move {
        Ok::<_, BoxError>(Outcome::One(record))
    })
    .with_connector(Arc::new(router))
}

#[tokio::test]
async fn records_flow_from_inbound_to_outbound() {
    let inbound = FakeBroker::new();
    let outbound = FakeBroker::new();

    let handle = echo_pipeline(pipe_config(true), &inbound, &outbound)
        .start()
        .await
        .unwrap();
    let mut inbound_state = handle.inbound_state();
    let mut outbound_state = handle.outbound_state().unwrap();
    wait_for_state(&mut inbound_state, SessionState::Consuming).await;
    wait_for_state(&mut outbound_state, SessionState::Ready).await;

    inbound.deliver(1, Some("application/json"), br#"{"kind": "invoice", "id": 7}"#);
    inbound.deliver(2, Some("text/xml"), b"<invoice/>");

    eventually(|| inbound.settlements().len() == 2).await;
    let mut settled = inbound.settlements();
    settled.sort_by_key(|s| match s {
        Settlement::Ack(tag) => *tag,
        Settlement::Reject { tag, .. } => *tag,
    });
    assert_eq!(settled, vec![Settlement::Ack(1), Settlement::Ack(2)]);

    let published = outbound.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].exchange, "records");
    assert_eq!(published[0].routing_key, "records.invoice");
    assert_eq!(published[0].properties.content_type, "text/plain");
    let body: Value = serde_json::from_slice(&published[0].body).unwrap();
    assert_eq!(body["id"], 7);

    handle.shutdown();
}

#[tokio::test]
async fn failing_init_aborts_before_connecting() {
    let inbound = FakeBroker::new();
    let outbound = FakeBroker::new();

    let result = echo_pipeline(pipe_config(true), &inbound, &outbound)
        .with_init(|_| async { Err::<(), BoxError>("database unavailable".into()) })
        .start()
        .await;

    match result {
        Err(PipelineError::Init(e)) => assert_eq!(e.to_string(), "database unavailable"),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("pipeline started despite failing init"),
    }
    assert!(inbound.connect_attempts().is_empty());
    assert!(outbound.connect_attempts().is_empty());
}

#[tokio::test]
async fn init_sees_config_before_any_session_starts() {
    let inbound = FakeBroker::new();
    let outbound = FakeBroker::new();
    let ran_first = Arc::new(AtomicBool::new(false));

    let observed = ran_first.clone();
    let watched = inbound.clone();
    let handle = echo_pipeline(pipe_config(true), &inbound, &outbound)
        .with_init(move |config: PipeConfig| async move {
            let untouched = watched.connect_attempts().is_empty();
            observed.store(
                untouched && config.inbound.topology.queue == "events.worker",
                Ordering::SeqCst,
            );
            Ok::<(), BoxError>(())
        })
        .start()
        .await
        .unwrap();

    assert!(ran_first.load(Ordering::SeqCst));
    let mut state = handle.inbound_state();
    wait_for_state(&mut state, SessionState::Consuming).await;
    handle.shutdown();
}

#[tokio::test]
async fn without_outbound_results_are_dropped_and_acked() {
    let inbound = FakeBroker::new();
    let outbound = FakeBroker::new();

    let handle = echo_pipeline(pipe_config(false), &inbound, &outbound)
        .start()
        .await
        .unwrap();
    assert!(handle.outbound_state().is_none());

    let mut state = handle.inbound_state();
    wait_for_state(&mut state, SessionState::Consuming).await;
    inbound.deliver(1, Some("application/json"), br#"{"kind": "invoice"}"#);

    eventually(|| inbound.settlements() == vec![Settlement::Ack(1)]).await;
    assert!(outbound.connect_attempts().is_empty());
    handle.shutdown();
}

#[tokio::test]
async fn invalid_config_is_rejected_at_startup() {
    let inbound = FakeBroker::new();
    let outbound = FakeBroker::new();
    let mut config = pipe_config(true);
    config.outbound.as_mut().unwrap().topology.routing_key_template = "records.{kind".to_string();

    let result = echo_pipeline(config, &inbound, &outbound).start().await;

    assert!(matches!(result, Err(PipelineError::Config(_))));
    assert!(inbound.connect_attempts().is_empty());
}
