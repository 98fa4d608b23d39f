// src/rabbitmq/consumer.rs
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tracing::{error, info};

use super::amqp_client::{BrokerLink, Connector, Disconnection, EnvelopeStream};
use super::backoff::{self, SESSION_LOST_DELAY, SETUP_RETRY_DELAY};
use super::session::{SessionState, StateCell};
use super::topology;
use crate::config::{ConnectionParams, ConsumeTopology};
use crate::message::OutboundMessage;
use crate::processor::MessageProcessor;

/// Consume-side lifecycle: connect, bind, pull deliveries and dispatch each
/// one to its own task; on any failure tear down and start over.
pub struct InboundSession<M, R> {
    connector: Arc<dyn Connector>,
    params: ConnectionParams,
    topology: ConsumeTopology,
    processor: Arc<MessageProcessor<M, R>>,
    state: StateCell,
}

impl<M, R> InboundSession<M, R>
where
    M: Send + 'static,
    R: OutboundMessage,
{
    pub fn new(
        connector: Arc<dyn Connector>,
        params: ConnectionParams,
        topology: ConsumeTopology,
        processor: Arc<MessageProcessor<M, R>>,
    ) -> Self {
        Self {
            connector,
            params,
            topology,
            processor,
            state: StateCell::new(),
        }
    }

    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Runs forever; this is the steady state of the inbound side.
    pub async fn run(self) {
        loop {
            self.state.set(SessionState::Connecting);
            let BrokerLink { channel, lost } = match self.connector.connect(&self.params).await {
                Ok(link) => link,
                Err(e) => {
                    error!("Couldn't connect to RabbitMQ server to consume ({})", e);
                    self.retry_after(SETUP_RETRY_DELAY).await;
                    continue;
                }
            };

            self.state.set(SessionState::Binding);
            let deliveries = match topology::bind_consumer(channel.as_ref(), &self.topology).await {
                Ok(deliveries) => deliveries,
                Err(e) => {
                    error!("Couldn't consume from queue ({})", e);
                    channel.close().await;
                    self.retry_after(SETUP_RETRY_DELAY).await;
                    continue;
                }
            };

            self.state.set(SessionState::Consuming);
            info!(queue = %self.topology.queue, "Ready to consume messages");

            let reason = self.consume(deliveries, lost).await;
            self.state.set(SessionState::Draining);
            error!("Disconnect occurred in message consumer ({})", reason);
            channel.close().await;
            self.retry_after(SESSION_LOST_DELAY).await;
        }
    }

    /// Pulls deliveries in broker order until the stream fails or the
    /// connection is lost. Returns the reason.
    async fn consume(&self, mut deliveries: EnvelopeStream, lost: Disconnection) -> String {
        let lost = lost.wait();
        tokio::pin!(lost);

        loop {
            tokio::select! {
                reason = &mut lost => return reason,
                next = deliveries.next() => match next {
                    Some(Ok(envelope)) => {
                        let processor = self.processor.clone();
                        tokio::spawn(async move {
                            processor.process(envelope).await;
                        });
                    }
                    Some(Err(e)) => return e.to_string(),
                    None => return "consumer cancelled".to_string(),
                },
            }
        }
    }

    async fn retry_after(&self, delay: Duration) {
        self.state.set(SessionState::Disconnected);
        backoff::sleep(delay).await;
    }
}
