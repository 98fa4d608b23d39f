// src/rabbitmq/publisher.rs
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use super::amqp_client::{BrokerChannel, BrokerLink, Connector, OutboundProperties};
use super::backoff::{self, SESSION_LOST_DELAY, SETUP_RETRY_DELAY};
use super::errors::{PublishError, TemplateError};
use super::session::{SessionState, StateCell};
use super::topology;
use crate::config::{ConnectionParams, PublishTopology};
use crate::message::{encode, OutboundMessage, Template};

/// AMQP delivery mode for messages that survive a broker restart.
pub const PERSISTENT: u8 = 2;

type ActiveChannel = Option<Arc<dyn BrokerChannel>>;

/// Holds the active outbound channel, or nothing while the outbound side is
/// not connected. Written only by the outbound session.
pub struct ReadinessGate {
    tx: watch::Sender<ActiveChannel>,
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self {
            tx: watch::Sender::new(None),
        }
    }

    pub fn open(&self, channel: Arc<dyn BrokerChannel>) {
        self.tx.send_replace(Some(channel));
    }

    pub fn close(&self) {
        self.tx.send_replace(None);
    }

    pub fn is_open(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn watcher(&self) -> GateWatcher {
        GateWatcher {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Read side of a [`ReadinessGate`].
#[derive(Clone)]
pub struct GateWatcher {
    rx: watch::Receiver<ActiveChannel>,
}

impl GateWatcher {
    /// Waits until a channel is active and returns it. The channel is re-read
    /// on every call; callers must not hold on to it across publishes.
    pub async fn ready(&self) -> Result<Arc<dyn BrokerChannel>, PublishError> {
        let mut rx = self.rx.clone();
        let active = rx
            .wait_for(|active| active.is_some())
            .await
            .map_err(|_| PublishError::Closed)?;
        active.as_ref().cloned().ok_or(PublishError::Closed)
    }
}

/// Cheap, cloneable publish handle shared by every in-flight envelope.
#[derive(Clone)]
pub struct Publisher {
    gate: GateWatcher,
    exchange: String,
    routing_key: Template,
    content_type: Template,
}

impl Publisher {
    pub fn new(gate: GateWatcher, topology: &PublishTopology) -> Result<Self, TemplateError> {
        Ok(Self {
            gate,
            exchange: topology.exchange.clone(),
            routing_key: Template::parse(&topology.routing_key_template)?,
            content_type: Template::parse(&topology.content_type_template)?,
        })
    }

    /// Waits for the readiness gate (possibly across several reconnects),
    /// then publishes once. A failure is returned to the caller, never retried.
    pub async fn publish<R: OutboundMessage + ?Sized>(&self, message: &R) -> Result<(), PublishError> {
        let channel = self.gate.ready().await?;

        let routing_key = self.routing_key.render(message)?;
        let encoded = encode(message, &self.content_type)?;

        debug!(
            exchange = %self.exchange,
            routing_key = %routing_key,
            content_type = %encoded.content_type,
            "Sending {}",
            encoded.message_type.as_deref().unwrap_or(std::any::type_name::<R>())
        );

        channel
            .publish(
                &self.exchange,
                &routing_key,
                &encoded.body,
                OutboundProperties {
                    content_type: encoded.content_type,
                    message_type: encoded.message_type,
                    delivery_mode: PERSISTENT,
                },
            )
            .await
    }
}

/// Publish-side lifecycle: connect, declare the exchange, open the gate,
/// wait for the connection to drop, close the gate, retry.
pub struct OutboundSession {
    connector: Arc<dyn Connector>,
    params: ConnectionParams,
    topology: PublishTopology,
    gate: ReadinessGate,
    state: StateCell,
}

impl OutboundSession {
    pub fn new(
        connector: Arc<dyn Connector>,
        params: ConnectionParams,
        topology: PublishTopology,
    ) -> Self {
        Self {
            connector,
            params,
            topology,
            gate: ReadinessGate::new(),
            state: StateCell::new(),
        }
    }

    pub fn publisher(&self) -> Result<Publisher, TemplateError> {
        Publisher::new(self.gate.watcher(), &self.topology)
    }

    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Runs forever. Every failure is logged and retried after a fixed delay.
    pub async fn run(self) {
        loop {
            self.state.set(SessionState::Connecting);
            let BrokerLink { channel, lost } = match self.connector.connect(&self.params).await {
                Ok(link) => link,
                Err(e) => {
                    error!("Couldn't connect to RabbitMQ server to publish ({})", e);
                    self.retry_after(SETUP_RETRY_DELAY).await;
                    continue;
                }
            };

            self.state.set(SessionState::Binding);
            if let Err(e) = topology::bind_publisher(channel.as_ref(), &self.topology).await {
                error!("Couldn't declare exchange to publish ({})", e);
                channel.close().await;
                self.retry_after(SETUP_RETRY_DELAY).await;
                continue;
            }

            self.gate.open(channel.clone());
            self.state.set(SessionState::Ready);
            info!(exchange = %self.topology.exchange, "Ready to publish messages");

            let reason = lost.wait().await;
            self.gate.close();
            error!("Disconnect occurred in message publisher ({})", reason);
            channel.close().await;
            self.retry_after(SESSION_LOST_DELAY).await;
        }
    }

    async fn retry_after(&self, delay: Duration) {
        self.state.set(SessionState::Disconnected);
        backoff::sleep(delay).await;
    }
}
