// src/rabbitmq/amqp_client.rs
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::oneshot;

use super::envelope::Envelope;
use super::errors::{ConnectError, PublishError};
use crate::config::ConnectionParams;

/// Lazy, non-restartable sequence of deliveries. Yields an error (or ends)
/// once the channel is lost.
pub type EnvelopeStream = BoxStream<'static, Result<Envelope, ConnectError>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: String,
    pub durable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    pub auto_delete: bool,
    pub exclusive: bool,
}

/// Broker message properties set on every publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundProperties {
    pub content_type: String,
    pub message_type: Option<String>,
    /// 2 = persistent.
    pub delivery_mode: u8,
}

/// One logical channel over one transport connection, owned by the session
/// that opened it.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn declare_exchange(&self, exchange: &ExchangeSpec) -> Result<(), ConnectError>;

    async fn declare_queue(&self, queue: &QueueSpec) -> Result<(), ConnectError>;

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str)
        -> Result<(), ConnectError>;

    async fn set_prefetch(&self, prefetch: u16) -> Result<(), ConnectError>;

    async fn enable_confirms(&self) -> Result<(), ConnectError>;

    /// Starts consuming with manual acknowledgement.
    async fn consume(&self, queue: &str) -> Result<EnvelopeStream, ConnectError>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: OutboundProperties,
    ) -> Result<(), PublishError>;

    fn is_open(&self) -> bool;

    /// Closes the channel and its connection. Errors are swallowed; the
    /// handle is dead either way.
    async fn close(&self);
}

/// Opens a transport connection plus one channel. Never retries.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, params: &ConnectionParams) -> Result<BrokerLink, ConnectError>;
}

pub struct BrokerLink {
    pub channel: Arc<dyn BrokerChannel>,
    pub lost: Disconnection,
}

/// Resolves once the transport behind a [`BrokerLink`] is lost.
pub struct Disconnection {
    rx: oneshot::Receiver<String>,
}

/// Fires the paired [`Disconnection`]. Only the first reason is kept.
pub struct DisconnectNotifier {
    tx: Option<oneshot::Sender<String>>,
}

impl Disconnection {
    pub fn new() -> (DisconnectNotifier, Disconnection) {
        let (tx, rx) = oneshot::channel();
        (DisconnectNotifier { tx: Some(tx) }, Disconnection { rx })
    }

    pub async fn wait(self) -> String {
        self.rx
            .await
            .unwrap_or_else(|_| "connection dropped".to_string())
    }
}

impl DisconnectNotifier {
    pub fn notify(&mut self, reason: impl Into<String>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(reason.into());
        }
    }

    pub fn is_fired(&self) -> bool {
        self.tx.is_none()
    }
}
