// src/rabbitmq/envelope.rs
use std::fmt;

use async_trait::async_trait;

use super::errors::AckError;

/// Settles one delivery on the channel it arrived on.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self, delivery_tag: u64) -> Result<(), AckError>;

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), AckError>;
}

/// One broker delivery. Settling it consumes the envelope, so a delivery can
/// be acknowledged or rejected exactly once.
pub struct Envelope {
    body: Vec<u8>,
    content_type: Option<String>,
    routing_key: String,
    delivery_tag: u64,
    redelivered: bool,
    acker: Box<dyn Acknowledger>,
}

impl Envelope {
    pub fn new(
        body: Vec<u8>,
        content_type: Option<String>,
        delivery_tag: u64,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            body,
            content_type,
            routing_key: String::new(),
            delivery_tag,
            redelivered: false,
            acker,
        }
    }

    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = routing_key.into();
        self
    }

    pub fn with_redelivered(mut self, redelivered: bool) -> Self {
        self.redelivered = redelivered;
        self
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    pub async fn ack(self) -> Result<(), AckError> {
        self.acker.ack(self.delivery_tag).await
    }

    pub async fn reject(self, requeue: bool) -> Result<(), AckError> {
        self.acker.reject(self.delivery_tag, requeue).await
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("delivery_tag", &self.delivery_tag)
            .field("routing_key", &self.routing_key)
            .field("content_type", &self.content_type)
            .field("redelivered", &self.redelivered)
            .field("body_len", &self.body.len())
            .finish()
    }
}
