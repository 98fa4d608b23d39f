// src/processor.rs
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{error, info, warn};

use crate::message::{OutboundMessage, Outcome};
use crate::rabbitmq::envelope::Envelope;
use crate::rabbitmq::errors::{BoxError, ProcessError, PublishError};
use crate::rabbitmq::publisher::Publisher;

/// Turns a raw delivery body into the action's input.
pub trait Converter<M>: Send + Sync + 'static {
    fn convert(&self, body: &[u8]) -> Result<M, BoxError>;
}

impl<M, F> Converter<M> for F
where
    F: Fn(&[u8]) -> Result<M, BoxError> + Send + Sync + 'static,
{
    fn convert(&self, body: &[u8]) -> Result<M, BoxError> {
        self(body)
    }
}

/// User processing step. May suspend for further I/O.
#[async_trait]
pub trait Action<M, R>: Send + Sync + 'static {
    async fn call(&self, message: M) -> Result<Outcome<R>, BoxError>;
}

#[async_trait]
impl<M, R, F, Fut> Action<M, R> for F
where
    F: Fn(M) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Outcome<R>, BoxError>> + Send + 'static,
    M: Send + 'static,
    R: Send + 'static,
{
    async fn call(&self, message: M) -> Result<Outcome<R>, BoxError> {
        (self)(message).await
    }
}

/// How an envelope was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Content-type did not match the filter; acknowledged untouched.
    Skipped,
    Acked { published: usize },
    Rejected { requeue: bool },
}

/// Per-envelope pipeline: filter, convert, act, fan out, settle.
pub struct MessageProcessor<M, R> {
    content_type: Option<String>,
    converter: Arc<dyn Converter<M>>,
    action: Arc<dyn Action<M, R>>,
    publisher: Option<Publisher>,
    requeue_on_failure: bool,
}

impl<M, R> MessageProcessor<M, R>
where
    M: Send + 'static,
    R: OutboundMessage,
{
    pub fn new(converter: impl Converter<M>, action: impl Action<M, R>) -> Self {
        Self {
            content_type: None,
            converter: Arc::new(converter),
            action: Arc::new(action),
            publisher: None,
            requeue_on_failure: true,
        }
    }

    /// An empty content type disables the filter, same as `None`.
    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type.filter(|ct| !ct.is_empty());
        self
    }

    /// Results are discarded unless a publisher is attached.
    pub fn with_publisher(mut self, publisher: Publisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_requeue_on_failure(mut self, requeue: bool) -> Self {
        self.requeue_on_failure = requeue;
        self
    }

    pub async fn process(&self, envelope: Envelope) -> Disposition {
        let delivery_tag = envelope.delivery_tag();

        if let Some(expected) = &self.content_type {
            if envelope.content_type() != Some(expected.as_str()) {
                info!(
                    delivery_tag,
                    "Bad content_type ({}), ignoring message",
                    envelope.content_type().unwrap_or("none")
                );
                settle(envelope.ack().await, delivery_tag);
                return Disposition::Skipped;
            }
        }

        let message = match self.converter.convert(envelope.body()) {
            Ok(message) => message,
            Err(e) => {
                let err = ProcessError::Conversion(e);
                warn!(delivery_tag, error_type = err.kind(), "Got bad packet: {}", err);
                settle(envelope.reject(false).await, delivery_tag);
                return Disposition::Rejected { requeue: false };
            }
        };

        match self.handle(message).await {
            Ok(published) => {
                settle(envelope.ack().await, delivery_tag);
                Disposition::Acked { published }
            }
            Err(err) => {
                let requeue = self.requeue_on_failure;
                warn!(
                    delivery_tag,
                    error_type = err.kind(),
                    "Sending NACK due to {}: {}",
                    err.kind(),
                    err
                );
                settle(envelope.reject(requeue).await, delivery_tag);
                Disposition::Rejected { requeue }
            }
        }
    }

    async fn handle(&self, message: M) -> Result<usize, ProcessError> {
        let outcome = self.action.call(message).await.map_err(ProcessError::Action)?;

        let Some(publisher) = &self.publisher else {
            return Ok(0);
        };

        match outcome {
            Outcome::Nothing => Ok(0),
            Outcome::One(result) if result.is_empty() => Ok(0),
            Outcome::One(result) => {
                publisher.publish(&result).await?;
                Ok(1)
            }
            Outcome::Many(results) => Ok(publish_all(publisher, results).await?),
        }
    }
}

/// Publishes every result concurrently; the first failure decides. Publishes
/// still in flight keep running detached, their outcome is ignored.
async fn publish_all<R: OutboundMessage>(
    publisher: &Publisher,
    results: Vec<R>,
) -> Result<usize, PublishError> {
    let mut pending: FuturesUnordered<_> = results
        .into_iter()
        .map(|result| {
            let publisher = publisher.clone();
            tokio::spawn(async move { publisher.publish(&result).await })
        })
        .collect();

    let total = pending.len();
    while let Some(joined) = pending.next().await {
        joined.map_err(|e| PublishError::Aborted(e.to_string()))??;
    }
    Ok(total)
}

fn settle(result: Result<(), crate::rabbitmq::errors::AckError>, delivery_tag: u64) {
    if let Err(e) = result {
        error!(delivery_tag, "Failed to settle message: {}", e);
    }
}
