// src/rabbitmq/topology.rs
use tracing::{debug, info};

use super::amqp_client::{BrokerChannel, EnvelopeStream, ExchangeSpec, QueueSpec};
use super::errors::ConnectError;
use crate::config::{ConsumeTopology, PublishTopology};

/// Declares exchange, queue, binding and QoS, then starts a manual-ack
/// consumer on the queue.
pub async fn bind_consumer(
    channel: &dyn BrokerChannel,
    topology: &ConsumeTopology,
) -> Result<EnvelopeStream, ConnectError> {
    channel
        .declare_exchange(&ExchangeSpec {
            name: topology.exchange.clone(),
            kind: topology.exchange_kind.clone(),
            durable: true,
        })
        .await?;

    channel
        .declare_queue(&QueueSpec {
            name: topology.queue.clone(),
            durable: true,
            auto_delete: false,
            exclusive: false,
        })
        .await?;

    channel
        .bind_queue(&topology.queue, &topology.exchange, &topology.routing_key)
        .await?;

    debug!("Setting channel QoS to {}", topology.prefetch);
    channel.set_prefetch(topology.prefetch).await?;

    let deliveries = channel.consume(&topology.queue).await?;
    info!(
        exchange = %topology.exchange,
        routing_key = %topology.routing_key,
        "Consuming from queue '{}'", topology.queue
    );
    Ok(deliveries)
}

/// Declares the outbound exchange, enabling publisher confirms if requested.
pub async fn bind_publisher(
    channel: &dyn BrokerChannel,
    topology: &PublishTopology,
) -> Result<(), ConnectError> {
    channel
        .declare_exchange(&ExchangeSpec {
            name: topology.exchange.clone(),
            kind: topology.exchange_kind.clone(),
            durable: true,
        })
        .await?;

    if topology.confirm {
        debug!("Enabling confirm mode on exchange '{}'", topology.exchange);
        channel.enable_confirms().await?;
    }
    Ok(())
}
