// src/rabbitmq/connection.rs
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    acker::Acker,
    message::Delivery,
    options::*,
    publisher_confirm::Confirmation,
    types::FieldTable,
    uri::{AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo},
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tracing::{debug, info};
use uuid::Uuid;

use super::amqp_client::{
    BrokerChannel, BrokerLink, Connector, Disconnection, EnvelopeStream, ExchangeSpec,
    OutboundProperties, QueueSpec,
};
use super::envelope::{Acknowledger, Envelope};
use super::errors::{AckError, ConnectError, PublishError};
use crate::config::ConnectionParams;

const CLOSE_OK: u16 = 200;

/// Connects with lapin. Connection, handshake and channel-open failures all
/// surface as a single [`ConnectError`].
#[derive(Debug, Default, Clone)]
pub struct LapinConnector;

pub fn amqp_uri(params: &ConnectionParams) -> AMQPUri {
    AMQPUri {
        scheme: AMQPScheme::AMQP,
        authority: AMQPAuthority {
            userinfo: AMQPUserInfo {
                username: params.username.clone(),
                password: params.password.clone(),
            },
            host: params.host.clone(),
            port: params.port,
        },
        vhost: params.vhost.clone(),
        query: AMQPQueryString {
            heartbeat: params.heartbeat_seconds,
            connection_timeout: params.connection_timeout_ms,
            ..AMQPQueryString::default()
        },
    }
}

#[async_trait]
impl Connector for LapinConnector {
    async fn connect(&self, params: &ConnectionParams) -> Result<BrokerLink, ConnectError> {
        debug!("Connecting to RabbitMQ at {}", params);
        let connection =
            Connection::connect_uri(amqp_uri(params), ConnectionProperties::default()).await?;

        let (mut notifier, lost) = Disconnection::new();
        connection.on_error(move |err| notifier.notify(err.to_string()));

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(err) => {
                let _ = connection.close(CLOSE_OK, "channel open failed").await;
                return Err(err.into());
            }
        };

        info!(channel_id = channel.id(), "Connected to RabbitMQ at {}", params);
        Ok(BrokerLink {
            channel: Arc::new(LapinChannel { connection, channel }),
            lost,
        })
    }
}

pub struct LapinChannel {
    connection: Connection,
    channel: Channel,
}

fn exchange_kind(kind: &str) -> ExchangeKind {
    match kind {
        "direct" => ExchangeKind::Direct,
        "fanout" => ExchangeKind::Fanout,
        "headers" => ExchangeKind::Headers,
        "topic" => ExchangeKind::Topic,
        other => ExchangeKind::Custom(other.to_string()),
    }
}

fn envelope(delivery: Delivery) -> Envelope {
    let content_type = delivery
        .properties
        .content_type()
        .as_ref()
        .map(|ct| ct.as_str().to_string());

    Envelope::new(
        delivery.data,
        content_type,
        delivery.delivery_tag,
        Box::new(LapinAcker(delivery.acker)),
    )
    .with_routing_key(delivery.routing_key.as_str())
    .with_redelivered(delivery.redelivered)
}

#[async_trait]
impl BrokerChannel for LapinChannel {
    async fn declare_exchange(&self, exchange: &ExchangeSpec) -> Result<(), ConnectError> {
        self.channel
            .exchange_declare(
                &exchange.name,
                exchange_kind(&exchange.kind),
                ExchangeDeclareOptions {
                    durable: exchange.durable,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| ConnectError::declare(format!("exchange '{}'", exchange.name), e))
    }

    async fn declare_queue(&self, queue: &QueueSpec) -> Result<(), ConnectError> {
        self.channel
            .queue_declare(
                &queue.name,
                QueueDeclareOptions {
                    durable: queue.durable,
                    auto_delete: queue.auto_delete,
                    exclusive: queue.exclusive,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map(|_| ())
            .map_err(|e| ConnectError::declare(format!("queue '{}'", queue.name), e))
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), ConnectError> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                ConnectError::declare(format!("binding '{}' -> '{}'", exchange, queue), e)
            })
    }

    async fn set_prefetch(&self, prefetch: u16) -> Result<(), ConnectError> {
        self.channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| ConnectError::declare("QoS", e))
    }

    async fn enable_confirms(&self) -> Result<(), ConnectError> {
        self.channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| ConnectError::declare("confirm mode", e))
    }

    async fn consume(&self, queue: &str) -> Result<EnvelopeStream, ConnectError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                &format!("rabbit-pipe-{}", Uuid::new_v4()),
                BasicConsumeOptions {
                    no_ack: false,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| ConnectError::declare(format!("consumer on '{}'", queue), e))?;

        Ok(consumer
            .map(|delivery| delivery.map(envelope).map_err(ConnectError::from))
            .boxed())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: OutboundProperties,
    ) -> Result<(), PublishError> {
        if !self.is_open() {
            return Err(PublishError::StaleChannel);
        }

        let mut basic = BasicProperties::default()
            .with_content_type(properties.content_type.into())
            .with_delivery_mode(properties.delivery_mode)
            .with_message_id(Uuid::new_v4().to_string().into())
            .with_timestamp(chrono::Utc::now().timestamp() as u64);
        if let Some(kind) = properties.message_type {
            basic = basic.with_type(kind.into());
        }

        let confirm = self
            .channel
            .basic_publish(exchange, routing_key, BasicPublishOptions::default(), body, basic)
            .await?;

        match confirm.await? {
            Confirmation::Nack(_) => Err(PublishError::Nacked),
            _ => Ok(()),
        }
    }

    fn is_open(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    async fn close(&self) {
        if self.channel.status().connected() {
            let _ = self.channel.close(CLOSE_OK, "Closing channel").await;
        }
        if self.connection.status().connected() {
            let _ = self.connection.close(CLOSE_OK, "Closing connection").await;
        }
    }
}

struct LapinAcker(Acker);

#[async_trait]
impl Acknowledger for LapinAcker {
    async fn ack(&self, _delivery_tag: u64) -> Result<(), AckError> {
        self.0.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn reject(&self, _delivery_tag: u64, requeue: bool) -> Result<(), AckError> {
        self.0
            .nack(BasicNackOptions {
                requeue,
                ..BasicNackOptions::default()
            })
            .await?;
        Ok(())
    }
}
