// src/rabbitmq/mod.rs
// Broker-facing half of the pipeline: connection seam, topology, sessions.

pub mod amqp_client;
pub mod backoff;
pub mod connection;
pub mod consumer;
pub mod envelope;
pub mod errors;
pub mod publisher;
pub mod session;
pub mod topology;

// Re-export specific items to simplify imports elsewhere
pub use amqp_client::{
    BrokerChannel, BrokerLink, Connector, DisconnectNotifier, Disconnection, EnvelopeStream,
    ExchangeSpec, OutboundProperties, QueueSpec,
};
pub use connection::LapinConnector;
pub use consumer::InboundSession;
pub use envelope::{Acknowledger, Envelope};
pub use errors::{
    AckError, BoxError, ConnectError, PipelineError, ProcessError, PublishError, TemplateError,
};
pub use publisher::{GateWatcher, OutboundSession, Publisher, ReadinessGate};
pub use session::SessionState;
