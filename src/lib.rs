//! Resilient AMQP pipeline runtime: consume from one RabbitMQ topology, run
//! each message through a user action, publish the results to another, and
//! keep both connections alive across broker outages.

pub mod config;
pub mod env;
pub mod logging;
pub mod message;
pub mod pipeline;
pub mod processor;
pub mod rabbitmq;

pub use config::PipeConfig;
pub use message::{Json, OutboundMessage, Outcome, Serializable};
pub use pipeline::{Pipeline, PipelineHandle};
pub use processor::{Action, Converter, Disposition, MessageProcessor};
