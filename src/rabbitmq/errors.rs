// src/rabbitmq/errors.rs

use lapin::Error as LapinError;
use thiserror::Error;

/// Error type returned by integrator callbacks (converter, action, init).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure to establish a usable channel: transport, handshake or topology
/// declaration. Always treated as transient by the owning session.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("RabbitMQ connection error: {0}")]
    Broker(#[from] LapinError),

    #[error("Failed to declare {entity}: {reason}")]
    Declare { entity: String, reason: String },

    #[error("Connection lost: {0}")]
    Lost(String),
}

impl ConnectError {
    pub fn declare(entity: impl Into<String>, reason: impl ToString) -> Self {
        ConnectError::Declare {
            entity: entity.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("RabbitMQ publish error: {0}")]
    Broker(#[from] LapinError),

    #[error("Outbound channel is no longer open")]
    StaleChannel,

    #[error("Publisher has shut down")]
    Closed,

    #[error("Broker did not confirm the publish")]
    Nacked,

    #[error("Message serialization error: {0}")]
    Serialization(BoxError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("Publish task aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Error)]
pub enum AckError {
    #[error("RabbitMQ acknowledge error: {0}")]
    Broker(#[from] LapinError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Unbalanced brace at position {0} in template '{1}'")]
    Unbalanced(usize, String),

    #[error("Unsupported placeholder '{{{0}}}'")]
    Placeholder(String),

    #[error("Message has no field '{0}'")]
    MissingField(String),
}

/// Why a single envelope was rejected. Never escapes the envelope boundary.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("{0}")]
    Conversion(BoxError),

    #[error("{0}")]
    Action(BoxError),

    #[error("{0}")]
    Publish(#[from] PublishError),
}

impl ProcessError {
    /// Short name of the failure class, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessError::Conversion(_) => "ConversionError",
            ProcessError::Action(_) => "ActionError",
            ProcessError::Publish(_) => "PublishError",
        }
    }
}

/// Errors raised before any session loop starts. These stop the process.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Initialization failed: {0}")]
    Init(BoxError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Template(#[from] TemplateError),
}
