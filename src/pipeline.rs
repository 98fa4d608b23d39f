// src/pipeline.rs
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::PipeConfig;
use crate::message::OutboundMessage;
use crate::processor::{Action, Converter, MessageProcessor};
use crate::rabbitmq::{
    BoxError, Connector, InboundSession, LapinConnector, OutboundSession, PipelineError,
    SessionState,
};

type InitFn = Box<dyn FnOnce(PipeConfig) -> BoxFuture<'static, Result<(), BoxError>> + Send>;

/// Wires converter, action and both sessions together.
pub struct Pipeline<M, R> {
    config: PipeConfig,
    connector: Arc<dyn Connector>,
    processor: MessageProcessor<M, R>,
    init: Option<InitFn>,
}

impl<M, R> Pipeline<M, R>
where
    M: Send + 'static,
    R: OutboundMessage,
{
    pub fn new(config: PipeConfig, converter: impl Converter<M>, action: impl Action<M, R>) -> Self {
        Self {
            config,
            connector: Arc::new(LapinConnector),
            processor: MessageProcessor::new(converter, action),
            init: None,
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Runs once, before any session starts. A failure aborts startup.
    pub fn with_init<F, Fut>(mut self, init: F) -> Self
    where
        F: FnOnce(PipeConfig) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.init = Some(Box::new(move |config| init(config).boxed()));
        self
    }

    /// Validates, runs the init hook, then spawns the inbound session and,
    /// if publishing is enabled, the outbound session. Neither awaits the other.
    pub async fn start(self) -> Result<PipelineHandle, PipelineError> {
        let Pipeline {
            config,
            connector,
            processor,
            init,
        } = self;

        config
            .validate()
            .map_err(|e| PipelineError::Config(format!("{:#}", e)))?;

        if let Some(init) = init {
            info!("Initialization...");
            init(config.clone()).await.map_err(PipelineError::Init)?;
        }

        let mut processor = processor
            .with_content_type(config.content_type.clone())
            .with_requeue_on_failure(config.requeue_on_failure);

        let outbound = match &config.outbound {
            Some(outbound) => {
                let session = OutboundSession::new(
                    connector.clone(),
                    outbound.connection.clone(),
                    outbound.topology.clone(),
                );
                processor = processor.with_publisher(session.publisher()?);
                Some(session)
            }
            None => None,
        };

        let inbound = InboundSession::new(
            connector,
            config.inbound.connection.clone(),
            config.inbound.topology.clone(),
            Arc::new(processor),
        );

        info!("Connecting to RabbitMQ server to consume...");
        let inbound_state = inbound.state();
        let inbound = tokio::spawn(inbound.run());

        let (outbound, outbound_state) = match outbound {
            Some(session) => {
                info!("Connecting to RabbitMQ server to publish...");
                let state = session.state();
                (Some(tokio::spawn(session.run())), Some(state))
            }
            None => (None, None),
        };

        Ok(PipelineHandle {
            inbound,
            outbound,
            inbound_state,
            outbound_state,
        })
    }

    /// Starts the pipeline and keeps it running until Ctrl-C.
    pub async fn run(self) -> Result<(), PipelineError> {
        let handle = self.start().await?;

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for shutdown signal ({}), running until killed", e);
            futures::future::pending::<()>().await;
        }

        info!("Shutting down pipeline");
        handle.shutdown();
        Ok(())
    }
}

/// Running sessions of a started [`Pipeline`].
pub struct PipelineHandle {
    inbound: JoinHandle<()>,
    outbound: Option<JoinHandle<()>>,
    inbound_state: watch::Receiver<SessionState>,
    outbound_state: Option<watch::Receiver<SessionState>>,
}

impl PipelineHandle {
    pub fn inbound_state(&self) -> watch::Receiver<SessionState> {
        self.inbound_state.clone()
    }

    /// `None` when publishing is disabled.
    pub fn outbound_state(&self) -> Option<watch::Receiver<SessionState>> {
        self.outbound_state.clone()
    }

    pub fn shutdown(self) {
        self.inbound.abort();
        if let Some(outbound) = self.outbound {
            outbound.abort();
        }
    }
}
