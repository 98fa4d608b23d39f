use anyhow::Result;
use rabbit_pipe::config::{self, LogConfig};
use rabbit_pipe::message::utf8_text;
use rabbit_pipe::rabbitmq::BoxError;
use rabbit_pipe::{logging, Outcome, Pipeline};
use tracing::error;

/// Default action: republish every text message unchanged.
async fn relay(message: String) -> Result<Outcome<String>, BoxError> {
    Ok(Outcome::One(message))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = match config::load_config(true) {
        Ok(config) => config,
        Err(e) => {
            // No configured destination yet; report on stderr at the default level.
            let _guard = logging::init(&LogConfig::default())?;
            error!("{:#}", e);
            return Err(e);
        }
    };
    let _guard = logging::init(&config.log)?;

    if let Err(e) = Pipeline::new(config, utf8_text, relay).run().await {
        error!("{}", e);
        return Err(e.into());
    }
    Ok(())
}
