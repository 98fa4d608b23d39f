// src/env.rs
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};

use crate::config::{
    default_content_type_template, default_exchange_kind, default_log_level, default_requeue,
    ConnectionParams, ConsumeTopology, InboundConfig, LogConfig, OutboundConfig, PipeConfig,
    PublishTopology,
};

/// Builds a [`PipeConfig`] from `CONTENT_TYPE`, `RQ_IN_*`, `RQ_OUT_*`,
/// `LOG_FILE` and `LOG_LEVEL` environment variables.
pub fn from_env(publish: bool) -> Result<PipeConfig> {
    from_lookup(publish, |key| std::env::var(key).ok())
}

pub fn from_lookup<F>(publish: bool, lookup: F) -> Result<PipeConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let vars = Vars { lookup };

    let inbound = InboundConfig {
        connection: vars.connection("RQ_IN")?,
        topology: ConsumeTopology {
            exchange: vars.required("RQ_IN_EXCHANGE")?,
            exchange_kind: vars.or("RQ_IN_EXCHANGE_TYPE", default_exchange_kind),
            queue: vars.required("RQ_IN_QUEUE")?,
            routing_key: vars.required("RQ_IN_ROUTING_KEY")?,
            prefetch: vars.parsed("RQ_IN_QOS")?.unwrap_or(0),
        },
    };

    let outbound = if publish {
        Some(OutboundConfig {
            connection: vars.connection("RQ_OUT")?,
            topology: PublishTopology {
                exchange: vars.required("RQ_OUT_EXCHANGE")?,
                exchange_kind: vars.or("RQ_OUT_EXCHANGE_TYPE", default_exchange_kind),
                routing_key_template: vars.required("RQ_OUT_ROUTING_KEY_TPL")?,
                content_type_template: vars
                    .or("RQ_OUT_CONTENT_TYPE_TPL", default_content_type_template),
                confirm: vars.parsed("RQ_OUT_CONFIRM")?.unwrap_or(false),
            },
        })
    } else {
        None
    };

    let config = PipeConfig {
        content_type: vars.get("CONTENT_TYPE"),
        inbound,
        outbound,
        log: LogConfig {
            file: vars.get("LOG_FILE").map(PathBuf::from),
            level: vars.or("LOG_LEVEL", default_log_level),
        },
        requeue_on_failure: vars.parsed("REQUEUE_ON_FAILURE")?.unwrap_or_else(default_requeue),
    };

    config.validate()?;
    Ok(config)
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|value| !value.is_empty())
    }

    fn or(&self, key: &str, default: fn() -> String) -> String {
        self.get(key).unwrap_or_else(default)
    }

    fn required(&self, key: &str) -> Result<String> {
        self.get(key)
            .ok_or_else(|| anyhow!("Environment variable {} is required", key))
    }

    fn parsed<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        self.get(key)
            .map(|value| value.parse::<T>())
            .transpose()
            .with_context(|| format!("Environment variable {} has an invalid value", key))
    }

    fn connection(&self, prefix: &str) -> Result<ConnectionParams> {
        let defaults = ConnectionParams::default();
        Ok(ConnectionParams {
            host: self.get(&format!("{prefix}_HOST")).unwrap_or(defaults.host),
            port: self.parsed(&format!("{prefix}_PORT"))?.unwrap_or(defaults.port),
            vhost: self.get(&format!("{prefix}_VHOST")).unwrap_or(defaults.vhost),
            username: self.get(&format!("{prefix}_USER")).unwrap_or(defaults.username),
            password: self.get(&format!("{prefix}_PASSWORD")).unwrap_or(defaults.password),
            heartbeat_seconds: self.parsed("RQ_HEARTBEAT")?,
            connection_timeout_ms: self.parsed("RQ_CONNECT_TIMEOUT_MS")?,
        })
    }
}
