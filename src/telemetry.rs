use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{BotError, Result};

/// `RUST_LOG` wins over the configured filter when it is set.
fn env_filter(cfg: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&cfg.filter)
            .map_err(|err| BotError::Config(format!("invalid log filter `{}`: {err}", cfg.filter))),
    }
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init_tracing(cfg: &LoggingConfig) -> Result<()> {
    let filter = env_filter(cfg)?;
    let registry = Registry::default().with(filter);
    let installed = match cfg.format {
        LogFormat::Json => registry.with(fmt::layer().json().with_target(true)).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init(),
    };
    installed.map_err(|err| BotError::Config(format!("failed to install tracing subscriber: {err}")))
}
