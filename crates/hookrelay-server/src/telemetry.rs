//! Logging setup.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use hookrelay_config::LoggingConfig;

/// Initialize the global subscriber. `RUST_LOG` overrides the configured
/// level when set.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if config.json {
        subscriber
            .with(fmt::layer().json().with_target(true))
            .try_init()
            .map_err(|e| anyhow::anyhow!("logging init: {e}"))?;
    } else {
        subscriber
            .with(fmt::layer().with_target(true))
            .try_init()
            .map_err(|e| anyhow::anyhow!("logging init: {e}"))?;
    }
    Ok(())
}
