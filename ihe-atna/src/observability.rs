//! Tracing setup for audit nodes

use tracing_subscriber::EnvFilter;

use crate::{config::Config, error::Result};

fn env_filter(config: &Config) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.service.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize structured JSON logging
///
/// `RUST_LOG` wins over `service.log_level`. Returns `Ok` without changes if a
/// global subscriber is already installed.
#[cfg(feature = "observability")]
pub fn init_tracing(config: &Config) -> Result<()> {
    let installed = tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter(config))
        .try_init();

    match installed {
        Ok(()) => tracing::info!("Tracing initialized for service: {}", config.service.name),
        Err(_) => tracing::debug!("Global tracing subscriber already set"),
    }

    Ok(())
}

/// Initialize plain-text logging
#[cfg(not(feature = "observability"))]
pub fn init_tracing(config: &Config) -> Result<()> {
    let installed = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(env_filter(config))
        .try_init();

    if installed.is_ok() {
        tracing::info!("Tracing initialized for service: {}", config.service.name);
    }

    Ok(())
}

/// Flush and stop tracing
pub fn shutdown_tracing() {
    tracing::info!("Tracing shutdown complete");
}
