//! Log subscriber setup for embedders that do not install their own.

use anyhow::Result;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::config::DispatcherConfig;

/// Output settings for [`init_tracing`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Filter directives used when `RUST_LOG` is unset, e.g. `"nexusrpc_handler=debug,info"`.
    pub log_filter: String,
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            json: false,
        }
    }
}

impl From<&DispatcherConfig> for TelemetryConfig {
    fn from(config: &DispatcherConfig) -> Self {
        Self {
            log_filter: config.log_filter.clone(),
            json: config.json_logs,
        }
    }
}

/// Installs a global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `config.log_filter`. Returns `Ok(false)`
/// if a global subscriber was already installed, leaving it in place.
///
/// # Errors
///
/// Returns an error if the filter directives cannot be parsed.
pub fn init_tracing(config: &TelemetryConfig) -> Result<bool> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.log_filter))?;
    let registry = Registry::default().with(filter);

    let installed = if config.json {
        registry
            .with(fmt::layer().json().with_current_span(true).with_span_list(true))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };
    Ok(installed.is_ok())
}
