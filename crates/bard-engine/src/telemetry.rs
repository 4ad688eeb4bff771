//! Tracing subscriber setup for the runner binary

use bard_core::{LogFormat, LoggingSettings};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Subscriber installation failures
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Filter directive did not parse
    #[error("invalid log filter '{filter}': {message}")]
    Filter {
        /// Directive as configured
        filter: String,
        /// Parser message
        message: String,
    },

    /// A global subscriber is already set
    #[error("failed to install subscriber: {0}")]
    Init(String),
}

/// Install the global subscriber. `RUST_LOG` wins over the configured filter.
/// Output goes to stderr so stdout stays machine-readable.
///
/// # Errors
/// Bad filter directive or a subscriber already installed.
pub fn init(settings: &LoggingSettings) -> Result<(), TelemetryError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.filter).map_err(|e| TelemetryError::Filter {
            filter: settings.filter.clone(),
            message: e.to_string(),
        })?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match settings.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init(),
    };
    installed.map_err(|e| TelemetryError::Init(e.to_string()))?;

    tracing::debug!(filter = %settings.filter, format = ?settings.format, "telemetry initialized");
    Ok(())
}
