//! Logging setup
//!
//! Installs a `tracing-subscriber` registry whose `EnvFilter` sits behind a
//! reload layer, so a tunnel run can change verbosity without reinstalling the
//! subscriber.

use tracing::Subscriber;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::{fmt, reload, EnvFilter, Layer, Registry};

use crate::config::LogConfig;
use crate::error::LoggingError;

type FilteredRegistry = Layered<reload::Layer<EnvFilter, Registry>, Registry>;

/// Handle for changing the log filter at runtime
#[derive(Debug, Clone)]
pub struct LogHandle {
    handle: reload::Handle<EnvFilter, Registry>,
}

impl LogHandle {
    /// Replace the active filter
    ///
    /// `directive` is a level ("debug") or any `EnvFilter` directive string.
    ///
    /// # Errors
    ///
    /// Returns [`LoggingError`] if the directive is invalid or the subscriber
    /// is gone.
    pub fn set_level(&self, directive: &str) -> Result<(), LoggingError> {
        let filter = build_filter(directive)?;
        self.handle
            .reload(filter)
            .map_err(|e| LoggingError::Reload(e.to_string()))?;
        tracing::debug!(directive, "Log filter replaced");
        Ok(())
    }
}

/// Parse a filter directive
///
/// # Errors
///
/// Returns [`LoggingError::InvalidFilter`] if the directive does not parse.
pub fn build_filter(directive: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(directive.trim()).map_err(|e| LoggingError::InvalidFilter {
        directive: directive.to_string(),
        reason: e.to_string(),
    })
}

/// Build the subscriber described by `config` without installing it
///
/// # Errors
///
/// Returns [`LoggingError::InvalidFilter`] if `config.level` does not parse.
pub fn build_subscriber(
    config: &LogConfig,
) -> Result<(impl Subscriber + Send + Sync + 'static, LogHandle), LoggingError> {
    let (filter, handle) = reload::Layer::new(build_filter(&config.level)?);

    let fmt_layer: Box<dyn Layer<FilteredRegistry> + Send + Sync> =
        match (config.is_json(), config.timestamps) {
            (true, true) => fmt::layer().json().with_target(config.target).boxed(),
            (true, false) => fmt::layer()
                .json()
                .without_time()
                .with_target(config.target)
                .boxed(),
            (false, true) => fmt::layer().with_target(config.target).boxed(),
            (false, false) => fmt::layer()
                .without_time()
                .with_target(config.target)
                .boxed(),
        };

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
    Ok((subscriber, LogHandle { handle }))
}

/// Install the global subscriber
///
/// # Errors
///
/// Returns [`LoggingError`] if the level does not parse or a global
/// subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<LogHandle, LoggingError> {
    let (subscriber, handle) = build_subscriber(config)?;
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| LoggingError::Install(e.to_string()))?;
    Ok(handle)
}
