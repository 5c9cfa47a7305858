//! # latch-logging
//!
//! Structured logging with `tracing`.
//!
//! [`init_subscriber`] installs the global subscriber once at startup: an
//! `EnvFilter` (`RUST_LOG` wins, otherwise the configured level plus
//! per-module overrides) feeding a `fmt` layer that writes either JSON lines
//! or human-readable output to stdout.

#![deny(unsafe_code)]

use latch_settings::LoggingSettings;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The configured directives could not be parsed.
    #[error("invalid log filter {directives:?}: {message}")]
    Filter {
        /// The rejected directive string.
        directives: String,
        /// Parser message.
        message: String,
    },
    /// A global subscriber was already installed.
    #[error("logging already initialised: {0}")]
    AlreadyInitialised(String),
}

/// Build the filter directive string for `settings`, e.g. `info,latch_server=debug`.
pub fn filter_directives(settings: &LoggingSettings) -> String {
    let mut directives = settings.level.to_lowercase();
    for (module, level) in &settings.modules {
        directives.push(',');
        directives.push_str(module);
        directives.push('=');
        directives.push_str(&level.to_lowercase());
    }
    directives
}

/// Build the `EnvFilter`, preferring `RUST_LOG` when it is set and valid.
pub fn build_filter(settings: &LoggingSettings) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directives = filter_directives(settings);
    EnvFilter::try_new(&directives).map_err(|e| LoggingError::Filter {
        directives,
        message: e.to_string(),
    })
}

/// Install the global tracing subscriber. Call once at startup.
pub fn init_subscriber(settings: &LoggingSettings) -> Result<(), LoggingError> {
    let filter = build_filter(settings)?;

    let fmt_layer = if settings.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(true).boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(filter))
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialised(e.to_string()))
}
