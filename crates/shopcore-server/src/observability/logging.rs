//! Structured logging setup.
//!
//! The primitives log through `tracing`: `debug` for flushes and fetches,
//! `warn` for degraded cache lookups and failed flushes or revalidations.
//! This module installs a `tracing-subscriber` that renders those events as
//! pretty text or JSON.
//!
//! ```json
//! {"timestamp":"2026-01-15T10:30:00.000Z","level":"WARN","fields":{"message":"batch flush failed","batch":"variant-prices","size":12},"target":"shopcore_server::batch::window"}
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use shopcore_server::observability::{init_logging, LoggingConfig};
//!
//! init_logging(LoggingConfig::from(&core_config.logging));
//! ```

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

/// Output format and verbosity.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// JSON (true) or pretty text (false).
    pub json_format: bool,
    /// Used when `RUST_LOG` is not set.
    pub default_level: Level,
    /// Emit span enter/exit events.
    pub include_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json_format: false,
            default_level: Level::INFO,
            include_spans: false,
        }
    }
}

impl LoggingConfig {
    pub fn json() -> Self {
        Self {
            json_format: true,
            ..Default::default()
        }
    }

    pub fn text() -> Self {
        Self {
            json_format: false,
            ..Default::default()
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }

    pub fn with_spans(mut self) -> Self {
        self.include_spans = true;
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.default_level.to_string()))
    }

    fn span_events(&self) -> FmtSpan {
        if self.include_spans {
            FmtSpan::ENTER | FmtSpan::EXIT
        } else {
            FmtSpan::NONE
        }
    }
}

/// Installs the global subscriber.
///
/// Returns `false` when a global subscriber was already set; the existing one
/// stays in place.
pub fn init_logging(config: LoggingConfig) -> bool {
    let filter = config.filter();
    let span_events = config.span_events();

    let installed = if config.json_format {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .json()
                .with_span_events(span_events)
                .with_current_span(true)
                .with_target(true)
                .with_file(false)
                .with_line_number(false),
        );
        tracing::subscriber::set_global_default(subscriber).is_ok()
    } else {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .pretty()
                .with_span_events(span_events)
                .with_target(true),
        );
        tracing::subscriber::set_global_default(subscriber).is_ok()
    };

    if installed {
        tracing::debug!(
            json = config.json_format,
            level = %config.default_level,
            "logging initialized"
        );
    }
    installed
}

/// JSON subscriber writing to `writer`, for capturing log output in tests.
pub fn create_json_layer<W>(writer: W) -> impl tracing::Subscriber + Send + Sync
where
    W: for<'writer> tracing_subscriber::fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::registry()
        .with(EnvFilter::new("trace"))
        .with(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_current_span(true),
        )
}
