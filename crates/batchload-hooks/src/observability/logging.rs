//! Subscriber setup for the events and spans batch loading emits.
//!
//! Everything is driven by [`LoggingSettings`]. `RUST_LOG`, when set, takes
//! precedence over `logging.level` for the global subscriber.
//!
//! With `json: true` every line is one object; a wave looks like
//!
//! ```json
//! {"timestamp":"...","level":"DEBUG","fields":{"message":"batch wave completed","group":"users","items":2,"filled":0,"still_pending":0},"target":"batchload_core::wave"}
//! ```
//!
//! and `include_spans: true` adds a `close` line per `batch_wave` and
//! `batch_scope` span carrying its busy and idle time.

use tracing::Subscriber;
use tracing_subscriber::fmt::{self, format::FmtSpan, MakeWriter};
use tracing_subscriber::{prelude::*, EnvFilter};

use crate::config::LoggingSettings;

/// Installs the global subscriber described by `settings`, writing to stdout.
///
/// Returns false if a global subscriber was already installed.
pub fn init_logging(settings: &LoggingSettings) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| level_filter(settings));
    tracing::subscriber::set_global_default(build(settings, filter, std::io::stdout)).is_ok()
}

/// Subscriber described by `settings`, writing to `writer`.
///
/// Unlike [`init_logging`] this ignores `RUST_LOG` and installs nothing, so
/// callers can scope it with `tracing::subscriber::with_default`.
pub fn subscriber_for<W>(settings: &LoggingSettings, writer: W) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    build(settings, level_filter(settings), writer)
}

fn level_filter(settings: &LoggingSettings) -> EnvFilter {
    EnvFilter::new(settings.level.to_lowercase())
}

fn build<W>(settings: &LoggingSettings, filter: EnvFilter, writer: W) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let span_events = if settings.include_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_span_events(span_events);

    if settings.json {
        Box::new(
            tracing_subscriber::registry()
                .with(filter)
                .with(layer.json().with_current_span(true)),
        )
    } else {
        Box::new(tracing_subscriber::registry().with(filter).with(layer.pretty()))
    }
}
