//! Tracing subscriber setup.

use tide_settings::LoggingSettings;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level. Output goes to stderr, as JSON
/// lines when `settings.json` is set. Subsequent calls are no-ops.
pub fn init_logging(settings: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    let _ = if settings.json {
        builder.json().with_current_span(true).try_init()
    } else {
        builder.compact().try_init()
    };
}
