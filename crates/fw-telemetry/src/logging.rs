use tracing_subscriber::{fmt, EnvFilter};

/// Output format for [`init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Human,
    Json,
}

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize logging with human-readable output.
///
/// `RUST_LOG` wins over `default_level` (e.g. "info", "fw_daemon=debug,warn").
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_logging(service_name: &str, default_level: &str) {
    let installed = fmt()
        .with_env_filter(filter(default_level))
        .with_target(true)
        .with_level(true)
        .try_init()
        .is_ok();
    if installed {
        tracing::info!(service = service_name, "logging initialised (human-readable)");
    }
}

/// Initialize logging with one JSON object per line.
pub fn init_logging_json(service_name: &str, default_level: &str) {
    let installed = fmt()
        .json()
        .with_env_filter(filter(default_level))
        .with_target(true)
        .with_current_span(true)
        .with_level(true)
        .try_init()
        .is_ok();
    if installed {
        tracing::info!(service = service_name, "logging initialised (json)");
    }
}

pub fn init(service_name: &str, default_level: &str, format: Format) {
    match format {
        Format::Human => init_logging(service_name, default_level),
        Format::Json => init_logging_json(service_name, default_level),
    }
}
