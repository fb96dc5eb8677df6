// Process-wide initialisation

use audit2rollup_config::{LogFormat, LoggingConfig};

/// Initialize tracing/logging from the logging section
pub fn init_tracing(config: &LoggingConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter =
        EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    // CloudWatch adds its own timestamps and does not render ANSI colour
    let _ = match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_ansi(false).without_time()),
        ),
        LogFormat::Text => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().with_ansi(false).without_time()),
        ),
    };
}
