//! Logging setup from configuration
//!
//! One subscriber for the process: level from config (overridable with
//! RUST_LOG), JSON or text output, and an optional non-blocking file layer.
//! The appender guard is forgotten so the file writer lives as long as the
//! process.

use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

fn env_filter(level: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

/// Initialize the global subscriber. Call once at startup.
pub fn init(config: &LoggingConfig) {
    let stdout_filter = env_filter(&config.level);
    let json = config.format.eq_ignore_ascii_case("json");

    if config.enable_file {
        let path = std::path::Path::new(&config.file_path);
        let directory = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let file_name = path
            .file_name()
            .map_or_else(|| "ntp-exporter.log".into(), ToOwned::to_owned);
        let appender = tracing_appender::rolling::never(directory, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        if json {
            let file_filter = env_filter(&config.level);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(file_filter);

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stdout)
                        .with_filter(stdout_filter),
                )
                .with(file_layer)
                .init();
        } else {
            let file_filter = env_filter(&config.level);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(file_filter);

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stdout)
                        .with_filter(stdout_filter),
                )
                .with(file_layer)
                .init();
        }

        // Keep the appender alive for the program lifetime.
        std::mem::forget(guard);
        return;
    }

    if json {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stdout)
                    .with_filter(stdout_filter),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stdout)
                    .with_filter(stdout_filter),
            )
            .init();
    }
}
