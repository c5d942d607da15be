use crate::constants;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Directory for the rolling JSON log, `GATEWAY_LOG_DIR` or `logs`.
pub fn log_dir() -> String {
    std::env::var(constants::env::LOG_DIR).unwrap_or_else(|_| "logs".to_string())
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Stdout plus a daily-rotated JSON file. Keep the guard alive for the
/// lifetime of the process or buffered lines are lost.
pub fn init_logging() -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(log_dir(), "gateway.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(env_filter()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .json()
                .with_filter(env_filter()),
        )
        .init();

    guard
}
