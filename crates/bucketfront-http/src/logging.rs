//! Tracing subscriber setup shared by the origin and edge binaries.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::ParseError;

/// Build the log filter. `RUST_LOG`, when set, wins over `log_level`.
pub fn log_filter(log_level: &str, rust_log: Option<&str>) -> Result<EnvFilter, ParseError> {
    match rust_log {
        Some(directives) => Ok(EnvFilter::new(directives)),
        None => EnvFilter::try_new(log_level),
    }
}

/// Install the global fmt subscriber.
pub fn init_tracing(log_level: &str) -> Result<(), ParseError> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = log_filter(log_level, rust_log.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    Ok(())
}
