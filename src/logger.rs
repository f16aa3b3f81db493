//! Logging initialisation via tracing-subscriber.
//!
//! Call [`init`] once at startup. Diagnostics go to stderr so the message
//! feed on stdout stays clean.

use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// Initialise the global tracing subscriber.
///
/// `RUST_LOG` takes precedence when set; `level` is the fallback and
/// accepts the standard level strings (`"error"`, `"warn"`, `"info"`,
/// `"debug"`, `"trace"`).
pub fn init(level: &str) -> Result<(), AppError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| AppError::Logger(format!("invalid log level '{level}': {e}")))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| AppError::Logger(format!("failed to set subscriber: {e}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_info_succeeds_or_already_init() {
        // May already be set by a prior test in the same process; both
        // outcomes are fine.
        match init("info") {
            Ok(()) => {}
            Err(AppError::Logger(msg)) if msg.contains("set subscriber") => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn invalid_level_errors_when_env_unset() {
        // Only meaningful when RUST_LOG is not set; skip otherwise.
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert!(init("not-a-level").is_err());
    }
}
