//! Logging bootstrap.

use tracing_subscriber::EnvFilter;

/// Initialize JSON-formatted structured logging.
///
/// Filtering follows `RUST_LOG`, defaulting to `info`. Safe to call more
/// than once; only the first call installs the subscriber (so tests and
/// embedding binaries can both call it).
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_logging();
        init_logging();
    }
}
