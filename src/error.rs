//! Error types for the APM layer.
//!
//! Instrumentation must never fail the operation it observes, so most of this
//! crate recovers locally (log and degrade) instead of returning errors. The
//! variants here cover the places where failing is the right answer: invalid
//! configuration at construction time and the admin server's own lifecycle.

use thiserror::Error;

/// Errors surfaced by APM construction and the admin server.
#[derive(Debug, Error)]
pub enum ApmError {
    /// Configuration rejected at construction time.
    #[error("invalid configuration: {details}")]
    Config {
        /// What was wrong with the configuration
        details: String,
    },

    /// The admin server could not bind its listener.
    #[error("admin server failed to bind {addr}")]
    Bind {
        /// The address that could not be bound
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The admin server terminated with an I/O error.
    #[error("admin server terminated")]
    Serve {
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ApmError::Config {
            details: "request timeout must be positive".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid configuration: request timeout must be positive"
        );
    }

    #[test]
    fn test_bind_error_carries_source() {
        let err = ApmError::Bind {
            addr: "127.0.0.1:9464".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(err.to_string().contains("127.0.0.1:9464"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
