//! Error types for the fiber core

use crate::fiber::FiberId;
use std::backtrace::Backtrace;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while loading or installing configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a configuration file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is present but unusable
    #[error("Invalid config value for {key}: {reason}")]
    Invalid {
        /// Lookup name of the offending value
        key: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// `config::install` was called after the configuration was fixed
    #[error("Configuration already installed")]
    AlreadyInstalled,
}

/// Errors raised by the OS-backed semaphore
#[derive(Debug, Error)]
pub enum SemaphoreError {
    /// `sem_init` failed
    #[error("sem_init failed: {0}")]
    Init(#[source] std::io::Error),
}

/// A panic that escaped a fiber callback and was contained at its entry point
#[derive(Debug, Clone, Error)]
#[error("fiber {fiber_id} panicked: {message}")]
pub struct FiberPanic {
    /// Fiber whose callback panicked
    pub fiber_id: FiberId,

    /// Panic payload rendered as text
    pub message: String,

    /// Stack trace captured where the panic was caught
    pub trace: Arc<Backtrace>,
}

impl FiberPanic {
    pub(crate) fn from_payload(fiber_id: FiberId, payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self {
            fiber_id,
            message,
            trace: Arc::new(Backtrace::capture()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_payload_rendering() {
        let id = FiberId::from_u64(7);

        let err = FiberPanic::from_payload(id, &"boom");
        assert_eq!(err.message, "boom");
        assert_eq!(err.to_string(), "fiber 7 panicked: boom");

        let err = FiberPanic::from_payload(id, &String::from("formatted 42"));
        assert_eq!(err.message, "formatted 42");

        let err = FiberPanic::from_payload(id, &42u32);
        assert_eq!(err.message, "non-string panic payload");
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Invalid {
            key: "fiber.stack_size",
            reason: "too small".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid config value for fiber.stack_size: too small"
        );
    }
}
