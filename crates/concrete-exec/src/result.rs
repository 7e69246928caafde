//! Result and error types for concrete execution.
//!
//! Failures of *user code* are never errors here: they are values of
//! [`crate::model::ExecutionResult`]. `ExecError` covers infrastructure
//! problems only.

use thiserror::Error;

/// Result type for concrete-exec operations
pub type ExecResult<T> = Result<T, ExecError>;

/// Errors that can occur while constructing, executing or transporting models
#[derive(Debug, Error)]
pub enum ExecError {
    /// Class could not be resolved on the worker class path
    #[error("Class not found: {name}")]
    ClassNotFound {
        /// Fully qualified class name
        name: String,
    },

    /// Method or constructor could not be resolved
    #[error("Executable not found: {class}.{signature}")]
    ExecutableNotFound {
        /// Declaring class
        class: String,
        /// Signature that was looked up
        signature: String,
    },

    /// Field could not be resolved
    #[error("Field not found: {class}.{field}")]
    FieldNotFound {
        /// Declaring class
        class: String,
        /// Field name
        field: String,
    },

    /// Object id does not refer to a live heap object
    #[error("Heap error: {message}")]
    Heap {
        /// Error message
        message: String,
    },

    /// A model could not be turned into a live value
    #[error("Value construction failed: {message}")]
    Construction {
        /// Error message
        message: String,
    },

    /// A forbidden operation was attempted
    #[error("Sandbox violation: {message}")]
    Sandbox {
        /// Error message
        message: String,
    },

    /// A stream value was consumed before it could be observed
    #[error("Stream of type {class} was already consumed")]
    StreamConsumed {
        /// Runtime class of the stream
        class: String,
    },

    /// Mock could not be installed or resolved
    #[error("Mock resolution failed: {message}")]
    MockResolution {
        /// Error message
        message: String,
    },

    /// Malformed frame or unexpected message
    #[error("Protocol error: {message}")]
    Protocol {
        /// Error message
        message: String,
    },

    /// Worker process is gone
    #[error("Worker process died: {message}")]
    ProcessDeath {
        /// Error message
        message: String,
    },

    /// Worker cannot continue and must be discarded
    #[error("Worker poisoned: {message}")]
    WorkerPoisoned {
        /// Error message
        message: String,
    },

    /// The worker reported a failure while serving a request
    #[error("Worker reported: {message}")]
    Remote {
        /// Error message
        message: String,
    },

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Payload encoding failure
    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// Configuration file parsing failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecError {
    /// Create a heap error
    #[must_use]
    pub fn heap(message: impl Into<String>) -> Self {
        Self::Heap {
            message: message.into(),
        }
    }

    /// Create a construction error
    #[must_use]
    pub fn construction(message: impl Into<String>) -> Self {
        Self::Construction {
            message: message.into(),
        }
    }

    /// Create a sandbox error
    #[must_use]
    pub fn sandbox(message: impl Into<String>) -> Self {
        Self::Sandbox {
            message: message.into(),
        }
    }

    /// Create a mock resolution error
    #[must_use]
    pub fn mock_resolution(message: impl Into<String>) -> Self {
        Self::MockResolution {
            message: message.into(),
        }
    }

    /// Create a protocol error
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a process death error
    #[must_use]
    pub fn process_death(message: impl Into<String>) -> Self {
        Self::ProcessDeath {
            message: message.into(),
        }
    }

    /// Create a worker poisoned error
    #[must_use]
    pub fn poisoned(message: impl Into<String>) -> Self {
        Self::WorkerPoisoned {
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a class-not-found error
    #[must_use]
    pub fn class_not_found(name: impl Into<String>) -> Self {
        Self::ClassNotFound { name: name.into() }
    }

    /// Create an executable-not-found error
    #[must_use]
    pub fn executable_not_found(class: impl Into<String>, signature: impl Into<String>) -> Self {
        Self::ExecutableNotFound {
            class: class.into(),
            signature: signature.into(),
        }
    }

    /// Create a field-not-found error
    #[must_use]
    pub fn field_not_found(class: impl Into<String>, field: impl Into<String>) -> Self {
        Self::FieldNotFound {
            class: class.into(),
            field: field.into(),
        }
    }

    /// Whether the worker behind this error must be replaced
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::ProcessDeath { .. } | Self::WorkerPoisoned { .. })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_class_not_found_message() {
        let err = ExecError::class_not_found("samples.Missing");
        assert!(err.to_string().contains("samples.Missing"));
    }

    #[test]
    fn test_executable_not_found_message() {
        let err = ExecError::executable_not_found("a.B", "run()void");
        assert_eq!(err.to_string(), "Executable not found: a.B.run()void");
    }

    #[test]
    fn test_fatal_errors() {
        assert!(ExecError::process_death("eof").is_fatal());
        assert!(ExecError::poisoned("stuck").is_fatal());
        assert!(!ExecError::protocol("bad frame").is_fatal());
        assert!(!ExecError::construction("null").is_fatal());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: ExecError = io.into();
        assert!(matches!(err, ExecError::Io(_)));
    }
}
