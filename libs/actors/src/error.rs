//! Runtime Error Types
//!
//! Error taxonomy for the actor runtime. Contract violations are fatal and go
//! through [`fatal`]; everything else is returned as a [`RuntimeError`].

use thiserror::Error;
use tracing::error;

/// Main runtime error type
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Chained argument had a different type than the behavior expected
    #[error("Argument error: index {index} expected {expected}, found {found}")]
    ArgumentType {
        index: usize,
        expected: &'static str,
        found: String,
    },

    /// Chained message carried too few arguments
    #[error("Argument count error: index {index} requested but only {available} available")]
    ArgumentCount { index: usize, available: usize },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Worker pool could not be created or managed
    #[error("Scheduler error: {message}")]
    Scheduler {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A worker thread died while running a behavior
    #[error("Worker fault: {faulted} worker thread(s) terminated by a panicking behavior")]
    WorkerFault { faulted: usize },

    /// Runtime API used in a way that can never succeed
    #[error("Contract violation: {message}")]
    ContractViolation { message: String },

    /// Remote transport errors
    #[error("Remote error: {message}")]
    Remote {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Remote invocation encoding errors
    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Blocking waits that gave up
    #[error("Timeout error: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },
}

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

impl RuntimeError {
    /// Create an argument type error
    pub fn argument_type(index: usize, expected: &'static str, found: impl Into<String>) -> Self {
        Self::ArgumentType {
            index,
            expected,
            found: found.into(),
        }
    }

    /// Create an argument count error
    pub fn argument_count(index: usize, available: usize) -> Self {
        Self::ArgumentCount { index, available }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    /// Create a scheduler error
    pub fn scheduler(message: impl Into<String>) -> Self {
        Self::Scheduler {
            message: message.into(),
            source: None,
        }
    }

    /// Create a scheduler error with source
    pub fn scheduler_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Scheduler {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a contract violation
    pub fn contract(message: impl Into<String>) -> Self {
        Self::ContractViolation {
            message: message.into(),
        }
    }

    /// Create a remote error
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            source: None,
        }
    }

    /// Create a remote error with source
    pub fn remote_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Remote {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a serialization error with source
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Programmer errors: wrong arguments, misuse of blocking calls.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::ArgumentType { .. } | Self::ArgumentCount { .. } | Self::ContractViolation { .. }
        )
    }

    /// Error category for structured logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::ArgumentType { .. } | Self::ArgumentCount { .. } => "argument",
            Self::Configuration { .. } => "configuration",
            Self::Scheduler { .. } => "scheduler",
            Self::WorkerFault { .. } => "worker_fault",
            Self::ContractViolation { .. } => "contract",
            Self::Remote { .. } => "remote",
            Self::Serialization { .. } => "serialization",
            Self::Timeout { .. } => "timeout",
        }
    }
}

/// Abort the current thread with a diagnosable fault.
///
/// Contract violations are never recovered: running on with wrong arguments
/// or a deadlocked worker would corrupt actor state silently.
#[track_caller]
pub fn fatal(err: RuntimeError) -> ! {
    let location = std::panic::Location::caller();
    error!(
        error = %err,
        category = err.category(),
        location = %location,
        "Fatal actor runtime fault"
    );
    panic!("{err}");
}
