//! Error types for dispatch, routing, configuration and execution.

use nexusrpc_core::{HandlerError, HandlerErrorType, OperationError, TypeTag};

use crate::operation::HandlerMethod;

// ---------------------------------------------------------------------------
// NotFoundError
// ---------------------------------------------------------------------------

/// A request named a service or operation that is not registered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotFoundError {
    #[error("No handler for service '{service}'. {}", render_known("registered services", .known))]
    Service {
        service: String,
        /// Registered service names, sorted.
        known: Vec<String>,
    },
    #[error(
        "Nexus service definition '{service}' has no operation '{operation}'. {}",
        render_known("operations in the definition", .known)
    )]
    Operation {
        service: String,
        operation: String,
        /// The service's operation names, sorted.
        known: Vec<String>,
    },
}

fn render_known(what: &str, known: &[String]) -> String {
    if known.is_empty() {
        format!("There are 0 {what}.")
    } else {
        format!("There are {} {what}: {}.", known.len(), known.join(", "))
    }
}

// ---------------------------------------------------------------------------
// ConfigurationError
// ---------------------------------------------------------------------------

/// The dispatcher or a service handler was assembled incorrectly.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Service '{0}' has already been registered.")]
    DuplicateService(String),
    #[error(
        "Service '{service}' operation '{operation}' {method} method is blocking but no executor was provided."
    )]
    BlockingWithoutExecutor {
        service: String,
        operation: String,
        method: HandlerMethod,
    },
    #[error("A blocking handler method was invoked but no executor was provided.")]
    NoExecutor,
    #[error("Service '{service}' has no operation handler for method name '{method_name}'.")]
    MissingOperationHandler { service: String, method_name: String },
    #[error("Operation '{method_name}' in service '{service}' is defined multiple times.")]
    DuplicateOperationHandler { service: String, method_name: String },
    #[error(
        "Operation method name '{method_name}' in service '{service}' does not match an operation method name in the service definition. Available method names: {}.",
        .available.join(", ")
    )]
    UnknownMethodName {
        service: String,
        method_name: String,
        available: Vec<String>,
    },
    #[error(
        "Operation '{operation}' in service '{service}' has {position} type '{actual}', which does not match the declared type '{expected}'."
    )]
    TypeMismatch {
        service: String,
        operation: String,
        position: &'static str,
        expected: TypeTag,
        actual: TypeTag,
    },
    #[error("Service '{service}' has a handler for operation '{operation}', which is not in the service definition.")]
    ExtraOperationHandler { service: String, operation: String },
    #[error("invalid service definition: {0}")]
    Definition(#[from] nexusrpc_core::DefinitionError),
}

// ---------------------------------------------------------------------------
// ExecutorError
// ---------------------------------------------------------------------------

/// A blocking task could not be handed to an executor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    #[error("worker pool is not running")]
    Closed,
}

// ---------------------------------------------------------------------------
// DispatchError
// ---------------------------------------------------------------------------

/// Every failure a dispatch call can report.
///
/// Handler code returns this type too: `HandlerError`, `OperationError` and
/// `anyhow::Error` convert with `?` and pass through the dispatcher unmodified.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Handler(#[from] HandlerError),
    #[error(transparent)]
    Operation(#[from] OperationError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<ExecutorError> for DispatchError {
    fn from(err: ExecutorError) -> Self {
        HandlerError::new(err.to_string(), HandlerErrorType::Unavailable).into()
    }
}

impl DispatchError {
    /// Maps the error onto a protocol-level handler error.
    ///
    /// Returns `None` for [`DispatchError::Operation`], which reports the
    /// operation's own outcome rather than a failure to handle the request.
    #[must_use]
    pub fn to_handler_error(&self) -> Option<HandlerError> {
        match self {
            Self::NotFound(e) => Some(HandlerError::new(e.to_string(), HandlerErrorType::NotFound)),
            Self::Configuration(e) => {
                Some(HandlerError::new(e.to_string(), HandlerErrorType::Internal))
            }
            Self::Handler(e) => Some(e.clone()),
            Self::Operation(_) => None,
            Self::Other(e) => Some(HandlerError::new(format!("{e:#}"), HandlerErrorType::Internal)),
        }
    }
}
