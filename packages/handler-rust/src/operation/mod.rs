//! Operation handlers: the erased contract the dispatcher calls, and the typed
//! surfaces handler authors implement.
//!
//! - [`OperationHandler`]: object-safe contract over [`Payload`] values
//! - [`AsyncOperationHandler`] / [`BlockingOperationHandler`]: typed general
//!   handlers whose `start` may complete asynchronously
//! - [`SyncOperation`]: typed handlers that always complete inside `start`
//! - [`OperationMethods`]: per-method builder mixing blocking and non-blocking
//!   implementations
//!
//! Every typed surface is erased into a [`TypedOperation`].

pub mod methods;
pub mod sync;
pub mod typed;

use std::fmt;

use async_trait::async_trait;
use nexusrpc_core::{HandlerError, HandlerErrorType, OperationInfo, Payload};

use crate::context::{
    CancelOperationContext, FetchOperationInfoContext, FetchOperationResultContext,
    StartOperationContext,
};
use crate::error::DispatchError;

pub use methods::OperationMethods;
pub use sync::SyncOperation;
pub use typed::{AsyncOperationHandler, BlockingOperationHandler, TypedOperation};

// ---------------------------------------------------------------------------
// StartOperationResult
// ---------------------------------------------------------------------------

/// Outcome of a successful start: the final value, or a token for later calls.
#[derive(Debug, Clone, PartialEq)]
pub enum StartOperationResult<T = Payload> {
    /// The operation completed inside `start`.
    Sync(T),
    /// The operation is running; the token addresses it in later requests.
    Async(String),
}

impl<T> StartOperationResult<T> {
    #[must_use]
    pub fn is_sync(&self) -> bool {
        matches!(self, Self::Sync(_))
    }

    #[must_use]
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Sync(_) => None,
            Self::Async(token) => Some(token),
        }
    }

    #[must_use]
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Sync(value) => Some(value),
            Self::Async(_) => None,
        }
    }

    /// Maps the synchronous value, leaving a token untouched.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StartOperationResult<U> {
        match self {
            Self::Sync(value) => StartOperationResult::Sync(f(value)),
            Self::Async(token) => StartOperationResult::Async(token),
        }
    }
}

// ---------------------------------------------------------------------------
// Execution modes
// ---------------------------------------------------------------------------

/// The four methods of an operation handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerMethod {
    Start,
    Cancel,
    FetchInfo,
    FetchResult,
}

impl HandlerMethod {
    pub const ALL: [Self; 4] = [Self::Start, Self::Cancel, Self::FetchInfo, Self::FetchResult];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Cancel => "cancel",
            Self::FetchInfo => "fetch_info",
            Self::FetchResult => "fetch_result",
        }
    }
}

impl fmt::Display for HandlerMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a handler method must be run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Runs inline on the dispatch path; must not block the thread.
    #[default]
    NonBlocking,
    /// May block its thread; runs on the configured executor.
    Blocking,
}

/// Execution mode of each handler method, fixed at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutionModes {
    pub start: ExecutionMode,
    pub cancel: ExecutionMode,
    pub fetch_info: ExecutionMode,
    pub fetch_result: ExecutionMode,
}

impl ExecutionModes {
    /// The same mode for every method.
    #[must_use]
    pub fn all(mode: ExecutionMode) -> Self {
        Self {
            start: mode,
            cancel: mode,
            fetch_info: mode,
            fetch_result: mode,
        }
    }

    #[must_use]
    pub fn get(&self, method: HandlerMethod) -> ExecutionMode {
        match method {
            HandlerMethod::Start => self.start,
            HandlerMethod::Cancel => self.cancel,
            HandlerMethod::FetchInfo => self.fetch_info,
            HandlerMethod::FetchResult => self.fetch_result,
        }
    }

    #[must_use]
    pub fn with(mut self, method: HandlerMethod, mode: ExecutionMode) -> Self {
        match method {
            HandlerMethod::Start => self.start = mode,
            HandlerMethod::Cancel => self.cancel = mode,
            HandlerMethod::FetchInfo => self.fetch_info = mode,
            HandlerMethod::FetchResult => self.fetch_result = mode,
        }
        self
    }

    /// Methods that must run on an executor, in declaration order.
    pub fn blocking_methods(&self) -> impl Iterator<Item = HandlerMethod> + '_ {
        HandlerMethod::ALL
            .into_iter()
            .filter(|m| self.get(*m) == ExecutionMode::Blocking)
    }
}

// ---------------------------------------------------------------------------
// OperationHandler trait
// ---------------------------------------------------------------------------

/// Erased operation handler, as routed by the dispatcher and wrapped by
/// interceptors.
///
/// Values cross this boundary as [`Payload`]s. Errors from handler code are
/// returned as-is; the dispatcher does not translate them.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    /// Starts the operation, completing it inline or returning a token.
    async fn start(
        &self,
        ctx: &StartOperationContext,
        input: Payload,
    ) -> Result<StartOperationResult, DispatchError>;

    /// Requests cancellation of a running operation.
    async fn cancel(&self, ctx: &CancelOperationContext, token: &str) -> Result<(), DispatchError>;

    /// Reports the current state of an operation.
    async fn fetch_info(
        &self,
        ctx: &FetchOperationInfoContext,
        token: &str,
    ) -> Result<OperationInfo, DispatchError>;

    /// Returns the final value of an operation.
    async fn fetch_result(
        &self,
        ctx: &FetchOperationResultContext,
        token: &str,
    ) -> Result<Payload, DispatchError>;

    /// Execution mode of each method. Defaults to all non-blocking.
    fn execution_modes(&self) -> ExecutionModes {
        ExecutionModes::default()
    }
}

/// The error returned for a method the handler does not implement.
pub(crate) fn not_implemented(message: impl Into<String>) -> DispatchError {
    HandlerError::new(message, HandlerErrorType::NotImplemented).into()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_result_is_exactly_one_variant() {
        let sync: StartOperationResult<i32> = StartOperationResult::Sync(3);
        assert!(sync.is_sync());
        assert_eq!(sync.token(), None);
        assert_eq!(sync.map(|v| v * 2).into_value(), Some(6));

        let pending: StartOperationResult<i32> = StartOperationResult::Async("tok".to_string());
        assert!(!pending.is_sync());
        assert_eq!(pending.token(), Some("tok"));
        assert_eq!(pending.map(|v| v * 2), StartOperationResult::Async("tok".to_string()));
    }

    #[test]
    fn execution_modes_per_method() {
        let modes = ExecutionModes::default()
            .with(HandlerMethod::Start, ExecutionMode::Blocking)
            .with(HandlerMethod::FetchResult, ExecutionMode::Blocking);
        assert_eq!(modes.get(HandlerMethod::Start), ExecutionMode::Blocking);
        assert_eq!(modes.get(HandlerMethod::Cancel), ExecutionMode::NonBlocking);
        assert_eq!(
            modes.blocking_methods().collect::<Vec<_>>(),
            vec![HandlerMethod::Start, HandlerMethod::FetchResult]
        );
        assert_eq!(
            ExecutionModes::all(ExecutionMode::Blocking).blocking_methods().count(),
            4
        );
    }
}
