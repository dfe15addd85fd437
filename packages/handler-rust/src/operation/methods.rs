//! Per-method registration of operation implementations.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use nexusrpc_core::{OperationInfo, PayloadType};

use super::typed::TypedOperation;
use super::{ExecutionMode, ExecutionModes, StartOperationResult};
use crate::context::{
    CancelOperationContext, FetchOperationInfoContext, FetchOperationResultContext,
    StartOperationContext,
};
use crate::error::DispatchError;

type AsyncFn<C, A, T> =
    Arc<dyn Fn(C, A) -> BoxFuture<'static, Result<T, DispatchError>> + Send + Sync>;
type BlockingFn<C, A, T> = Arc<dyn Fn(&C, A) -> Result<T, DispatchError> + Send + Sync>;

/// One registered handler method, tagged with how it must be run.
pub(crate) enum Method<C, A, T> {
    NonBlocking(AsyncFn<C, A, T>),
    Blocking(BlockingFn<C, A, T>),
}

impl<C, A, T> Method<C, A, T>
where
    C: Clone + Sync,
    A: Send,
{
    fn mode(&self) -> ExecutionMode {
        match self {
            Self::NonBlocking(_) => ExecutionMode::NonBlocking,
            Self::Blocking(_) => ExecutionMode::Blocking,
        }
    }

    /// Runs the method. A blocking method runs on the calling thread; placing
    /// that thread on an executor is the caller's job.
    pub(crate) async fn call(&self, ctx: &C, arg: A) -> Result<T, DispatchError> {
        match self {
            Self::NonBlocking(f) => f(ctx.clone(), arg).await,
            Self::Blocking(f) => f(ctx, arg),
        }
    }
}

pub(crate) type StartMethod<I, O> = Method<StartOperationContext, I, StartOperationResult<O>>;
pub(crate) type CancelMethod = Method<CancelOperationContext, String, ()>;
pub(crate) type FetchInfoMethod = Method<FetchOperationInfoContext, String, OperationInfo>;
pub(crate) type FetchResultMethod<O> = Method<FetchOperationResultContext, String, O>;

fn mode_of<C: Clone + Sync, A: Send, T>(method: Option<&Method<C, A, T>>) -> ExecutionMode {
    method.map_or(ExecutionMode::NonBlocking, Method::mode)
}

// ---------------------------------------------------------------------------
// OperationMethods
// ---------------------------------------------------------------------------

/// Builder registering each handler method independently, as blocking or
/// non-blocking.
///
/// Methods left unregistered fail with a `NOT_IMPLEMENTED` handler error.
///
/// ```
/// use nexusrpc_handler::operation::{OperationMethods, StartOperationResult};
///
/// let op = OperationMethods::<i64, i64>::new()
///     .start(|_ctx, input| async move { Ok(StartOperationResult::Async(format!("job-{input}"))) })
///     .blocking_fetch_result(|_ctx, token| Ok(token.len() as i64))
///     .build();
/// # let _ = op;
/// ```
pub struct OperationMethods<I, O> {
    pub(crate) start: Option<StartMethod<I, O>>,
    pub(crate) cancel: Option<CancelMethod>,
    pub(crate) fetch_info: Option<FetchInfoMethod>,
    pub(crate) fetch_result: Option<FetchResultMethod<O>>,
}

impl<I: PayloadType, O: PayloadType> OperationMethods<I, O> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: None,
            cancel: None,
            fetch_info: None,
            fetch_result: None,
        }
    }

    #[must_use]
    pub fn start<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(StartOperationContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StartOperationResult<O>, DispatchError>> + Send + 'static,
    {
        self.start = Some(Method::NonBlocking(Arc::new(move |ctx, input| {
            f(ctx, input).boxed()
        })));
        self
    }

    #[must_use]
    pub fn blocking_start<F>(mut self, f: F) -> Self
    where
        F: Fn(&StartOperationContext, I) -> Result<StartOperationResult<O>, DispatchError>
            + Send
            + Sync
            + 'static,
    {
        self.start = Some(Method::Blocking(Arc::new(f)));
        self
    }

    #[must_use]
    pub fn cancel<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(CancelOperationContext, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), DispatchError>> + Send + 'static,
    {
        self.cancel = Some(Method::NonBlocking(Arc::new(move |ctx, token| {
            f(ctx, token).boxed()
        })));
        self
    }

    #[must_use]
    pub fn blocking_cancel<F>(mut self, f: F) -> Self
    where
        F: Fn(&CancelOperationContext, &str) -> Result<(), DispatchError> + Send + Sync + 'static,
    {
        self.cancel = Some(Method::Blocking(Arc::new(
            move |ctx: &CancelOperationContext, token: String| f(ctx, &token),
        )));
        self
    }

    #[must_use]
    pub fn fetch_info<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(FetchOperationInfoContext, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<OperationInfo, DispatchError>> + Send + 'static,
    {
        self.fetch_info = Some(Method::NonBlocking(Arc::new(move |ctx, token| {
            f(ctx, token).boxed()
        })));
        self
    }

    #[must_use]
    pub fn blocking_fetch_info<F>(mut self, f: F) -> Self
    where
        F: Fn(&FetchOperationInfoContext, &str) -> Result<OperationInfo, DispatchError>
            + Send
            + Sync
            + 'static,
    {
        self.fetch_info = Some(Method::Blocking(Arc::new(
            move |ctx: &FetchOperationInfoContext, token: String| f(ctx, &token),
        )));
        self
    }

    #[must_use]
    pub fn fetch_result<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(FetchOperationResultContext, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, DispatchError>> + Send + 'static,
    {
        self.fetch_result = Some(Method::NonBlocking(Arc::new(move |ctx, token| {
            f(ctx, token).boxed()
        })));
        self
    }

    #[must_use]
    pub fn blocking_fetch_result<F>(mut self, f: F) -> Self
    where
        F: Fn(&FetchOperationResultContext, &str) -> Result<O, DispatchError> + Send + Sync + 'static,
    {
        self.fetch_result = Some(Method::Blocking(Arc::new(
            move |ctx: &FetchOperationResultContext, token: String| f(ctx, &token),
        )));
        self
    }

    /// Modes of the registered methods; unregistered methods count as non-blocking.
    #[must_use]
    pub fn execution_modes(&self) -> ExecutionModes {
        ExecutionModes {
            start: mode_of(self.start.as_ref()),
            cancel: mode_of(self.cancel.as_ref()),
            fetch_info: mode_of(self.fetch_info.as_ref()),
            fetch_result: mode_of(self.fetch_result.as_ref()),
        }
    }

    #[must_use]
    pub fn build(self) -> TypedOperation<I, O> {
        TypedOperation::from_methods(self)
    }
}

impl<I: PayloadType, O: PayloadType> Default for OperationMethods<I, O> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
