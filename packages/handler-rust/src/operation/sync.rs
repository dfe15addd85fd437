//! Operations that always complete inside `start`.

use std::future::Future;

use async_trait::async_trait;
use nexusrpc_core::{OperationInfo, Payload, PayloadType, TypeTag};

use super::methods::OperationMethods;
use super::typed::TypedOperation;
use super::{not_implemented, ExecutionModes, OperationHandler, StartOperationResult};
use crate::context::{
    CancelOperationContext, FetchOperationInfoContext, FetchOperationResultContext,
    StartOperationContext,
};
use crate::error::DispatchError;

const CANNOT_CANCEL: &str = "An operation that responded synchronously cannot be cancelled.";
const CANNOT_FETCH_INFO: &str =
    "Cannot fetch operation info for an operation that responded synchronously.";
const CANNOT_FETCH_RESULT: &str =
    "Cannot fetch the result of an operation that responded synchronously.";

/// An operation whose `start` delivers the final value.
///
/// Once `start` returns the operation is terminal, so `cancel`, `fetch_info`
/// and `fetch_result` always fail with a `NOT_IMPLEMENTED` handler error. A
/// failure inside `start` is returned from `start`; there is no later channel.
pub struct SyncOperation<I, O> {
    inner: TypedOperation<I, O>,
}

impl<I: PayloadType, O: PayloadType> SyncOperation<I, O> {
    /// A synchronous operation backed by a non-blocking function.
    #[must_use]
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(StartOperationContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, DispatchError>> + Send + 'static,
    {
        Self::terminal(OperationMethods::new().start(move |ctx, input| {
            let fut = f(ctx, input);
            async move { fut.await.map(StartOperationResult::Sync) }
        }))
    }

    /// A synchronous operation backed by a blocking function, run on the
    /// dispatcher's executor.
    #[must_use]
    pub fn blocking<F>(f: F) -> Self
    where
        F: Fn(&StartOperationContext, I) -> Result<O, DispatchError> + Send + Sync + 'static,
    {
        Self::terminal(
            OperationMethods::new()
                .blocking_start(move |ctx, input| f(ctx, input).map(StartOperationResult::Sync)),
        )
    }

    fn terminal(methods: OperationMethods<I, O>) -> Self {
        let inner = methods
            .cancel(|_ctx, _token| async { Err::<(), _>(not_implemented(CANNOT_CANCEL)) })
            .fetch_info(|_ctx, _token| async {
                Err::<OperationInfo, _>(not_implemented(CANNOT_FETCH_INFO))
            })
            .fetch_result(|_ctx, _token| async { Err::<O, _>(not_implemented(CANNOT_FETCH_RESULT)) })
            .build();
        Self { inner }
    }

    #[must_use]
    pub fn input_type(&self) -> TypeTag {
        self.inner.input_type()
    }

    #[must_use]
    pub fn output_type(&self) -> TypeTag {
        self.inner.output_type()
    }
}

#[async_trait]
impl<I: PayloadType, O: PayloadType> OperationHandler for SyncOperation<I, O> {
    async fn start(
        &self,
        ctx: &StartOperationContext,
        input: Payload,
    ) -> Result<StartOperationResult, DispatchError> {
        self.inner.start(ctx, input).await
    }

    async fn cancel(&self, ctx: &CancelOperationContext, token: &str) -> Result<(), DispatchError> {
        self.inner.cancel(ctx, token).await
    }

    async fn fetch_info(
        &self,
        ctx: &FetchOperationInfoContext,
        token: &str,
    ) -> Result<OperationInfo, DispatchError> {
        self.inner.fetch_info(ctx, token).await
    }

    async fn fetch_result(
        &self,
        ctx: &FetchOperationResultContext,
        token: &str,
    ) -> Result<Payload, DispatchError> {
        self.inner.fetch_result(ctx, token).await
    }

    fn execution_modes(&self) -> ExecutionModes {
        self.inner.execution_modes()
    }
}
