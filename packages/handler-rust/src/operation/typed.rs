//! Typed operation handlers and their erasure into [`OperationHandler`].

use std::any::type_name;
use std::sync::Arc;

use async_trait::async_trait;
use nexusrpc_core::{HandlerError, HandlerErrorType, OperationInfo, Payload, PayloadType, TypeTag};

use super::methods::OperationMethods;
use super::{not_implemented, ExecutionModes, OperationHandler, StartOperationResult};
use crate::context::{
    CancelOperationContext, FetchOperationInfoContext, FetchOperationResultContext,
    StartOperationContext,
};
use crate::error::DispatchError;

// ---------------------------------------------------------------------------
// Typed handler traits
// ---------------------------------------------------------------------------

/// A general operation handler with non-blocking methods.
///
/// `start` may return [`StartOperationResult::Async`]; the token then
/// addresses the operation in `cancel`, `fetch_info` and `fetch_result`.
#[async_trait]
pub trait AsyncOperationHandler<I: PayloadType, O: PayloadType>: Send + Sync + 'static {
    async fn start(
        &self,
        ctx: &StartOperationContext,
        input: I,
    ) -> Result<StartOperationResult<O>, DispatchError>;

    async fn cancel(&self, ctx: &CancelOperationContext, token: &str) -> Result<(), DispatchError>;

    async fn fetch_info(
        &self,
        _ctx: &FetchOperationInfoContext,
        _token: &str,
    ) -> Result<OperationInfo, DispatchError> {
        Err(not_implemented("Fetching operation info is not implemented for this operation."))
    }

    async fn fetch_result(
        &self,
        _ctx: &FetchOperationResultContext,
        _token: &str,
    ) -> Result<O, DispatchError> {
        Err(not_implemented("Fetching the operation result is not implemented for this operation."))
    }
}

/// A general operation handler whose methods block their thread.
///
/// Every method runs on the dispatcher's executor.
pub trait BlockingOperationHandler<I: PayloadType, O: PayloadType>: Send + Sync + 'static {
    /// # Errors
    ///
    /// Any error is returned to the caller unmodified.
    fn start(
        &self,
        ctx: &StartOperationContext,
        input: I,
    ) -> Result<StartOperationResult<O>, DispatchError>;

    /// # Errors
    ///
    /// Any error is returned to the caller unmodified.
    fn cancel(&self, ctx: &CancelOperationContext, token: &str) -> Result<(), DispatchError>;

    /// # Errors
    ///
    /// Defaults to a `NOT_IMPLEMENTED` handler error.
    fn fetch_info(
        &self,
        _ctx: &FetchOperationInfoContext,
        _token: &str,
    ) -> Result<OperationInfo, DispatchError> {
        Err(not_implemented("Fetching operation info is not implemented for this operation."))
    }

    /// # Errors
    ///
    /// Defaults to a `NOT_IMPLEMENTED` handler error.
    fn fetch_result(
        &self,
        _ctx: &FetchOperationResultContext,
        _token: &str,
    ) -> Result<O, DispatchError> {
        Err(not_implemented("Fetching the operation result is not implemented for this operation."))
    }
}

// ---------------------------------------------------------------------------
// TypedOperation
// ---------------------------------------------------------------------------

/// An operation with input `I` and output `O`, erased to [`OperationHandler`].
///
/// Incoming payloads must hold an `I`; outgoing values are wrapped in
/// payloads tagged with `O`.
pub struct TypedOperation<I, O> {
    methods: OperationMethods<I, O>,
    modes: ExecutionModes,
}

impl<I: PayloadType, O: PayloadType> TypedOperation<I, O> {
    pub(crate) fn from_methods(methods: OperationMethods<I, O>) -> Self {
        let modes = methods.execution_modes();
        Self { methods, modes }
    }

    /// Erases a non-blocking general handler.
    #[must_use]
    pub fn from_async<H: AsyncOperationHandler<I, O>>(handler: H) -> Self {
        let handler = Arc::new(handler);
        let (h1, h2, h3, h4) = (
            Arc::clone(&handler),
            Arc::clone(&handler),
            Arc::clone(&handler),
            handler,
        );
        OperationMethods::new()
            .start(move |ctx, input| {
                let h = Arc::clone(&h1);
                async move { h.start(&ctx, input).await }
            })
            .cancel(move |ctx, token| {
                let h = Arc::clone(&h2);
                async move { h.cancel(&ctx, &token).await }
            })
            .fetch_info(move |ctx, token| {
                let h = Arc::clone(&h3);
                async move { h.fetch_info(&ctx, &token).await }
            })
            .fetch_result(move |ctx, token| {
                let h = Arc::clone(&h4);
                async move { h.fetch_result(&ctx, &token).await }
            })
            .build()
    }

    /// Erases a blocking general handler; every method is marked blocking.
    #[must_use]
    pub fn from_blocking<H: BlockingOperationHandler<I, O>>(handler: H) -> Self {
        let handler = Arc::new(handler);
        let (h1, h2, h3, h4) = (
            Arc::clone(&handler),
            Arc::clone(&handler),
            Arc::clone(&handler),
            handler,
        );
        OperationMethods::new()
            .blocking_start(move |ctx, input| h1.start(ctx, input))
            .blocking_cancel(move |ctx, token| h2.cancel(ctx, token))
            .blocking_fetch_info(move |ctx, token| h3.fetch_info(ctx, token))
            .blocking_fetch_result(move |ctx, token| h4.fetch_result(ctx, token))
            .build()
    }

    #[must_use]
    pub fn input_type(&self) -> TypeTag {
        TypeTag::of::<I>()
    }

    #[must_use]
    pub fn output_type(&self) -> TypeTag {
        TypeTag::of::<O>()
    }
}

fn expect_input<I: PayloadType>(input: Payload) -> Result<I, DispatchError> {
    input.downcast::<I>().map_err(|payload| {
        HandlerError::new(
            format!(
                "Operation input has type '{}', expected '{}'.",
                payload.type_tag(),
                type_name::<I>()
            ),
            HandlerErrorType::BadRequest,
        )
        .into()
    })
}

#[async_trait]
impl<I: PayloadType, O: PayloadType> OperationHandler for TypedOperation<I, O> {
    async fn start(
        &self,
        ctx: &StartOperationContext,
        input: Payload,
    ) -> Result<StartOperationResult, DispatchError> {
        let Some(method) = &self.methods.start else {
            return Err(not_implemented("The start method of this operation is not implemented."));
        };
        let input = expect_input::<I>(input)?;
        let result = method.call(ctx, input).await?;
        Ok(result.map(Payload::new))
    }

    async fn cancel(&self, ctx: &CancelOperationContext, token: &str) -> Result<(), DispatchError> {
        match &self.methods.cancel {
            Some(method) => method.call(ctx, token.to_string()).await,
            None => Err(not_implemented("Cancelling this operation is not implemented.")),
        }
    }

    async fn fetch_info(
        &self,
        ctx: &FetchOperationInfoContext,
        token: &str,
    ) -> Result<OperationInfo, DispatchError> {
        match &self.methods.fetch_info {
            Some(method) => method.call(ctx, token.to_string()).await,
            None => Err(not_implemented(
                "Fetching operation info is not implemented for this operation.",
            )),
        }
    }

    async fn fetch_result(
        &self,
        ctx: &FetchOperationResultContext,
        token: &str,
    ) -> Result<Payload, DispatchError> {
        match &self.methods.fetch_result {
            Some(method) => method.call(ctx, token.to_string()).await.map(Payload::new),
            None => Err(not_implemented(
                "Fetching the operation result is not implemented for this operation.",
            )),
        }
    }

    fn execution_modes(&self) -> ExecutionModes {
        self.modes
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use nexusrpc_core::OperationState;
    use parking_lot::Mutex;

    use super::*;
    use crate::operation::ExecutionMode;

    /// Keeps operation results keyed by token, like a job store.
    #[derive(Default)]
    struct IncrementJobs {
        results: Mutex<HashMap<String, i64>>,
    }

    #[async_trait]
    impl AsyncOperationHandler<i64, i64> for IncrementJobs {
        async fn start(
            &self,
            _ctx: &StartOperationContext,
            input: i64,
        ) -> Result<StartOperationResult<i64>, DispatchError> {
            let token = format!("job-{input}");
            self.results.lock().insert(token.clone(), input + 1);
            Ok(StartOperationResult::Async(token))
        }

        async fn cancel(&self, _ctx: &CancelOperationContext, token: &str) -> Result<(), DispatchError> {
            self.results.lock().remove(token);
            Ok(())
        }

        async fn fetch_info(
            &self,
            _ctx: &FetchOperationInfoContext,
            token: &str,
        ) -> Result<OperationInfo, DispatchError> {
            let state = if self.results.lock().contains_key(token) {
                OperationState::Succeeded
            } else {
                OperationState::Canceled
            };
            Ok(OperationInfo::new(token, state))
        }
    }

    struct BlockingEcho;

    impl BlockingOperationHandler<String, String> for BlockingEcho {
        fn start(
            &self,
            _ctx: &StartOperationContext,
            input: String,
        ) -> Result<StartOperationResult<String>, DispatchError> {
            Ok(StartOperationResult::Sync(input))
        }

        fn cancel(&self, _ctx: &CancelOperationContext, _token: &str) -> Result<(), DispatchError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn async_handler_lifecycle() {
        let op = TypedOperation::from_async(IncrementJobs::default());
        assert_eq!(op.execution_modes(), ExecutionModes::default());

        let started = op
            .start(&StartOperationContext::new("svc", "incr"), Payload::new(1_i64))
            .await
            .unwrap();
        let token = started.token().unwrap().to_string();

        let info = op
            .fetch_info(&FetchOperationInfoContext::new("svc", "incr"), &token)
            .await
            .unwrap();
        assert_eq!(info.state, OperationState::Succeeded);

        op.cancel(&CancelOperationContext::new("svc", "incr"), &token)
            .await
            .unwrap();
        let info = op
            .fetch_info(&FetchOperationInfoContext::new("svc", "incr"), &token)
            .await
            .unwrap();
        assert_eq!(info.state, OperationState::Canceled);
    }

    #[tokio::test]
    async fn default_fetch_result_is_not_implemented() {
        let op = TypedOperation::from_async(IncrementJobs::default());
        let err = op
            .fetch_result(&FetchOperationResultContext::new("svc", "incr"), "job-1")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Handler(ref e) if e.error_type == HandlerErrorType::NotImplemented
        ));
    }

    #[tokio::test]
    async fn blocking_handler_marks_every_method_blocking() {
        let op = TypedOperation::from_blocking(BlockingEcho);
        assert_eq!(op.execution_modes(), ExecutionModes::all(ExecutionMode::Blocking));

        // Called directly, a blocking method runs on the current thread.
        let result = op
            .start(
                &StartOperationContext::new("svc", "echo"),
                Payload::new("hi".to_string()),
            )
            .await
            .unwrap();
        let value = result.into_value().unwrap();
        assert_eq!(value.type_tag(), op.output_type());
        assert_eq!(value.downcast::<String>().unwrap(), "hi");
    }

    #[tokio::test]
    async fn wrong_input_type_is_bad_request() {
        let op = TypedOperation::from_async(IncrementJobs::default());
        let err = op
            .start(
                &StartOperationContext::new("svc", "incr"),
                Payload::new("not a number".to_string()),
            )
            .await
            .unwrap_err();
        let DispatchError::Handler(err) = err else {
            panic!("expected handler error");
        };
        assert_eq!(err.error_type, HandlerErrorType::BadRequest);
        assert!(!err.retryable());
    }
}
