//! Operation handler interceptors.
//!
//! An interceptor wraps the handler it is given and returns a new one. The
//! dispatcher applies the chain once per operation when it is built, so the
//! wrapped handler is shared by every request for that operation.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use nexusrpc_core::{OperationInfo, Payload};

use crate::context::{
    CancelOperationContext, FetchOperationInfoContext, FetchOperationResultContext,
    OperationContext, StartOperationContext,
};
use crate::error::DispatchError;
use crate::operation::{ExecutionModes, OperationHandler, StartOperationResult};

/// Wraps an operation handler with cross-cutting behavior.
pub trait OperationHandlerInterceptor: Send + Sync {
    fn intercept(&self, next: Arc<dyn OperationHandler>) -> Arc<dyn OperationHandler>;
}

/// An ordered list of interceptors. The first one added is outermost.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn OperationHandlerInterceptor>>,
}

impl InterceptorChain {
    #[must_use]
    pub fn new(interceptors: Vec<Arc<dyn OperationHandlerInterceptor>>) -> Self {
        Self { interceptors }
    }

    pub fn push(&mut self, interceptor: Arc<dyn OperationHandlerInterceptor>) {
        self.interceptors.push(interceptor);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Wraps `base` so that a call enters the first interceptor, then the
    /// second, and so on, before reaching `base`.
    #[must_use]
    pub fn apply(&self, base: Arc<dyn OperationHandler>) -> Arc<dyn OperationHandler> {
        self.interceptors
            .iter()
            .rev()
            .fold(base, |next, interceptor| interceptor.intercept(next))
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("len", &self.interceptors.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// TracingInterceptor
// ---------------------------------------------------------------------------

/// Emits a `tracing` event with outcome and latency for every handler call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingInterceptor;

impl OperationHandlerInterceptor for TracingInterceptor {
    fn intercept(&self, next: Arc<dyn OperationHandler>) -> Arc<dyn OperationHandler> {
        Arc::new(TracingHandler { next })
    }
}

struct TracingHandler {
    next: Arc<dyn OperationHandler>,
}

fn record<T>(
    method: &'static str,
    ctx: &dyn OperationContext,
    started: Instant,
    result: &Result<T, DispatchError>,
) {
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    match result {
        Ok(_) => tracing::debug!(
            method,
            service = ctx.service(),
            operation = ctx.operation(),
            elapsed_ms,
            "operation handler completed"
        ),
        Err(DispatchError::Operation(err)) => tracing::debug!(
            method,
            service = ctx.service(),
            operation = ctx.operation(),
            elapsed_ms,
            state = %err.state,
            "operation handler reported unsuccessful outcome"
        ),
        Err(err) => tracing::warn!(
            method,
            service = ctx.service(),
            operation = ctx.operation(),
            elapsed_ms,
            error = %err,
            "operation handler failed"
        ),
    }
}

#[async_trait]
impl OperationHandler for TracingHandler {
    async fn start(
        &self,
        ctx: &StartOperationContext,
        input: Payload,
    ) -> Result<StartOperationResult, DispatchError> {
        let started = Instant::now();
        let result = self.next.start(ctx, input).await;
        record("start", ctx, started, &result);
        result
    }

    async fn cancel(&self, ctx: &CancelOperationContext, token: &str) -> Result<(), DispatchError> {
        let started = Instant::now();
        let result = self.next.cancel(ctx, token).await;
        record("cancel", ctx, started, &result);
        result
    }

    async fn fetch_info(
        &self,
        ctx: &FetchOperationInfoContext,
        token: &str,
    ) -> Result<OperationInfo, DispatchError> {
        let started = Instant::now();
        let result = self.next.fetch_info(ctx, token).await;
        record("fetch_info", ctx, started, &result);
        result
    }

    async fn fetch_result(
        &self,
        ctx: &FetchOperationResultContext,
        token: &str,
    ) -> Result<Payload, DispatchError> {
        let started = Instant::now();
        let result = self.next.fetch_result(ctx, token).await;
        record("fetch_result", ctx, started, &result);
        result
    }

    fn execution_modes(&self) -> ExecutionModes {
        self.next.execution_modes()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::operation::SyncOperation;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recording {
        name: &'static str,
        log: Log,
    }

    impl OperationHandlerInterceptor for Recording {
        fn intercept(&self, next: Arc<dyn OperationHandler>) -> Arc<dyn OperationHandler> {
            Arc::new(RecordingHandler {
                name: self.name,
                log: Arc::clone(&self.log),
                next,
            })
        }
    }

    struct RecordingHandler {
        name: &'static str,
        log: Log,
        next: Arc<dyn OperationHandler>,
    }

    #[async_trait]
    impl OperationHandler for RecordingHandler {
        async fn start(
            &self,
            ctx: &StartOperationContext,
            input: Payload,
        ) -> Result<StartOperationResult, DispatchError> {
            self.log.lock().push(format!("{}.before", self.name));
            let result = self.next.start(ctx, input).await;
            self.log.lock().push(format!("{}.after", self.name));
            result
        }

        async fn cancel(&self, ctx: &CancelOperationContext, token: &str) -> Result<(), DispatchError> {
            self.next.cancel(ctx, token).await
        }

        async fn fetch_info(
            &self,
            ctx: &FetchOperationInfoContext,
            token: &str,
        ) -> Result<OperationInfo, DispatchError> {
            self.next.fetch_info(ctx, token).await
        }

        async fn fetch_result(
            &self,
            ctx: &FetchOperationResultContext,
            token: &str,
        ) -> Result<Payload, DispatchError> {
            self.next.fetch_result(ctx, token).await
        }
    }

    fn base(log: &Log) -> Arc<dyn OperationHandler> {
        let log = Arc::clone(log);
        Arc::new(SyncOperation::new(move |_ctx, input: u32| {
            log.lock().push("base".to_string());
            async move { Ok(input) }
        }))
    }

    fn recording(name: &'static str, log: &Log) -> Arc<dyn OperationHandlerInterceptor> {
        Arc::new(Recording {
            name,
            log: Arc::clone(log),
        })
    }

    async fn start(handler: &Arc<dyn OperationHandler>) {
        handler
            .start(&StartOperationContext::new("svc", "op"), Payload::new(7_u32))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn first_interceptor_is_outermost() {
        let log: Log = Arc::default();
        let chain = InterceptorChain::new(vec![recording("A", &log), recording("B", &log)]);
        let handler = chain.apply(base(&log));

        start(&handler).await;
        assert_eq!(
            *log.lock(),
            vec!["A.before", "B.before", "base", "B.after", "A.after"]
        );
    }

    #[tokio::test]
    async fn single_interceptor_wraps_base() {
        let log: Log = Arc::default();
        let mut chain = InterceptorChain::default();
        chain.push(recording("A", &log));
        let handler = chain.apply(base(&log));

        start(&handler).await;
        assert_eq!(*log.lock(), vec!["A.before", "base", "A.after"]);
    }

    #[test]
    fn empty_chain_returns_base_unchanged() {
        let log: Log = Arc::default();
        let base = base(&log);
        let handler = InterceptorChain::default().apply(Arc::clone(&base));
        assert!(Arc::ptr_eq(&base, &handler));
    }

    #[tokio::test]
    async fn tracing_interceptor_is_transparent() {
        let log: Log = Arc::default();
        let chain = InterceptorChain::new(vec![Arc::new(TracingInterceptor)]);
        let handler = chain.apply(base(&log));

        let result = handler
            .start(&StartOperationContext::new("svc", "op"), Payload::new(3_u32))
            .await
            .unwrap();
        assert_eq!(result.into_value().unwrap().downcast::<u32>().unwrap(), 3);

        let err = handler
            .cancel(&CancelOperationContext::new("svc", "op"), "t")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Handler(_)));
    }
}
