//! Tower middleware around the dispatcher.
//!
//! - [`DispatchService`]: adapts a [`Dispatcher`] to `tower::Service`
//! - [`metrics`]: request timing and counting
//! - [`load_shed`]: semaphore-based concurrency limiting
//! - [`pipeline`]: composes the layers into a single service stack

pub mod load_shed;
pub mod metrics;
pub mod pipeline;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use nexusrpc_core::{OperationInfo, Payload};
use tower::Service;

use crate::context::{
    CancelOperationContext, FetchOperationInfoContext, FetchOperationResultContext,
    StartOperationContext,
};
use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;
use crate::lazy::LazyValue;
use crate::operation::{HandlerMethod, StartOperationResult};

pub use load_shed::LoadShedLayer;
pub use metrics::MetricsLayer;
pub use pipeline::build_dispatch_pipeline;

/// Boxed future returned by every service in the pipeline.
pub type DispatchFuture =
    Pin<Box<dyn Future<Output = Result<DispatchResponse, DispatchError>> + Send>>;

/// One of the four Nexus RPCs.
#[derive(Debug)]
pub enum DispatchRequest {
    Start {
        ctx: StartOperationContext,
        input: LazyValue,
    },
    Cancel {
        ctx: CancelOperationContext,
        token: String,
    },
    FetchInfo {
        ctx: FetchOperationInfoContext,
        token: String,
    },
    FetchResult {
        ctx: FetchOperationResultContext,
        token: String,
    },
}

impl DispatchRequest {
    #[must_use]
    pub fn service(&self) -> &str {
        match self {
            Self::Start { ctx, .. } => &ctx.service,
            Self::Cancel { ctx, .. } => &ctx.service,
            Self::FetchInfo { ctx, .. } => &ctx.service,
            Self::FetchResult { ctx, .. } => &ctx.service,
        }
    }

    #[must_use]
    pub fn operation(&self) -> &str {
        match self {
            Self::Start { ctx, .. } => &ctx.operation,
            Self::Cancel { ctx, .. } => &ctx.operation,
            Self::FetchInfo { ctx, .. } => &ctx.operation,
            Self::FetchResult { ctx, .. } => &ctx.operation,
        }
    }

    #[must_use]
    pub fn method(&self) -> HandlerMethod {
        match self {
            Self::Start { .. } => HandlerMethod::Start,
            Self::Cancel { .. } => HandlerMethod::Cancel,
            Self::FetchInfo { .. } => HandlerMethod::FetchInfo,
            Self::FetchResult { .. } => HandlerMethod::FetchResult,
        }
    }
}

/// Successful outcome of a [`DispatchRequest`], variant for variant.
#[derive(Debug)]
pub enum DispatchResponse {
    Started(StartOperationResult),
    Cancelled,
    Info(OperationInfo),
    Result(Payload),
}

/// `tower::Service` over a shared [`Dispatcher`].
#[derive(Debug, Clone)]
pub struct DispatchService {
    dispatcher: Arc<Dispatcher>,
}

impl DispatchService {
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl Service<DispatchRequest> for DispatchService {
    type Response = DispatchResponse;
    type Error = DispatchError;
    type Future = DispatchFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: DispatchRequest) -> Self::Future {
        let dispatcher = Arc::clone(&self.dispatcher);
        Box::pin(async move {
            match req {
                DispatchRequest::Start { ctx, input } => dispatcher
                    .start_operation(&ctx, input)
                    .await
                    .map(DispatchResponse::Started),
                DispatchRequest::Cancel { ctx, token } => dispatcher
                    .cancel_operation(&ctx, &token)
                    .await
                    .map(|()| DispatchResponse::Cancelled),
                DispatchRequest::FetchInfo { ctx, token } => dispatcher
                    .fetch_operation_info(&ctx, &token)
                    .await
                    .map(DispatchResponse::Info),
                DispatchRequest::FetchResult { ctx, token } => dispatcher
                    .fetch_operation_result(&ctx, &token)
                    .await
                    .map(DispatchResponse::Result),
            }
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use nexusrpc_core::{JsonSerializer, Serializer};

    use super::*;
    use crate::service_handler::{OperationFactories, ServiceHandler};

    pub(crate) fn echo_dispatcher() -> Arc<Dispatcher> {
        let service = ServiceHandler::from_factories(
            "Echo",
            OperationFactories::new().sync_operation("echo", |_ctx, input: String| async move { Ok(input) }),
        )
        .unwrap();
        Arc::new(Dispatcher::new(vec![service], None).unwrap())
    }

    pub(crate) fn start_echo(text: &str) -> DispatchRequest {
        let serializer: Arc<dyn Serializer> = Arc::new(JsonSerializer);
        let content = serializer.serialize(&serde_json::json!(text)).unwrap();
        DispatchRequest::Start {
            ctx: StartOperationContext::new("Echo", "echo"),
            input: LazyValue::from_bytes(serializer, content.headers, content.data.unwrap_or_default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use tower::ServiceExt;

    use super::test_support::{echo_dispatcher, start_echo};
    use super::*;

    #[tokio::test]
    async fn start_request_is_dispatched() {
        let svc = DispatchService::new(echo_dispatcher());
        let response = svc.oneshot(start_echo("hi")).await.unwrap();
        let DispatchResponse::Started(result) = response else {
            panic!("expected start response");
        };
        assert_eq!(result.into_value().unwrap().downcast::<String>().unwrap(), "hi");
    }

    #[tokio::test]
    async fn follow_up_requests_reach_the_handler() {
        let svc = DispatchService::new(echo_dispatcher());
        let req = DispatchRequest::Cancel {
            ctx: CancelOperationContext::new("Echo", "echo"),
            token: "t".to_string(),
        };
        assert_eq!(req.method(), HandlerMethod::Cancel);
        assert_eq!(req.service(), "Echo");

        // Sync operations cannot be cancelled.
        let err = svc.oneshot(req).await.unwrap_err();
        assert!(matches!(err, DispatchError::Handler(_)));
    }

    #[tokio::test]
    async fn unknown_service_is_not_found() {
        let svc = DispatchService::new(echo_dispatcher());
        let req = DispatchRequest::FetchInfo {
            ctx: FetchOperationInfoContext::new("Nope", "echo"),
            token: "t".to_string(),
        };
        let err = svc.oneshot(req).await.unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));
    }
}
