//! Pipeline composition: wraps the dispatcher in the middleware layers.

use std::sync::Arc;

use tower::ServiceBuilder;

use super::load_shed::LoadShedLayer;
use super::metrics::MetricsLayer;
use super::{DispatchRequest, DispatchResponse, DispatchService};
use crate::config::DispatcherConfig;
use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;

/// Builds the dispatch pipeline.
///
/// Layer order (outermost to innermost):
/// 1. `LoadShedLayer`: reject when overloaded, before doing any work (cancels pass)
/// 2. `MetricsLayer`: record timing and outcome of admitted requests
#[must_use]
pub fn build_dispatch_pipeline(
    dispatcher: Arc<Dispatcher>,
    config: &DispatcherConfig,
) -> impl tower::Service<
    DispatchRequest,
    Response = DispatchResponse,
    Error = DispatchError,
    Future = super::DispatchFuture,
> + Clone {
    ServiceBuilder::new()
        .layer(LoadShedLayer::new(config.max_concurrent_requests))
        .layer(MetricsLayer)
        .service(DispatchService::new(dispatcher))
}

#[cfg(test)]
mod tests {
    use nexusrpc_core::HandlerErrorType;
    use tower::{Service, ServiceExt};

    use super::*;
    use crate::middleware::test_support::{echo_dispatcher, start_echo};

    #[tokio::test]
    async fn pipeline_dispatches_requests() {
        let svc = build_dispatch_pipeline(echo_dispatcher(), &DispatcherConfig::default());
        let resp = svc.oneshot(start_echo("through the stack")).await.unwrap();
        let DispatchResponse::Started(result) = resp else {
            panic!("expected start response");
        };
        assert_eq!(
            result.into_value().unwrap().downcast::<String>().unwrap(),
            "through the stack"
        );
    }

    #[tokio::test]
    async fn zero_capacity_sheds_everything() {
        let config = DispatcherConfig {
            max_concurrent_requests: 0,
            ..DispatcherConfig::default()
        };
        let mut svc = build_dispatch_pipeline(echo_dispatcher(), &config);
        let _ = ServiceExt::ready(&mut svc).await.unwrap();
        let err = svc.call(start_echo("x")).await.unwrap_err();
        let err = err.to_handler_error().unwrap();
        assert_eq!(err.error_type, HandlerErrorType::ResourceExhausted);
    }
}
