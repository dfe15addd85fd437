//! Metrics middleware for dispatch requests.
//!
//! Records request duration and outcome in a `tracing` span and through the
//! `metrics` facade. Nothing is exported unless the embedder installs a
//! recorder.

use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use super::{DispatchFuture, DispatchRequest, DispatchResponse};
use crate::error::DispatchError;

pub const REQUESTS_TOTAL: &str = "nexus_dispatch_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "nexus_dispatch_request_duration_seconds";

/// Label for the outcome of a request.
#[must_use]
pub fn outcome_label(result: &Result<DispatchResponse, DispatchError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(DispatchError::NotFound(_)) => "not_found",
        Err(DispatchError::Configuration(_)) => "configuration_error",
        Err(DispatchError::Handler(_)) => "handler_error",
        Err(DispatchError::Operation(_)) => "operation_error",
        Err(DispatchError::Other(_)) => "internal_error",
    }
}

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<DispatchRequest> for MetricsService<S>
where
    S: Service<DispatchRequest, Response = DispatchResponse, Error = DispatchError> + Send,
    S::Future: Send + 'static,
{
    type Response = DispatchResponse;
    type Error = DispatchError;
    type Future = DispatchFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: DispatchRequest) -> Self::Future {
        let method = req.method().as_str();
        let service = req.service().to_string();
        let operation = req.operation().to_string();

        let span = info_span!(
            "dispatch",
            method,
            service = %service,
            operation = %operation,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(req);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();
                let outcome = outcome_label(&result);

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);
                tracing::info!(duration_ms, outcome, "dispatch complete");

                ::metrics::counter!(
                    REQUESTS_TOTAL,
                    "method" => method,
                    "service" => service.clone(),
                    "outcome" => outcome
                )
                .increment(1);
                ::metrics::histogram!(
                    REQUEST_DURATION_SECONDS,
                    "method" => method,
                    "service" => service
                )
                .record(elapsed.as_secs_f64());

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
