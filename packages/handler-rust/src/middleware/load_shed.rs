//! Load-shedding middleware for dispatch requests.
//!
//! Rejects requests when `max_concurrent_requests` are already in flight,
//! with a retryable `RESOURCE_EXHAUSTED` handler error. Cancel requests are
//! exempt by default: they release work, and shedding them under load would
//! keep an overloaded dispatcher overloaded.

use std::sync::Arc;
use std::task::{Context, Poll};

use nexusrpc_core::{HandlerError, HandlerErrorType};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tower::{Layer, Service};

use super::{DispatchFuture, DispatchRequest, DispatchResponse};
use crate::error::DispatchError;
use crate::operation::HandlerMethod;

// ---------------------------------------------------------------------------
// LoadShedLayer
// ---------------------------------------------------------------------------

/// Tower layer that limits concurrent requests via a semaphore.
///
/// When all permits are taken, limited requests are rejected immediately
/// rather than queued. Exempt methods neither take nor need a permit.
#[derive(Debug, Clone)]
pub struct LoadShedLayer {
    semaphore: Arc<Semaphore>,
    exempt: Arc<[HandlerMethod]>,
}

impl LoadShedLayer {
    #[must_use]
    pub fn new(max_concurrent: u32) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent as usize)),
            exempt: Arc::new([HandlerMethod::Cancel]),
        }
    }

    /// Replaces the set of methods that bypass the limit.
    #[must_use]
    pub fn with_exempt(mut self, methods: &[HandlerMethod]) -> Self {
        self.exempt = methods.into();
        self
    }
}

impl<S> Layer<S> for LoadShedLayer {
    type Service = LoadShedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadShedService {
            inner,
            semaphore: Arc::clone(&self.semaphore),
            exempt: Arc::clone(&self.exempt),
        }
    }
}

// ---------------------------------------------------------------------------
// LoadShedService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadShedService<S> {
    inner: S,
    semaphore: Arc<Semaphore>,
    exempt: Arc<[HandlerMethod]>,
}

impl<S> LoadShedService<S> {
    /// `Ok(None)` for exempt requests, `Ok(Some(_))` when admitted.
    fn admit(&self, req: &DispatchRequest) -> Result<Option<OwnedSemaphorePermit>, DispatchError> {
        let method = req.method();
        if self.exempt.contains(&method) {
            return Ok(None);
        }
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Ok(Some(permit)),
            Err(_) => {
                tracing::warn!(
                    method = method.as_str(),
                    service = req.service(),
                    operation = req.operation(),
                    "dispatcher overloaded, shedding request"
                );
                Err(HandlerError::new(
                    format!("Too many concurrent requests; {method} request was not admitted."),
                    HandlerErrorType::ResourceExhausted,
                )
                .into())
            }
        }
    }
}

impl<S> Service<DispatchRequest> for LoadShedService<S>
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
        let permit = match self.admit(&req) {
            Ok(permit) => permit,
            Err(err) => return Box::pin(async move { Err(err) }),
        };

        let fut = self.inner.call(req);
        Box::pin(async move {
            let result = fut.await;
            drop(permit);
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
