//! Request dispatch: routes each request to its operation handler.
//!
//! The route table is built once in [`Dispatcher::new`]. Every operation's
//! handler is wrapped by the execution adapter and then by the interceptor
//! chain, and the resulting `Arc` is returned for every later request.

use std::collections::HashMap;
use std::sync::Arc;

use nexusrpc_core::{HandlerError, HandlerErrorType, OperationInfo, Payload, TypeTag};
use tracing::Instrument;

use crate::context::{
    CancelOperationContext, FetchOperationInfoContext, FetchOperationResultContext,
    StartOperationContext,
};
use crate::error::{ConfigurationError, DispatchError, NotFoundError};
use crate::executor::{ExecutingOperationHandler, ExecutionAdapter, Executor};
use crate::interceptor::{InterceptorChain, OperationHandlerInterceptor};
use crate::lazy::LazyValue;
use crate::operation::{OperationHandler, StartOperationResult};
use crate::service_handler::ServiceHandler;

struct Route {
    handler: Arc<dyn OperationHandler>,
    input_type: TypeTag,
}

struct ServiceRoutes {
    operations: HashMap<String, Route>,
    /// Public operation names, sorted.
    names: Vec<String>,
}

/// Routes the four Nexus RPCs to registered operation handlers.
pub struct Dispatcher {
    services: HashMap<String, ServiceRoutes>,
    /// Registered service names, sorted.
    service_names: Vec<String>,
}

impl Dispatcher {
    /// Builds a dispatcher with no interceptors.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if two handlers share a service name, or if
    /// a handler has a blocking method and no executor is given.
    pub fn new(
        service_handlers: Vec<ServiceHandler>,
        executor: Option<Arc<dyn Executor>>,
    ) -> Result<Self, ConfigurationError> {
        Self::with_interceptors(service_handlers, executor, &InterceptorChain::default())
    }

    #[must_use]
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// Builds a dispatcher whose handlers are wrapped by `interceptors`.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::new`].
    pub fn with_interceptors(
        service_handlers: Vec<ServiceHandler>,
        executor: Option<Arc<dyn Executor>>,
        interceptors: &InterceptorChain,
    ) -> Result<Self, ConfigurationError> {
        let adapter = ExecutionAdapter::new(executor);
        let mut services = HashMap::with_capacity(service_handlers.len());

        for service_handler in service_handlers {
            let service = service_handler.name().to_string();
            if services.contains_key(&service) {
                return Err(ConfigurationError::DuplicateService(service));
            }

            let mut operations = HashMap::new();
            for (op, handler) in service_handler.operations() {
                if !adapter.has_executor() {
                    if let Some(method) = handler.execution_modes().blocking_methods().next() {
                        return Err(ConfigurationError::BlockingWithoutExecutor {
                            service,
                            operation: op.name.clone(),
                            method,
                        });
                    }
                }

                let executing: Arc<dyn OperationHandler> = Arc::new(ExecutingOperationHandler::new(
                    service.clone(),
                    op.name.clone(),
                    Arc::clone(handler),
                    adapter.clone(),
                ));
                operations.insert(
                    op.name.clone(),
                    Route {
                        handler: interceptors.apply(executing),
                        input_type: op.input_type,
                    },
                );
            }

            let mut names: Vec<String> = operations.keys().cloned().collect();
            names.sort();
            tracing::debug!(service = %service, operations = names.len(), "service registered");
            services.insert(service, ServiceRoutes { operations, names });
        }

        let mut service_names: Vec<String> = services.keys().cloned().collect();
        service_names.sort();
        Ok(Self {
            services,
            service_names,
        })
    }

    /// Registered service names, sorted.
    #[must_use]
    pub fn service_names(&self) -> &[String] {
        &self.service_names
    }

    /// The wrapped handler for an operation. Repeated calls return the same `Arc`.
    ///
    /// # Errors
    ///
    /// Returns `NotFoundError` naming the registered services or the service's
    /// operations.
    pub fn route(&self, service: &str, operation: &str) -> Result<Arc<dyn OperationHandler>, NotFoundError> {
        self.lookup(service, operation).map(|route| Arc::clone(&route.handler))
    }

    fn lookup(&self, service: &str, operation: &str) -> Result<&Route, NotFoundError> {
        let routes = self.services.get(service).ok_or_else(|| NotFoundError::Service {
            service: service.to_string(),
            known: self.service_names.clone(),
        })?;
        routes.operations.get(operation).ok_or_else(|| NotFoundError::Operation {
            service: service.to_string(),
            operation: operation.to_string(),
            known: routes.names.clone(),
        })
    }

    /// Decodes the input as the operation's declared type and starts it.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown route, `Handler(BAD_REQUEST)` if the
    /// input cannot be decoded, or whatever the handler returns.
    pub async fn start_operation(
        &self,
        ctx: &StartOperationContext,
        input: LazyValue,
    ) -> Result<StartOperationResult, DispatchError> {
        let span = tracing::info_span!(
            "nexus.start_operation",
            service = %ctx.service,
            operation = %ctx.operation,
            request_id = %ctx.request_id,
        );
        async move {
            let route = self.lookup(&ctx.service, &ctx.operation)?;
            let input = input.consume(Some(&route.input_type)).await.map_err(|err| {
                tracing::debug!(error = %err, "failed to decode operation input");
                HandlerError::new(format!("invalid operation input: {err}"), HandlerErrorType::BadRequest)
            })?;
            route.handler.start(ctx, input).await
        }
        .instrument(span)
        .await
    }

    /// # Errors
    ///
    /// Returns `NotFound` for an unknown route, or whatever the handler returns.
    pub async fn cancel_operation(&self, ctx: &CancelOperationContext, token: &str) -> Result<(), DispatchError> {
        let span = tracing::info_span!(
            "nexus.cancel_operation",
            service = %ctx.service,
            operation = %ctx.operation,
        );
        async move { self.route(&ctx.service, &ctx.operation)?.cancel(ctx, token).await }
            .instrument(span)
            .await
    }

    /// # Errors
    ///
    /// Returns `NotFound` for an unknown route, or whatever the handler returns.
    pub async fn fetch_operation_info(
        &self,
        ctx: &FetchOperationInfoContext,
        token: &str,
    ) -> Result<OperationInfo, DispatchError> {
        let span = tracing::info_span!(
            "nexus.fetch_operation_info",
            service = %ctx.service,
            operation = %ctx.operation,
        );
        async move { self.route(&ctx.service, &ctx.operation)?.fetch_info(ctx, token).await }
            .instrument(span)
            .await
    }

    /// # Errors
    ///
    /// Returns `NotFound` for an unknown route, an `OperationError` if the
    /// operation failed or was canceled, or whatever else the handler returns.
    pub async fn fetch_operation_result(
        &self,
        ctx: &FetchOperationResultContext,
        token: &str,
    ) -> Result<Payload, DispatchError> {
        let span = tracing::info_span!(
            "nexus.fetch_operation_result",
            service = %ctx.service,
            operation = %ctx.operation,
        );
        async move { self.route(&ctx.service, &ctx.operation)?.fetch_result(ctx, token).await }
            .instrument(span)
            .await
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("services", &self.service_names)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// DispatcherBuilder
// ---------------------------------------------------------------------------

/// Collects service handlers, an executor and interceptors for a [`Dispatcher`].
#[derive(Default)]
pub struct DispatcherBuilder {
    services: Vec<ServiceHandler>,
    executor: Option<Arc<dyn Executor>>,
    interceptors: InterceptorChain,
}

impl DispatcherBuilder {
    #[must_use]
    pub fn service(mut self, handler: ServiceHandler) -> Self {
        self.services.push(handler);
        self
    }

    #[must_use]
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Adds an interceptor inside those already added.
    #[must_use]
    pub fn interceptor(mut self, interceptor: Arc<dyn OperationHandlerInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// # Errors
    ///
    /// See [`Dispatcher::new`].
    pub fn build(self) -> Result<Dispatcher, ConfigurationError> {
        Dispatcher::with_interceptors(self.services, self.executor, &self.interceptors)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
