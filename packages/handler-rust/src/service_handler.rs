//! Binding of a service definition to its operation handlers.
//!
//! A [`ServiceHandler`] is built once, before the dispatcher serves requests,
//! and is read-only afterwards. Handlers are bound to definition entries by
//! method name, so renaming an operation's public name does not break binding.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use nexusrpc_core::{OperationDefinition, PayloadType, ServiceDefinition, TypeTag};

use crate::context::StartOperationContext;
use crate::error::{ConfigurationError, DispatchError};
use crate::operation::{
    AsyncOperationHandler, BlockingOperationHandler, OperationHandler, OperationMethods,
    SyncOperation, TypedOperation,
};

// ---------------------------------------------------------------------------
// RegisteredOperation
// ---------------------------------------------------------------------------

/// An instantiated handler plus the types it was written for.
pub struct RegisteredOperation {
    pub handler: Arc<dyn OperationHandler>,
    pub input_type: TypeTag,
    pub output_type: TypeTag,
}

impl RegisteredOperation {
    #[must_use]
    pub fn new(handler: Arc<dyn OperationHandler>, input_type: TypeTag, output_type: TypeTag) -> Self {
        Self {
            handler,
            input_type,
            output_type,
        }
    }

    #[must_use]
    pub fn typed<I: PayloadType, O: PayloadType>(op: TypedOperation<I, O>) -> Self {
        Self::new(Arc::new(op), TypeTag::of::<I>(), TypeTag::of::<O>())
    }

    #[must_use]
    pub fn sync<I: PayloadType, O: PayloadType>(op: SyncOperation<I, O>) -> Self {
        Self::new(Arc::new(op), TypeTag::of::<I>(), TypeTag::of::<O>())
    }
}

// ---------------------------------------------------------------------------
// OperationFactories
// ---------------------------------------------------------------------------

type OperationFactory = Box<dyn FnOnce() -> RegisteredOperation + Send>;

/// Handler factories keyed by method name.
///
/// Each factory runs once, when the service handler is built.
#[derive(Default)]
pub struct OperationFactories {
    factories: Vec<(String, OperationFactory)>,
}

impl OperationFactories {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn register<F>(mut self, method_name: impl Into<String>, factory: F) -> Self
    where
        F: FnOnce() -> RegisteredOperation + Send + 'static,
    {
        self.factories.push((method_name.into(), Box::new(factory)));
        self
    }

    /// Registers a synchronously-completing operation.
    #[must_use]
    pub fn sync_operation<I, O, F, Fut>(self, method_name: impl Into<String>, f: F) -> Self
    where
        I: PayloadType,
        O: PayloadType,
        F: Fn(StartOperationContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, DispatchError>> + Send + 'static,
    {
        self.register(method_name, move || RegisteredOperation::sync(SyncOperation::new(f)))
    }

    /// Registers a synchronously-completing operation whose `start` blocks.
    #[must_use]
    pub fn blocking_sync_operation<I, O, F>(self, method_name: impl Into<String>, f: F) -> Self
    where
        I: PayloadType,
        O: PayloadType,
        F: Fn(&StartOperationContext, I) -> Result<O, DispatchError> + Send + Sync + 'static,
    {
        self.register(method_name, move || RegisteredOperation::sync(SyncOperation::blocking(f)))
    }

    /// Registers a general handler with non-blocking methods.
    #[must_use]
    pub fn operation<I, O, H>(self, method_name: impl Into<String>, handler: H) -> Self
    where
        I: PayloadType,
        O: PayloadType,
        H: AsyncOperationHandler<I, O>,
    {
        self.register(method_name, move || {
            RegisteredOperation::typed(TypedOperation::from_async(handler))
        })
    }

    /// Registers a general handler with blocking methods.
    #[must_use]
    pub fn blocking_operation<I, O, H>(self, method_name: impl Into<String>, handler: H) -> Self
    where
        I: PayloadType,
        O: PayloadType,
        H: BlockingOperationHandler<I, O>,
    {
        self.register(method_name, move || {
            RegisteredOperation::typed(TypedOperation::from_blocking(handler))
        })
    }

    /// Registers a handler assembled method by method.
    #[must_use]
    pub fn methods<I: PayloadType, O: PayloadType>(
        self,
        method_name: impl Into<String>,
        methods: OperationMethods<I, O>,
    ) -> Self {
        self.register(method_name, move || RegisteredOperation::typed(methods.build()))
    }

    /// Registered method names, in registration order.
    #[must_use]
    pub fn method_names(&self) -> Vec<&str> {
        self.factories.iter().map(|(name, _)| name.as_str()).collect()
    }

    fn into_map(self, service: &str) -> Result<HashMap<String, OperationFactory>, ConfigurationError> {
        let mut map = HashMap::with_capacity(self.factories.len());
        for (method_name, factory) in self.factories {
            if map.contains_key(&method_name) {
                return Err(ConfigurationError::DuplicateOperationHandler {
                    service: service.to_string(),
                    method_name,
                });
            }
            map.insert(method_name, factory);
        }
        Ok(map)
    }
}

// ---------------------------------------------------------------------------
// ServiceHandler
// ---------------------------------------------------------------------------

/// A service definition bound to one handler per operation.
///
/// Every operation in the definition has a handler, and every handler belongs
/// to an operation in the definition.
pub struct ServiceHandler {
    definition: ServiceDefinition,
    /// Keyed by public operation name.
    handlers: HashMap<String, Arc<dyn OperationHandler>>,
}

impl ServiceHandler {
    /// Binds each operation in `definition` to the factory registered under its
    /// method name, checking declared types against the handler's.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if a factory is missing, duplicated or not
    /// named by the definition, or if its types differ from the declared ones.
    pub fn from_registry(
        definition: ServiceDefinition,
        factories: OperationFactories,
    ) -> Result<Self, ConfigurationError> {
        let service = definition.name().to_string();
        let mut factories = factories.into_map(&service)?;

        let declared: HashSet<&str> = definition.operations().map(|op| op.method_name.as_str()).collect();
        let mut unknown: Vec<&String> = factories
            .keys()
            .filter(|name| !declared.contains(name.as_str()))
            .collect();
        unknown.sort();
        if let Some(method_name) = unknown.first() {
            let mut available: Vec<String> = declared.iter().map(|s| (*s).to_string()).collect();
            available.sort();
            return Err(ConfigurationError::UnknownMethodName {
                service,
                method_name: (*method_name).clone(),
                available,
            });
        }

        let mut handlers = HashMap::with_capacity(definition.len());
        for op in definition.operations() {
            let factory = factories.remove(&op.method_name).ok_or_else(|| {
                ConfigurationError::MissingOperationHandler {
                    service: service.clone(),
                    method_name: op.method_name.clone(),
                }
            })?;
            let registered = factory();
            check_types(&service, op, &registered)?;
            handlers.insert(op.name.clone(), registered.handler);
        }

        tracing::debug!(service = %service, operations = handlers.len(), "service handler bound");
        Ok(Self {
            definition,
            handlers,
        })
    }

    /// Builds a handler without a separate definition: each factory becomes an
    /// operation whose public name is its method name.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` for duplicate method names or an invalid
    /// service name.
    pub fn from_factories(
        service_name: impl Into<String>,
        factories: OperationFactories,
    ) -> Result<Self, ConfigurationError> {
        let service_name = service_name.into();
        let factories = factories.into_map(&service_name)?;

        // Registration order is lost in the map; sort for a stable definition.
        let mut entries: Vec<(String, OperationFactory)> = factories.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut builder = ServiceDefinition::builder(service_name);
        let mut handlers = HashMap::with_capacity(entries.len());
        for (method_name, factory) in entries {
            let registered = factory();
            builder = builder.operation(OperationDefinition::with_types(
                method_name.clone(),
                registered.input_type,
                registered.output_type,
            ));
            handlers.insert(method_name, registered.handler);
        }

        Ok(Self {
            definition: builder.build()?,
            handlers,
        })
    }

    /// Binds pre-built handlers keyed by public operation name.
    ///
    /// Handlers are erased, so their types are not checked.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if an operation lacks a handler or a
    /// handler has no operation.
    pub fn new(
        definition: ServiceDefinition,
        mut handlers: HashMap<String, Arc<dyn OperationHandler>>,
    ) -> Result<Self, ConfigurationError> {
        let service = definition.name().to_string();
        let mut bound = HashMap::with_capacity(handlers.len());
        for op in definition.operations() {
            let handler = handlers.remove(&op.name).ok_or_else(|| {
                ConfigurationError::MissingOperationHandler {
                    service: service.clone(),
                    method_name: op.method_name.clone(),
                }
            })?;
            bound.insert(op.name.clone(), handler);
        }

        let mut extra: Vec<String> = handlers.into_keys().collect();
        extra.sort();
        if let Some(operation) = extra.into_iter().next() {
            return Err(ConfigurationError::ExtraOperationHandler { service, operation });
        }

        Ok(Self {
            definition,
            handlers: bound,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.definition.name()
    }

    #[must_use]
    pub fn definition(&self) -> &ServiceDefinition {
        &self.definition
    }

    /// The handler for a public operation name, if any.
    #[must_use]
    pub fn lookup(&self, operation: &str) -> Option<&Arc<dyn OperationHandler>> {
        self.handlers.get(operation)
    }

    /// Operations with their handlers, in definition order.
    pub fn operations(&self) -> impl Iterator<Item = (&OperationDefinition, &Arc<dyn OperationHandler>)> {
        self.definition
            .operations()
            .filter_map(|op| self.handlers.get(&op.name).map(|h| (op, h)))
    }
}

fn check_types(
    service: &str,
    op: &OperationDefinition,
    registered: &RegisteredOperation,
) -> Result<(), ConfigurationError> {
    let mismatch = |position, expected, actual| ConfigurationError::TypeMismatch {
        service: service.to_string(),
        operation: op.name.clone(),
        position,
        expected,
        actual,
    };
    if registered.input_type != op.input_type {
        return Err(mismatch("input", op.input_type, registered.input_type));
    }
    if registered.output_type != op.output_type {
        return Err(mismatch("output", op.output_type, registered.output_type));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use nexusrpc_core::Payload;

    use super::*;
    use crate::operation::StartOperationResult;

    fn definition() -> ServiceDefinition {
        ServiceDefinition::builder("Greeter")
            .operation(OperationDefinition::new::<String, String>("say-hello").method_name("hello"))
            .operation(OperationDefinition::new::<u32, u32>("double"))
            .build()
            .unwrap()
    }

    fn factories() -> OperationFactories {
        OperationFactories::new()
            .sync_operation("hello", |_ctx, name: String| async move { Ok(format!("hello {name}")) })
            .blocking_sync_operation("double", |_ctx, n: u32| Ok(n * 2))
    }

    #[tokio::test]
    async fn binds_by_method_name_and_looks_up_by_public_name() {
        let handler = ServiceHandler::from_registry(definition(), factories()).unwrap();
        assert_eq!(handler.name(), "Greeter");
        assert!(handler.lookup("hello").is_none());

        let op = handler.lookup("say-hello").unwrap();
        let result = op
            .start(
                &StartOperationContext::new("Greeter", "say-hello"),
                Payload::new("ada".to_string()),
            )
            .await
            .unwrap();
        let StartOperationResult::Sync(value) = result else {
            panic!("expected sync result");
        };
        assert_eq!(value.downcast::<String>().unwrap(), "hello ada");
    }

    #[test]
    fn operations_follow_definition_order() {
        let handler = ServiceHandler::from_registry(definition(), factories()).unwrap();
        let names: Vec<&str> = handler.operations().map(|(op, _)| op.name.as_str()).collect();
        assert_eq!(names, vec!["say-hello", "double"]);
    }

    #[test]
    fn missing_factory_names_the_method() {
        let factories = OperationFactories::new()
            .sync_operation("hello", |_ctx, name: String| async move { Ok(name) });
        let err = ServiceHandler::from_registry(definition(), factories).err().unwrap();
        assert_eq!(
            err,
            ConfigurationError::MissingOperationHandler {
                service: "Greeter".to_string(),
                method_name: "double".to_string(),
            }
        );
    }

    #[test]
    fn unknown_factory_lists_available_method_names() {
        let factories = factories().blocking_sync_operation("triple", |_ctx, n: u32| Ok(n * 3));
        let err = ServiceHandler::from_registry(definition(), factories).err().unwrap();
        assert_eq!(
            err.to_string(),
            "Operation method name 'triple' in service 'Greeter' does not match an operation \
             method name in the service definition. Available method names: double, hello."
        );
    }

    #[test]
    fn duplicate_factory_is_rejected() {
        let factories = factories().blocking_sync_operation("double", |_ctx, n: u32| Ok(n));
        let err = ServiceHandler::from_registry(definition(), factories).err().unwrap();
        assert!(matches!(
            err,
            ConfigurationError::DuplicateOperationHandler { ref method_name, .. } if method_name == "double"
        ));
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let factories = OperationFactories::new()
            .sync_operation("hello", |_ctx, name: String| async move { Ok(name) })
            .blocking_sync_operation("double", |_ctx, n: u64| Ok(n * 2));
        let err = ServiceHandler::from_registry(definition(), factories).err().unwrap();
        let ConfigurationError::TypeMismatch {
            position,
            expected,
            actual,
            ..
        } = err
        else {
            panic!("expected type mismatch, got {err:?}");
        };
        assert_eq!(position, "input");
        assert!(expected.is::<u32>());
        assert!(actual.is::<u64>());
    }

    #[test]
    fn from_factories_synthesizes_definition() {
        let handler = ServiceHandler::from_factories("Adhoc", factories()).unwrap();
        let def = handler.definition();
        assert_eq!(def.name(), "Adhoc");
        assert_eq!(def.operation_names_sorted(), vec!["double", "hello"]);
        assert!(def.operation("hello").unwrap().input_type.is::<String>());
        assert!(handler.lookup("double").is_some());
    }

    #[test]
    fn manual_construction_requires_exact_handler_set() {
        let op: Arc<dyn OperationHandler> =
            Arc::new(SyncOperation::new(|_ctx, n: u32| async move { Ok(n) }));

        let mut handlers = HashMap::new();
        handlers.insert("double".to_string(), Arc::clone(&op));
        let err = ServiceHandler::new(definition(), handlers.clone()).err().unwrap();
        assert!(matches!(err, ConfigurationError::MissingOperationHandler { .. }));

        handlers.insert("say-hello".to_string(), Arc::clone(&op));
        handlers.insert("extra".to_string(), op);
        let err = ServiceHandler::new(definition(), handlers).err().unwrap();
        assert_eq!(
            err,
            ConfigurationError::ExtraOperationHandler {
                service: "Greeter".to_string(),
                operation: "extra".to_string(),
            }
        );
    }
}
