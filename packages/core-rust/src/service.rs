//! Service and operation definitions.
//!
//! A [`ServiceDefinition`] is the contract a service handler is bound to: the
//! service's wire name plus, for every operation, its public name, the method
//! name used to bind an implementation, and its declared input/output types.
//! Definitions are built once through [`ServiceDefinitionBuilder`] and are
//! immutable afterwards.

use std::collections::{HashMap, HashSet};

use crate::payload::{PayloadType, TypeTag};

/// Errors detected while building a [`ServiceDefinition`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    #[error("service name must not be empty")]
    EmptyServiceName,
    #[error("operation in service '{service}' has an empty name")]
    EmptyOperationName { service: String },
    #[error("operation '{operation}' in service '{service}' has an empty method name")]
    EmptyMethodName { service: String, operation: String },
    #[error("operation '{operation}' is defined multiple times in service '{service}'")]
    DuplicateOperation { service: String, operation: String },
    #[error("method name '{method_name}' is bound to more than one operation in service '{service}'")]
    DuplicateMethodName { service: String, method_name: String },
}

// ---------------------------------------------------------------------------
// OperationDefinition
// ---------------------------------------------------------------------------

/// Declaration of one operation: public name, binding handle, and types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationDefinition {
    /// Name callers address the operation by.
    pub name: String,
    /// Internal handle binding this operation to its implementation.
    pub method_name: String,
    pub input_type: TypeTag,
    pub output_type: TypeTag,
}

impl OperationDefinition {
    /// Declares an operation whose method name equals its public name.
    #[must_use]
    pub fn new<I: PayloadType, O: PayloadType>(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            method_name: name.clone(),
            name,
            input_type: TypeTag::of::<I>(),
            output_type: TypeTag::of::<O>(),
        }
    }

    /// Declares an operation from explicit type tags.
    #[must_use]
    pub fn with_types(name: impl Into<String>, input_type: TypeTag, output_type: TypeTag) -> Self {
        let name = name.into();
        Self {
            method_name: name.clone(),
            name,
            input_type,
            output_type,
        }
    }

    /// Overrides the method name, e.g. when the public name is renamed.
    #[must_use]
    pub fn method_name(mut self, method_name: impl Into<String>) -> Self {
        self.method_name = method_name.into();
        self
    }
}

// ---------------------------------------------------------------------------
// ServiceDefinition
// ---------------------------------------------------------------------------

/// Immutable description of a service and its operations.
///
/// Operations keep their declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDefinition {
    name: String,
    operations: Vec<OperationDefinition>,
    by_name: HashMap<String, usize>,
}

impl ServiceDefinition {
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ServiceDefinitionBuilder {
        ServiceDefinitionBuilder {
            name: name.into(),
            operations: Vec::new(),
        }
    }

    /// The unique wire name of the service.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up an operation by its public name.
    #[must_use]
    pub fn operation(&self, name: &str) -> Option<&OperationDefinition> {
        self.by_name.get(name).map(|&i| &self.operations[i])
    }

    /// Looks up an operation by its method name.
    #[must_use]
    pub fn operation_by_method(&self, method_name: &str) -> Option<&OperationDefinition> {
        self.operations.iter().find(|op| op.method_name == method_name)
    }

    /// Iterates operations in declaration order.
    pub fn operations(&self) -> impl Iterator<Item = &OperationDefinition> {
        self.operations.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Public operation names, sorted, for error messages.
    #[must_use]
    pub fn operation_names_sorted(&self) -> Vec<String> {
        let mut names: Vec<String> = self.operations.iter().map(|op| op.name.clone()).collect();
        names.sort();
        names
    }
}

/// Builder for [`ServiceDefinition`]; validation happens in [`build`](Self::build).
#[derive(Debug)]
pub struct ServiceDefinitionBuilder {
    name: String,
    operations: Vec<OperationDefinition>,
}

impl ServiceDefinitionBuilder {
    #[must_use]
    pub fn operation(mut self, operation: OperationDefinition) -> Self {
        self.operations.push(operation);
        self
    }

    /// # Errors
    ///
    /// Returns `DefinitionError` for empty names or duplicate operation or
    /// method names.
    pub fn build(self) -> Result<ServiceDefinition, DefinitionError> {
        if self.name.is_empty() {
            return Err(DefinitionError::EmptyServiceName);
        }

        let mut by_name = HashMap::with_capacity(self.operations.len());
        let mut method_names = HashSet::with_capacity(self.operations.len());
        for (i, op) in self.operations.iter().enumerate() {
            if op.name.is_empty() {
                return Err(DefinitionError::EmptyOperationName { service: self.name });
            }
            if op.method_name.is_empty() {
                return Err(DefinitionError::EmptyMethodName {
                    service: self.name,
                    operation: op.name.clone(),
                });
            }
            if by_name.insert(op.name.clone(), i).is_some() {
                return Err(DefinitionError::DuplicateOperation {
                    service: self.name,
                    operation: op.name.clone(),
                });
            }
            if !method_names.insert(op.method_name.as_str()) {
                return Err(DefinitionError::DuplicateMethodName {
                    service: self.name,
                    method_name: op.method_name.clone(),
                });
            }
        }

        Ok(ServiceDefinition {
            name: self.name,
            operations: self.operations,
            by_name,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
