//! Protocol-level failures: the `Failure` base and its two concrete kinds,
//! [`HandlerError`] and [`OperationError`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Reserved metadata key naming the failure kind.
pub const FAILURE_TYPE_KEY: &str = "type";

pub const HANDLER_ERROR_TYPE: &str = "nexus.HandlerError";

pub const OPERATION_ERROR_TYPE: &str = "nexus.OperationError";

// ---------------------------------------------------------------------------
// Failure
// ---------------------------------------------------------------------------

/// Base representation of a protocol-level failure.
///
/// `stack_trace` is never captured automatically; it is carried for failures
/// that arrive from remote or foreign-language sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<Failure>>,
}

impl Failure {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack_trace: None,
            metadata: BTreeMap::new(),
            details: BTreeMap::new(),
            cause: None,
        }
    }

    #[must_use]
    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_cause(mut self, cause: Failure) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|c| c as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// HandlerErrorType
// ---------------------------------------------------------------------------

/// Predefined handler error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HandlerErrorType {
    /// The error type is unknown. Subsequent requests are permissible.
    Unknown,
    /// The request is invalid due to an apparent client error.
    BadRequest,
    /// The client supplied no valid credentials.
    Unauthenticated,
    /// The caller may not execute the operation.
    Unauthorized,
    /// The requested resource could not be found.
    NotFound,
    /// The handler gave up on the request, e.g. after a `Request-Timeout`.
    RequestTimeout,
    /// The request conflicts with current state, e.g. operation already started.
    Conflict,
    /// A quota or other resource has been exhausted.
    ResourceExhausted,
    Internal,
    /// The handler cannot fulfil this request method.
    NotImplemented,
    Unavailable,
    /// A gateway timed out waiting for an upstream handler.
    UpstreamTimeout,
}

impl HandlerErrorType {
    pub const ALL: [Self; 12] = [
        Self::Unknown,
        Self::BadRequest,
        Self::Unauthenticated,
        Self::Unauthorized,
        Self::NotFound,
        Self::RequestTimeout,
        Self::Conflict,
        Self::ResourceExhausted,
        Self::Internal,
        Self::NotImplemented,
        Self::Unavailable,
        Self::UpstreamTimeout,
    ];

    /// Wire name of the type, e.g. `"BAD_REQUEST"`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::BadRequest => "BAD_REQUEST",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::NotFound => "NOT_FOUND",
            Self::RequestTimeout => "REQUEST_TIMEOUT",
            Self::Conflict => "CONFLICT",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::Internal => "INTERNAL",
            Self::NotImplemented => "NOT_IMPLEMENTED",
            Self::Unavailable => "UNAVAILABLE",
            Self::UpstreamTimeout => "UPSTREAM_TIMEOUT",
        }
    }

    /// Default retry classification when no per-instance override is set.
    #[must_use]
    pub fn retryable_by_default(self) -> bool {
        match self {
            Self::BadRequest
            | Self::Unauthenticated
            | Self::Unauthorized
            | Self::NotFound
            | Self::Conflict
            | Self::NotImplemented => false,
            Self::ResourceExhausted
            | Self::RequestTimeout
            | Self::Internal
            | Self::Unavailable
            | Self::UpstreamTimeout
            | Self::Unknown => true,
        }
    }
}

impl fmt::Display for HandlerErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing a string that names no known handler error type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown handler error type: {0}")]
pub struct UnknownHandlerErrorType(pub String);

impl FromStr for HandlerErrorType {
    type Err = UnknownHandlerErrorType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownHandlerErrorType(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// HandlerError
// ---------------------------------------------------------------------------

/// A request-level failure reported to the caller as a handler error.
///
/// ```
/// use nexusrpc_core::{HandlerError, HandlerErrorType};
///
/// let err = HandlerError::new("quota exceeded", HandlerErrorType::ResourceExhausted);
/// assert!(err.retryable());
/// let err = err.with_retryable_override(false);
/// assert!(!err.retryable());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerError {
    pub failure: Failure,
    pub error_type: HandlerErrorType,
    /// The type name as supplied, preserved even when it maps to `Unknown`.
    pub raw_error_type: String,
    pub retryable_override: Option<bool>,
}

impl HandlerError {
    #[must_use]
    pub fn new(message: impl Into<String>, error_type: HandlerErrorType) -> Self {
        let mut err = Self {
            failure: Failure::new(message),
            error_type,
            raw_error_type: error_type.as_str().to_string(),
            retryable_override: None,
        };
        err.stamp_reserved();
        err
    }

    /// Builds an error from a type name. Unknown names become
    /// [`HandlerErrorType::Unknown`] and are logged; the raw name is kept.
    #[must_use]
    pub fn from_type_name(message: impl Into<String>, type_name: &str) -> Self {
        let error_type = type_name.parse().unwrap_or_else(|_| {
            tracing::warn!(error_type = type_name, "unknown handler error type");
            HandlerErrorType::Unknown
        });
        let mut err = Self::new(message, error_type);
        err.raw_error_type = type_name.to_string();
        err.stamp_reserved();
        err
    }

    #[must_use]
    pub fn with_retryable_override(mut self, retryable: bool) -> Self {
        self.retryable_override = Some(retryable);
        self.stamp_reserved();
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.failure.metadata.insert(key.into(), value.into());
        self.stamp_reserved();
        self
    }

    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.failure.details.insert(key.into(), value);
        self.stamp_reserved();
        self
    }

    #[must_use]
    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.failure.stack_trace = Some(stack_trace.into());
        self
    }

    #[must_use]
    pub fn with_cause(mut self, cause: Failure) -> Self {
        self.failure.cause = Some(Box::new(cause));
        self
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.failure.message
    }

    /// Whether the caller should retry. An explicit override always wins over
    /// the type's default classification.
    #[must_use]
    pub fn retryable(&self) -> bool {
        self.retryable_override
            .unwrap_or_else(|| self.error_type.retryable_by_default())
    }

    // Reserved keys are written last so user-supplied entries cannot shadow them.
    fn stamp_reserved(&mut self) {
        self.failure
            .metadata
            .insert(FAILURE_TYPE_KEY.to_string(), HANDLER_ERROR_TYPE.to_string());
        self.failure.details.insert(
            "type".to_string(),
            serde_json::Value::String(self.raw_error_type.clone()),
        );
        match self.retryable_override {
            Some(r) => {
                self.failure
                    .details
                    .insert("retryableOverride".to_string(), serde_json::Value::Bool(r));
            }
            None => {
                self.failure.details.remove("retryableOverride");
            }
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.failure.message, self.raw_error_type)
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.failure
            .cause
            .as_deref()
            .map(|c| c as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// OperationError
// ---------------------------------------------------------------------------

/// Terminal negative outcome described by an [`OperationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationErrorState {
    Failed,
    Canceled,
}

impl OperationErrorState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for OperationErrorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The operation itself failed or was canceled.
///
/// Distinct from [`HandlerError`], which reports a failure to handle the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationError {
    pub failure: Failure,
    pub state: OperationErrorState,
}

impl OperationError {
    #[must_use]
    pub fn new(message: impl Into<String>, state: OperationErrorState) -> Self {
        let mut err = Self {
            failure: Failure::new(message),
            state,
        };
        err.stamp_reserved();
        err
    }

    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(message, OperationErrorState::Failed)
    }

    #[must_use]
    pub fn canceled(message: impl Into<String>) -> Self {
        Self::new(message, OperationErrorState::Canceled)
    }

    #[must_use]
    pub fn with_cause(mut self, cause: Failure) -> Self {
        self.failure.cause = Some(Box::new(cause));
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.failure.metadata.insert(key.into(), value.into());
        self.stamp_reserved();
        self
    }

    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.failure.details.insert(key.into(), value);
        self.stamp_reserved();
        self
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.failure.message
    }

    fn stamp_reserved(&mut self) {
        self.failure
            .metadata
            .insert(FAILURE_TYPE_KEY.to_string(), OPERATION_ERROR_TYPE.to_string());
        self.failure.details.insert(
            "state".to_string(),
            serde_json::Value::String(self.state.as_str().to_string()),
        );
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation {}: {}", self.state, self.failure.message)
    }
}

impl std::error::Error for OperationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.failure
            .cause
            .as_deref()
            .map(|c| c as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn resource_exhausted_is_retryable_by_default() {
        let err = HandlerError::new("slow down", HandlerErrorType::ResourceExhausted);
        assert!(err.retryable());
    }

    #[test]
    fn override_wins_over_type_default() {
        let err = HandlerError::new("slow down", HandlerErrorType::ResourceExhausted)
            .with_retryable_override(false);
        assert!(!err.retryable());

        let err = HandlerError::new("bad", HandlerErrorType::BadRequest).with_retryable_override(true);
        assert!(err.retryable());
    }

    #[test]
    fn bad_request_is_not_retryable() {
        let err = HandlerError::new("bad input", HandlerErrorType::BadRequest);
        assert!(!err.retryable());
    }

    #[test]
    fn default_retry_table() {
        let non_retryable = [
            HandlerErrorType::BadRequest,
            HandlerErrorType::Unauthenticated,
            HandlerErrorType::Unauthorized,
            HandlerErrorType::NotFound,
            HandlerErrorType::Conflict,
            HandlerErrorType::NotImplemented,
        ];
        for t in HandlerErrorType::ALL {
            assert_eq!(t.retryable_by_default(), !non_retryable.contains(&t), "{t}");
        }
    }

    #[test]
    fn reserved_metadata_and_details_cannot_be_overridden() {
        let err = HandlerError::new("nope", HandlerErrorType::Conflict)
            .with_metadata("type", "spoofed")
            .with_metadata("region", "eu")
            .with_detail("type", serde_json::json!("spoofed"))
            .with_retryable_override(true);
        assert_eq!(err.failure.metadata["type"], HANDLER_ERROR_TYPE);
        assert_eq!(err.failure.metadata["region"], "eu");
        assert_eq!(err.failure.details["type"], serde_json::json!("CONFLICT"));
        assert_eq!(err.failure.details["retryableOverride"], serde_json::json!(true));
    }

    #[test]
    fn unknown_type_name_maps_to_unknown_and_keeps_raw() {
        let err = HandlerError::from_type_name("weird", "TEAPOT");
        assert_eq!(err.error_type, HandlerErrorType::Unknown);
        assert_eq!(err.raw_error_type, "TEAPOT");
        assert_eq!(err.failure.details["type"], serde_json::json!("TEAPOT"));
        assert!(err.retryable());

        let err = HandlerError::from_type_name("known", "NOT_FOUND");
        assert_eq!(err.error_type, HandlerErrorType::NotFound);
    }

    #[test]
    fn operation_error_records_state() {
        let err = OperationError::canceled("user asked").with_cause(Failure::new("root cause"));
        assert_eq!(err.state, OperationErrorState::Canceled);
        assert_eq!(err.failure.metadata["type"], OPERATION_ERROR_TYPE);
        assert_eq!(err.failure.details["state"], serde_json::json!("canceled"));
        assert_eq!(err.source().unwrap().to_string(), "root cause");
    }

    #[test]
    fn failure_round_trips_through_json() {
        let failure = Failure::new("outer")
            .with_metadata("k", "v")
            .with_cause(Failure::new("inner").with_stack_trace("at line 1"));
        let json = serde_json::to_string(&failure).unwrap();
        let back: Failure = serde_json::from_str(&json).unwrap();
        assert_eq!(back, failure);
    }

    proptest! {
        #[test]
        fn override_always_wins(idx in 0usize..12, over in any::<bool>()) {
            let t = HandlerErrorType::ALL[idx];
            let err = HandlerError::new("x", t).with_retryable_override(over);
            prop_assert_eq!(err.retryable(), over);
            prop_assert_eq!(HandlerError::new("x", t).retryable(), t.retryable_by_default());
        }

        #[test]
        fn type_names_parse_back(idx in 0usize..12) {
            let t = HandlerErrorType::ALL[idx];
            prop_assert_eq!(t.as_str().parse::<HandlerErrorType>().unwrap(), t);
        }
    }
}
