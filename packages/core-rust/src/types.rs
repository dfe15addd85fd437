use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::failure::OperationErrorState;

/// Lifecycle state of an asynchronously-completing operation.
///
/// State machine: `Running -> {Succeeded, Failed, Canceled}`. Terminal states
/// have no outgoing transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationState {
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl OperationState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<OperationErrorState> for OperationState {
    fn from(state: OperationErrorState) -> Self {
        match state {
            OperationErrorState::Failed => Self::Failed,
            OperationErrorState::Canceled => Self::Canceled,
        }
    }
}

/// Current status of an operation, as returned by a fetch-info request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationInfo {
    pub token: String,
    pub state: OperationState,
}

impl OperationInfo {
    #[must_use]
    pub fn new(token: impl Into<String>, state: OperationState) -> Self {
        Self {
            token: token.into(),
            state,
        }
    }
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

static LINK_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_./]+$").expect("link type pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("link type '{0}' may only contain alphanumerics, '_', '.' and '/'")]
    InvalidType(String),
    #[error("link url must not be empty")]
    EmptyUrl,
}

/// A URL plus a type describing how to decode it.
///
/// Links carry caller information to a handler (inbound) or handler
/// information back to the caller (outbound). The URL is percent-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    url: String,
    #[serde(rename = "type")]
    link_type: String,
}

impl Link {
    /// # Errors
    ///
    /// Returns `LinkError` if the URL is empty or the type has characters
    /// outside `[A-Za-z0-9_./]`.
    pub fn new(url: impl Into<String>, link_type: impl Into<String>) -> Result<Self, LinkError> {
        let url = url.into();
        let link_type = link_type.into();
        if url.is_empty() {
            return Err(LinkError::EmptyUrl);
        }
        if !LINK_TYPE.is_match(&link_type) {
            return Err(LinkError::InvalidType(link_type));
        }
        Ok(Self { url, link_type })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn link_type(&self) -> &str {
        &self.link_type
    }
}
