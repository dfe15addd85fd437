//! Per-request contexts passed to operation handlers.

use std::sync::Arc;
use std::time::SystemTime;

use nexusrpc_core::{Headers, Link};
use parking_lot::Mutex;

use crate::cancellation::{CancellationToken, Uncancellable};

/// Fields shared by every request context.
pub trait OperationContext {
    /// Name of the service addressed by the request.
    fn service(&self) -> &str;
    /// Public name of the operation addressed by the request.
    fn operation(&self) -> &str;
    fn headers(&self) -> &Headers;
    fn cancellation(&self) -> &Arc<dyn CancellationToken>;
}

// ---------------------------------------------------------------------------
// StartOperationContext
// ---------------------------------------------------------------------------

/// Context for a start-operation request.
#[derive(Debug, Clone)]
pub struct StartOperationContext {
    pub service: String,
    pub operation: String,
    pub headers: Headers,
    /// Identifies the request for idempotent retries by the caller.
    pub request_id: String,
    pub cancellation: Arc<dyn CancellationToken>,
    /// Informational; enforcing it is up to the handler.
    pub deadline: Option<SystemTime>,
    /// Where an asynchronous operation should deliver its completion.
    pub callback_url: Option<String>,
    /// Headers to attach when delivering to `callback_url`.
    pub callback_headers: Headers,
    /// Links supplied by the caller.
    pub inbound_links: Vec<Link>,
    outbound_links: Arc<Mutex<Vec<Link>>>,
}

impl StartOperationContext {
    /// Creates a context with a random request id and an [`Uncancellable`] token.
    #[must_use]
    pub fn new(service: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            operation: operation.into(),
            headers: Headers::new(),
            request_id: uuid::Uuid::new_v4().to_string(),
            cancellation: Arc::new(Uncancellable),
            deadline: None,
            callback_url: None,
            callback_headers: Headers::new(),
            inbound_links: Vec::new(),
            outbound_links: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancellation: Arc<dyn CancellationToken>) -> Self {
        self.cancellation = cancellation;
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: SystemTime) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_callback(mut self, url: impl Into<String>, headers: Headers) -> Self {
        self.callback_url = Some(url.into());
        self.callback_headers = headers;
        self
    }

    #[must_use]
    pub fn with_inbound_links(mut self, links: Vec<Link>) -> Self {
        self.inbound_links = links;
        self
    }

    /// Records a link for the caller. Visible through every clone of this context.
    pub fn add_outbound_link(&self, link: Link) {
        self.outbound_links.lock().push(link);
    }

    /// Links recorded by the handler, in insertion order.
    #[must_use]
    pub fn outbound_links(&self) -> Vec<Link> {
        self.outbound_links.lock().clone()
    }
}

impl OperationContext for StartOperationContext {
    fn service(&self) -> &str {
        &self.service
    }

    fn operation(&self) -> &str {
        &self.operation
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn cancellation(&self) -> &Arc<dyn CancellationToken> {
        &self.cancellation
    }
}

// ---------------------------------------------------------------------------
// Token-addressed contexts
// ---------------------------------------------------------------------------

macro_rules! token_context {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $name {
            pub service: String,
            pub operation: String,
            pub headers: Headers,
            /// Scoped to this request only; not linked to the start request's token.
            pub cancellation: Arc<dyn CancellationToken>,
        }

        impl $name {
            #[must_use]
            pub fn new(service: impl Into<String>, operation: impl Into<String>) -> Self {
                Self {
                    service: service.into(),
                    operation: operation.into(),
                    headers: Headers::new(),
                    cancellation: Arc::new(Uncancellable),
                }
            }

            #[must_use]
            pub fn with_headers(mut self, headers: Headers) -> Self {
                self.headers = headers;
                self
            }

            #[must_use]
            pub fn with_cancellation(mut self, cancellation: Arc<dyn CancellationToken>) -> Self {
                self.cancellation = cancellation;
                self
            }
        }

        impl OperationContext for $name {
            fn service(&self) -> &str {
                &self.service
            }

            fn operation(&self) -> &str {
                &self.operation
            }

            fn headers(&self) -> &Headers {
                &self.headers
            }

            fn cancellation(&self) -> &Arc<dyn CancellationToken> {
                &self.cancellation
            }
        }
    };
}

token_context!(
    /// Context for a cancel-operation request.
    CancelOperationContext
);
token_context!(
    /// Context for a fetch-operation-info request.
    FetchOperationInfoContext
);
token_context!(
    /// Context for a fetch-operation-result request.
    FetchOperationResultContext
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_context_defaults() {
        let ctx = StartOperationContext::new("svc", "op");
        assert_eq!(ctx.service(), "svc");
        assert_eq!(ctx.operation(), "op");
        assert!(uuid::Uuid::parse_str(&ctx.request_id).is_ok());
        assert!(!ctx.cancellation().is_cancelled());
        assert!(ctx.deadline.is_none());
        assert!(ctx.callback_url.is_none());
    }

    #[test]
    fn request_ids_are_unique() {
        let a = StartOperationContext::new("svc", "op");
        let b = StartOperationContext::new("svc", "op");
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn outbound_links_shared_between_clones() {
        let ctx = StartOperationContext::new("svc", "op");
        let handler_view = ctx.clone();
        handler_view.add_outbound_link(Link::new("nexus://run/1", "example.Run").unwrap());
        assert_eq!(ctx.outbound_links().len(), 1);
        assert_eq!(ctx.outbound_links()[0].url(), "nexus://run/1");
    }

    #[test]
    fn token_contexts_expose_common_fields() {
        let mut headers = Headers::new();
        headers.insert("X-Trace", "abc");
        let ctx = FetchOperationInfoContext::new("svc", "op").with_headers(headers);
        assert_eq!(ctx.headers().get("x-trace"), Some("abc"));
        assert_eq!(ctx.service(), "svc");
    }
}
