//! Deferred decoding of request bodies.

use std::fmt;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use nexusrpc_core::{Content, Headers, Payload, Serializer, SerializerError, TypeTag};

/// Raw body chunks as delivered by a transport.
pub type ByteStream = BoxStream<'static, Result<Bytes, io::Error>>;

/// An unconsumed request body plus the serializer that knows how to decode it.
///
/// [`consume`](Self::consume) takes `self`, so a value is decoded at most once.
pub struct LazyValue {
    serializer: Arc<dyn Serializer>,
    headers: Headers,
    stream: Option<ByteStream>,
}

impl LazyValue {
    #[must_use]
    pub fn new(serializer: Arc<dyn Serializer>, headers: Headers, stream: Option<ByteStream>) -> Self {
        Self {
            serializer,
            headers,
            stream,
        }
    }

    /// Wraps a body that is already fully buffered.
    #[must_use]
    pub fn from_bytes(serializer: Arc<dyn Serializer>, headers: Headers, data: impl Into<Bytes>) -> Self {
        let chunk: Result<Bytes, io::Error> = Ok(data.into());
        Self::new(serializer, headers, Some(stream::iter([chunk]).boxed()))
    }

    /// A value with no body; decodes as `null`.
    #[must_use]
    pub fn empty(serializer: Arc<dyn Serializer>) -> Self {
        Self::new(serializer, Headers::new(), None)
    }

    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Reads the whole body and decodes it, as `as_type` when given.
    ///
    /// # Errors
    ///
    /// Returns `SerializerError::Stream` if reading fails, or the serializer's
    /// error if the body cannot be decoded.
    pub async fn consume(self, as_type: Option<&TypeTag>) -> Result<Payload, SerializerError> {
        let data = match self.stream {
            Some(mut stream) => {
                let mut buf = Vec::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Some(buf)
            }
            None => None,
        };
        let content = Content::new(self.headers, data);
        self.serializer.deserialize_as(&content, as_type)
    }
}

impl fmt::Debug for LazyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyValue")
            .field("headers", &self.headers)
            .field("has_body", &self.stream.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use nexusrpc_core::serializer::{CONTENT_TYPE_HEADER, JSON_CONTENT_TYPE};
    use nexusrpc_core::JsonSerializer;

    use super::*;

    fn json() -> Arc<dyn Serializer> {
        Arc::new(JsonSerializer)
    }

    #[tokio::test]
    async fn consumes_chunked_body_as_declared_type() {
        let chunks: Vec<Result<Bytes, io::Error>> = vec![
            Ok(Bytes::from_static(b"[1, ")),
            Ok(Bytes::from_static(b"2, 3]")),
        ];
        let headers: Headers = [(CONTENT_TYPE_HEADER, JSON_CONTENT_TYPE)].into_iter().collect();
        let lazy = LazyValue::new(json(), headers, Some(stream::iter(chunks).boxed()));

        let payload = lazy.consume(Some(&TypeTag::of::<Vec<u32>>())).await.unwrap();
        assert_eq!(payload.downcast::<Vec<u32>>().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn empty_value_decodes_as_unit() {
        let payload = LazyValue::empty(json())
            .consume(Some(&TypeTag::of::<()>()))
            .await
            .unwrap();
        assert!(payload.is::<()>());
    }

    #[tokio::test]
    async fn stream_error_is_reported() {
        let chunks: Vec<Result<Bytes, io::Error>> =
            vec![Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection reset"))];
        let lazy = LazyValue::new(json(), Headers::new(), Some(stream::iter(chunks).boxed()));
        let err = lazy.consume(None).await.unwrap_err();
        assert!(matches!(err, SerializerError::Stream(_)));
    }

    #[tokio::test]
    async fn malformed_body_is_a_decode_error() {
        let lazy = LazyValue::from_bytes(json(), Headers::new(), "{not json");
        let err = lazy.consume(Some(&TypeTag::of::<u32>())).await.unwrap_err();
        assert!(matches!(err, SerializerError::Json(_)));
    }
}
