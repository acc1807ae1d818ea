use std::fmt;

use bytes::{Bytes, BytesMut};
use futures_util::stream::{BoxStream, Stream, StreamExt};
use serde::Serialize;

use crate::error::AppError;

/// Raw request body: either a buffer held in memory or a stream of chunks pulled from a live
/// connection.
pub enum Body {
    Once(Bytes),
    Stream(BoxStream<'static, Result<Bytes, anyhow::Error>>),
}

impl Body {
    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    pub fn from_bytes<B>(bytes: B) -> Self
    where
        B: Into<Bytes>,
    {
        Self::Once(bytes.into())
    }

    pub fn from_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        anyhow::Error: From<E>,
    {
        Self::Stream(stream.map(|res| res.map_err(anyhow::Error::from)).boxed())
    }

    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Bytes> + Send + 'static,
    {
        Self::Stream(stream.map(Ok::<Bytes, anyhow::Error>).boxed())
    }

    pub fn text<S>(text: S) -> Self
    where
        S: Into<String>,
    {
        Self::from_bytes(text.into().into_bytes())
    }

    /// Serialize `value` as compact JSON.
    pub fn json<T>(value: &T) -> Result<Self, serde_json::Error>
    where
        T: Serialize,
    {
        serde_json::to_vec(value).map(Self::from_bytes)
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Body::Stream(_))
    }

    /// Drain the body into one buffer, failing once more than `limit` bytes have arrived.
    pub async fn collect(self, limit: Option<usize>) -> Result<Bytes, AppError> {
        match self {
            Body::Once(bytes) => {
                check_limit(bytes.len(), limit)?;
                Ok(bytes)
            }
            Body::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(AppError::internal)?;
                    check_limit(buf.len() + chunk.len(), limit)?;
                    buf.extend_from_slice(&chunk);
                }
                Ok(buf.freeze())
            }
        }
    }
}

fn check_limit(len: usize, limit: Option<usize>) -> Result<(), AppError> {
    match limit {
        Some(limit) if len > limit => Err(AppError::payload_too_large(limit)),
        _ => Ok(()),
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Once(bytes) => f
                .debug_struct("Body::Once")
                .field("len", &bytes.len())
                .finish(),
            Body::Stream(_) => f.debug_tuple("Body::Stream").finish(),
        }
    }
}

impl From<Bytes> for Body {
    fn from(value: Bytes) -> Self {
        Body::Once(value)
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Body::from_bytes(value)
    }
}

impl From<&[u8]> for Body {
    fn from(value: &[u8]) -> Self {
        Body::from_bytes(Bytes::copy_from_slice(value))
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Body::text(value)
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Body::text(value)
    }
}

impl From<serde_json::Value> for Body {
    /// `null` becomes an empty body, strings are used verbatim, anything else is JSON-encoded.
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Body::empty(),
            serde_json::Value::String(text) => Body::text(text),
            other => Body::from_bytes(other.to_string().into_bytes()),
        }
    }
}

impl From<Option<Body>> for Body {
    fn from(value: Option<Body>) -> Self {
        value.unwrap_or_default()
    }
}
