use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::SinkExt;
use futures_util::future::{self, BoxFuture};
use futures_util::stream::{BoxStream, Stream, StreamExt};
use serde::Serialize;

use crate::body::Body;
use crate::context::Context;
use crate::error::AppError;
use crate::headers::Headers;
use crate::http::{AppResult, Method, StatusCode};
use crate::middleware::{invoke_middlewares, BoxMiddleware, Middleware};
use crate::negotiate;
use crate::request::Request;

type ChunkStream = BoxStream<'static, Result<Bytes, anyhow::Error>>;
type WriterFn = Box<dyn FnOnce(BodySink) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Sends a 1xx informational response ahead of the final one.
#[async_trait]
pub trait InformationalSink: Send + Sync {
    async fn send_informational(&self, status: StatusCode, headers: Headers) -> AppResult;
}

/// Delivers a fully processed push-promise context to the client.
#[async_trait]
pub trait PushSink: Send + Sync {
    async fn push(&self, ctx: Context) -> AppResult;
}

/// Whether the response was created in-process or will be written to a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseKind {
    Memory,
    Transport,
}

/// Writable end handed to a [`ResponseBody::Writer`] callback.
pub struct BodySink {
    tx: mpsc::Sender<Bytes>,
}

impl BodySink {
    pub async fn write<B>(&mut self, chunk: B) -> Result<(), AppError>
    where
        B: Into<Bytes>,
    {
        self.tx
            .send(chunk.into())
            .await
            .map_err(|_| AppError::internal(anyhow::anyhow!("response body reader went away")))
    }
}

/// Response payload as set by middleware. Serialization happens once the chain has finished.
pub enum ResponseBody {
    Empty,
    Text(String),
    Bytes(Bytes),
    Stream(ChunkStream),
    Json(serde_json::Value),
    Writer(WriterFn),
}

/// A body ready to be written out.
pub enum Payload {
    Full(Bytes),
    Stream(ChunkStream),
    /// Chunks produced by `driver`, which must be polled alongside `stream`.
    Writer {
        stream: ChunkStream,
        driver: BoxFuture<'static, anyhow::Result<()>>,
    },
}

impl ResponseBody {
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Bytes> + Send + 'static,
    {
        ResponseBody::Stream(stream.map(Ok::<Bytes, anyhow::Error>).boxed())
    }

    /// A body produced by a callback that writes into a sink.
    pub fn writer<F, Fut>(write: F) -> Self
    where
        F: FnOnce(BodySink) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        ResponseBody::Writer(Box::new(
            move |sink| -> BoxFuture<'static, anyhow::Result<()>> { Box::pin(write(sink)) },
        ))
    }

    /// True for bodies that serialize to nothing: `Empty` and JSON `null`.
    pub fn is_empty(&self) -> bool {
        matches!(
            self,
            ResponseBody::Empty | ResponseBody::Json(serde_json::Value::Null)
        )
    }

    /// Serialize the body for the wire.
    ///
    /// JSON objects and arrays are indented with two spaces, JSON strings are written verbatim
    /// and `null` produces nothing. Bare numbers and booleans are rejected.
    pub fn into_payload(self) -> Result<Payload, AppError> {
        let payload = match self {
            ResponseBody::Empty => Payload::Full(Bytes::new()),
            ResponseBody::Text(text) => Payload::Full(Bytes::from(text)),
            ResponseBody::Bytes(bytes) => Payload::Full(bytes),
            ResponseBody::Stream(stream) => Payload::Stream(stream),
            ResponseBody::Json(value) => match value {
                serde_json::Value::Null => Payload::Full(Bytes::new()),
                serde_json::Value::String(text) => Payload::Full(Bytes::from(text)),
                serde_json::Value::Number(_) => return Err(AppError::unsupported_body("number")),
                serde_json::Value::Bool(_) => return Err(AppError::unsupported_body("boolean")),
                value => Payload::Full(Bytes::from(serde_json::to_vec_pretty(&value)?)),
            },
            ResponseBody::Writer(write) => {
                let (tx, rx) = mpsc::channel(16);
                let driver = write(BodySink { tx });
                Payload::Writer {
                    stream: rx.map(Ok::<Bytes, anyhow::Error>).boxed(),
                    driver,
                }
            }
        };
        Ok(payload)
    }

    /// Serialize and buffer the whole body.
    pub async fn collect(self) -> Result<Bytes, AppError> {
        match self.into_payload()? {
            Payload::Full(bytes) => Ok(bytes),
            Payload::Stream(stream) => Body::Stream(stream).collect(None).await,
            Payload::Writer { stream, driver } => {
                let (written, collected) =
                    future::join(driver, Body::Stream(stream).collect(None)).await;
                written.map_err(AppError::internal)?;
                collected
            }
        }
    }
}

impl Default for ResponseBody {
    fn default() -> Self {
        ResponseBody::Empty
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Empty => f.write_str("Empty"),
            ResponseBody::Text(text) => f.debug_tuple("Text").field(text).finish(),
            ResponseBody::Bytes(bytes) => {
                f.debug_struct("Bytes").field("len", &bytes.len()).finish()
            }
            ResponseBody::Stream(_) => f.write_str("Stream"),
            ResponseBody::Json(value) => f.debug_tuple("Json").field(value).finish(),
            ResponseBody::Writer(_) => f.write_str("Writer"),
        }
    }
}

impl From<&str> for ResponseBody {
    fn from(value: &str) -> Self {
        ResponseBody::Text(value.to_string())
    }
}

impl From<String> for ResponseBody {
    fn from(value: String) -> Self {
        ResponseBody::Text(value)
    }
}

impl From<Bytes> for ResponseBody {
    fn from(value: Bytes) -> Self {
        ResponseBody::Bytes(value)
    }
}

impl From<Vec<u8>> for ResponseBody {
    fn from(value: Vec<u8>) -> Self {
        ResponseBody::Bytes(Bytes::from(value))
    }
}

impl From<serde_json::Value> for ResponseBody {
    fn from(value: serde_json::Value) -> Self {
        ResponseBody::Json(value)
    }
}

impl From<Body> for ResponseBody {
    fn from(value: Body) -> Self {
        match value {
            Body::Once(bytes) if bytes.is_empty() => ResponseBody::Empty,
            Body::Once(bytes) => ResponseBody::Bytes(bytes),
            Body::Stream(stream) => ResponseBody::Stream(stream),
        }
    }
}

impl<T> From<Option<T>> for ResponseBody
where
    T: Into<ResponseBody>,
{
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}

/// An outbound HTTP response under construction.
pub struct Response {
    status: StatusCode,
    explicit_status: bool,
    headers: Headers,
    body: ResponseBody,
    origin: String,
    kind: ResponseKind,
    informational: Option<Arc<dyn InformationalSink>>,
    pusher: Option<Arc<dyn PushSink>>,
}

impl Response {
    /// An in-process response. Starts at 200.
    pub fn memory() -> Self {
        Self::build(ResponseKind::Memory, StatusCode::OK)
    }

    /// A response bound for a connection. Starts at 404 until a status or body is set.
    pub fn transport() -> Self {
        Self::build(ResponseKind::Transport, StatusCode::NOT_FOUND)
    }

    fn build(kind: ResponseKind, status: StatusCode) -> Self {
        Self {
            status,
            explicit_status: false,
            headers: Headers::new(),
            body: ResponseBody::Empty,
            origin: String::new(),
            kind,
            informational: None,
            pusher: None,
        }
    }

    #[must_use]
    pub fn with_origin<S>(mut self, origin: S) -> Self
    where
        S: Into<String>,
    {
        self.origin = origin.into();
        self
    }

    #[must_use]
    pub fn with_informational_sink(mut self, sink: Arc<dyn InformationalSink>) -> Self {
        self.informational = Some(sink);
        self
    }

    #[must_use]
    pub fn with_push_sink(mut self, sink: Arc<dyn PushSink>) -> Self {
        self.pusher = Some(sink);
        self
    }

    pub fn kind(&self) -> ResponseKind {
        self.kind
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
        self.explicit_status = true;
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut ResponseBody {
        &mut self.body
    }

    /// Replace the body. A non-empty body promotes a transport response to 200 unless a status
    /// was set explicitly.
    pub fn set_body<B>(&mut self, body: B)
    where
        B: Into<ResponseBody>,
    {
        self.body = body.into();
        if !self.explicit_status && !self.body.is_empty() {
            self.status = StatusCode::OK;
        }
    }

    pub fn set_json<T>(&mut self, value: &T) -> Result<(), AppError>
    where
        T: Serialize,
    {
        self.set_body(serde_json::to_value(value)?);
        Ok(())
    }

    pub fn take_body(&mut self) -> ResponseBody {
        std::mem::take(&mut self.body)
    }

    /// Content-Type without parameters, or an empty string.
    pub fn content_type(&self) -> String {
        negotiate::media_type(&self.headers)
    }

    pub fn set_content_type(&mut self, value: &str) {
        self.headers.set("Content-Type", value);
    }

    pub fn is(&self, media_type: &str) -> bool {
        negotiate::is(&self.content_type(), media_type)
    }

    /// Redirect with `303 See Other`.
    pub fn redirect(&mut self, address: &str) {
        self.redirect_with_status(StatusCode::SEE_OTHER, address);
    }

    pub fn redirect_with_status(&mut self, status: StatusCode, address: &str) {
        self.set_status(status);
        self.headers.set("Location", address);
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn set_origin<S>(&mut self, origin: S)
    where
        S: Into<String>,
    {
        self.origin = origin.into();
    }

    /// Send a 1xx response. Does nothing when the transport cannot deliver informational
    /// responses.
    pub fn send_informational(
        &self,
        status: StatusCode,
        headers: Headers,
    ) -> BoxFuture<'static, AppResult> {
        let sink = self.informational.clone();
        Box::pin(async move {
            if !status.is_informational() {
                return Err(AppError::internal(anyhow::anyhow!(
                    "informational responses must have a 1xx status, got {}",
                    status.as_u16()
                )));
            }
            match sink {
                Some(sink) => sink.send_informational(status, headers).await,
                None => {
                    tracing::debug!("transport has no informational sink; dropping {}", status);
                    Ok(())
                }
            }
        })
    }

    pub fn supports_push(&self) -> bool {
        self.pusher.is_some()
    }

    /// Run `middleware` against a fresh in-memory context and push the result. The middleware
    /// must set the request target of the pushed resource.
    ///
    /// Does nothing when the transport does not support push.
    pub fn push<M>(&self, middleware: M) -> BoxFuture<'static, AppResult>
    where
        M: Middleware,
    {
        let pusher = self.pusher.clone();
        let origin = self.origin.clone();
        Box::pin(async move {
            let Some(pusher) = pusher else {
                tracing::debug!("transport does not support push");
                return Ok(());
            };

            let request = Request::memory(Method::GET, "", Headers::new(), Body::empty())
                .with_origin(origin.as_str());
            let response = Response::memory().with_origin(origin);
            let mut ctx = Context::new(request, response);

            let chain: [BoxMiddleware; 1] = [Arc::new(middleware)];
            invoke_middlewares(&mut ctx, &chain).await?;

            if ctx.request().request_target().is_empty() {
                return Err(AppError::internal(anyhow::anyhow!(
                    "the path must be set in the push context's request"
                )));
            }
            pusher.push(ctx).await
        })
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("kind", &self.kind)
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}
