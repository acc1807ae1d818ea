use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::body::Body;
use crate::error::AppError;
use crate::headers::Headers;
use crate::http::{Method, Uri};
use crate::negotiate::{self, Preference};

/// Where a request came from. Decides how the raw body behaves when drained twice and whether
/// a client address is known.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    /// Built in-process: sub-requests, push promises and tests.
    Memory,
    /// Read from a live connection by a transport adapter.
    Transport,
}

/// An inbound HTTP request.
pub struct Request {
    method: Method,
    request_target: String,
    uri: Option<Uri>,
    headers: Headers,
    raw: Body,
    parsed: Option<Box<dyn Any + Send + Sync>>,
    origin: String,
    kind: RequestKind,
    peer_addr: Option<SocketAddr>,
    body_limit: Option<usize>,
}

impl Request {
    /// An in-memory request. Reading its raw body is repeatable.
    pub fn memory<T, B>(method: Method, request_target: T, headers: Headers, body: B) -> Self
    where
        T: Into<String>,
        B: Into<Body>,
    {
        Self::build(
            RequestKind::Memory,
            method,
            request_target.into(),
            headers,
            body.into(),
            None,
        )
    }

    /// A request backed by a transport connection. The raw body can be drained once.
    pub fn transport<T>(
        method: Method,
        request_target: T,
        headers: Headers,
        body: Body,
        peer_addr: Option<SocketAddr>,
    ) -> Self
    where
        T: Into<String>,
    {
        Self::build(
            RequestKind::Transport,
            method,
            request_target.into(),
            headers,
            body,
            peer_addr,
        )
    }

    fn build(
        kind: RequestKind,
        method: Method,
        request_target: String,
        headers: Headers,
        raw: Body,
        peer_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            method,
            uri: request_target.parse().ok(),
            request_target,
            headers,
            raw,
            parsed: None,
            origin: String::new(),
            kind,
            peer_addr,
            body_limit: None,
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
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = Some(limit);
        self
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    /// The literal target from the request line: origin-form (`/foo?a=1`), absolute-form
    /// (`https://example.org/foo`), authority-form (`example.org:443`) or asterisk-form (`*`).
    pub fn request_target(&self) -> &str {
        &self.request_target
    }

    pub fn set_request_target<S>(&mut self, target: S)
    where
        S: Into<String>,
    {
        self.request_target = target.into();
        self.uri = self.request_target.parse().ok();
    }

    /// The path portion of the request target. Empty for authority-form targets.
    pub fn path(&self) -> &str {
        match &self.uri {
            Some(uri) => uri.path(),
            None => fallback_path(&self.request_target),
        }
    }

    fn raw_query(&self) -> Option<&str> {
        match &self.uri {
            Some(uri) => uri.query(),
            None => fallback_query(&self.request_target),
        }
    }

    /// Replaces the whole request target.
    pub fn set_path<S>(&mut self, path: S)
    where
        S: Into<String>,
    {
        self.set_request_target(path);
    }

    /// Query parameters. When a key repeats the last value wins.
    pub fn query(&self) -> HashMap<String, String> {
        let Some(query) = self.raw_query() else {
            return HashMap::new();
        };
        serde_urlencoded::from_str::<Vec<(String, String)>>(query)
            .map(|pairs| pairs.into_iter().collect())
            .unwrap_or_default()
    }

    /// Deserialize the query string into `T`.
    pub fn query_as<T>(&self) -> Result<T, AppError>
    where
        T: DeserializeOwned,
    {
        let query = self.raw_query().unwrap_or("");
        serde_urlencoded::from_str(query)
            .map_err(|err| AppError::bad_request(format!("invalid query string: {}", err)))
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// The application's public base URL.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn set_origin<S>(&mut self, origin: S)
    where
        S: Into<String>,
    {
        self.origin = origin.into();
    }

    pub fn body_limit(&self) -> Option<usize> {
        self.body_limit
    }

    pub fn set_body_limit(&mut self, limit: Option<usize>) {
        self.body_limit = limit;
    }

    /// Read the raw body. `limit` overrides the request's configured ceiling.
    ///
    /// Memory requests return the same bytes on every call. Transport requests drain the
    /// connection once; later calls return an empty buffer.
    pub async fn raw_body(&mut self, limit: Option<usize>) -> Result<Bytes, AppError> {
        let limit = limit.or(self.body_limit);
        if let (Some(limit), Some(length)) = (limit, self.content_length()) {
            if length > limit {
                return Err(AppError::payload_too_large(limit));
            }
        }

        let raw = match (&self.raw, self.kind) {
            (Body::Once(bytes), RequestKind::Memory) => Body::Once(bytes.clone()),
            _ => std::mem::take(&mut self.raw),
        };
        let bytes = raw.collect(limit).await?;
        if self.kind == RequestKind::Memory {
            self.raw = Body::Once(bytes.clone());
        }
        Ok(bytes)
    }

    /// Hand out the raw body without buffering it.
    ///
    /// A buffered memory body stays readable afterwards. Any other body is drained: later reads
    /// see an empty body.
    pub fn take_body_stream(&mut self) -> Body {
        match (&self.raw, self.kind) {
            (Body::Once(bytes), RequestKind::Memory) => Body::Once(bytes.clone()),
            _ => std::mem::take(&mut self.raw),
        }
    }

    /// Read the raw body as UTF-8 text.
    pub async fn raw_text(&mut self, limit: Option<usize>) -> Result<String, AppError> {
        let bytes = self.raw_body(limit).await?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| AppError::bad_request("request body is not valid UTF-8"))
    }

    pub async fn json<T>(&mut self) -> Result<T, AppError>
    where
        T: DeserializeOwned,
    {
        let bytes = self.raw_body(None).await?;
        serde_json::from_slice(&bytes)
            .map_err(|err| AppError::bad_request(format!("invalid JSON payload: {}", err)))
    }

    pub async fn form<T>(&mut self) -> Result<T, AppError>
    where
        T: DeserializeOwned,
    {
        let bytes = self.raw_body(None).await?;
        serde_urlencoded::from_bytes(&bytes)
            .map_err(|err| AppError::bad_request(format!("invalid form payload: {}", err)))
    }

    /// The body as parsed by an earlier middleware, if it stored a `T`.
    pub fn body<T>(&self) -> Option<&T>
    where
        T: Any,
    {
        self.parsed.as_ref()?.downcast_ref::<T>()
    }

    pub fn set_body<T>(&mut self, body: T)
    where
        T: Any + Send + Sync,
    {
        self.parsed = Some(Box::new(body));
    }

    pub fn take_body<T>(&mut self) -> Option<T>
    where
        T: Any,
    {
        let parsed = self.parsed.take()?;
        match parsed.downcast::<T>() {
            Ok(body) => Some(*body),
            Err(other) => {
                self.parsed = Some(other);
                None
            }
        }
    }

    pub fn has_body(&self) -> bool {
        self.parsed.is_some()
    }

    /// Content-Type without parameters, or an empty string.
    pub fn content_type(&self) -> String {
        negotiate::media_type(&self.headers)
    }

    pub fn is(&self, media_type: &str) -> bool {
        negotiate::is(&self.content_type(), media_type)
    }

    pub fn accepts<'a>(&self, candidates: &[&'a str]) -> Option<&'a str> {
        let accept = self.headers.get("accept");
        negotiate::accepts(accept.as_deref(), candidates)
    }

    pub fn prefer(&self, preference: &str) -> Option<Preference> {
        let header = self.headers.get("prefer");
        negotiate::prefer(header.as_deref(), preference)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// The client's IP address. `None` when the request did not arrive over a connection.
    ///
    /// With `trust_proxy` the first X-Forwarded-For entry is preferred.
    pub fn ip(&self, trust_proxy: bool) -> Option<String> {
        let peer = self.peer_addr?;
        if trust_proxy {
            if let Some(forwarded) = self.headers.get("x-forwarded-for") {
                if let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty()) {
                    return Some(first.to_string());
                }
            }
        }
        Some(peer.ip().to_string())
    }

    fn content_length(&self) -> Option<usize> {
        self.headers
            .get("content-length")
            .and_then(|value| value.trim().parse().ok())
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("kind", &self.kind)
            .field("method", &self.method)
            .field("request_target", &self.request_target)
            .field("headers", &self.headers)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

// Targets `http::Uri` rejects, such as the empty target or paths with raw spaces.
fn fallback_path(target: &str) -> &str {
    if !target.starts_with('/') {
        return "";
    }
    let end = target.find(['?', '#']).unwrap_or(target.len());
    &target[..end]
}

fn fallback_query(target: &str) -> Option<&str> {
    let target = target.split('#').next().unwrap_or("");
    target.split_once('?').map(|(_, query)| query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::executor::block_on;
    use serde::Deserialize;

    fn sample() -> Request {
        let headers: Headers = [
            ("X-FOO", "BAR"),
            ("Accept", "text/html"),
            ("Content-Type", "text/html"),
        ]
        .into_iter()
        .collect();
        Request::memory(Method::POST, "/foo?a=1&b=2", headers, "hello world")
    }

    fn transport(body: &'static [&'static [u8]], headers: Headers) -> Request {
        let chunks = body.iter().map(|chunk| Bytes::from_static(chunk)).collect::<Vec<_>>();
        Request::transport(
            Method::POST,
            "/upload",
            headers,
            Body::stream(futures_util::stream::iter(chunks)),
            Some("10.0.0.1:5000".parse().unwrap()),
        )
    }

    #[test]
    fn constructs_memory_request() {
        let req = sample();
        assert_eq!(req.method(), &Method::POST);
        assert_eq!(req.path(), "/foo");
        assert_eq!(req.headers().get("x-foo").as_deref(), Some("BAR"));
        assert_eq!(req.kind(), RequestKind::Memory);
    }

    #[test]
    fn memory_body_is_memoized() {
        let mut req = sample();
        assert_eq!(block_on(req.raw_text(None)).unwrap(), "hello world");
        assert_eq!(block_on(req.raw_text(None)).unwrap(), "hello world");
    }

    #[test]
    fn memory_body_survives_a_rejected_read() {
        let mut req = sample();
        let err = block_on(req.raw_body(Some(3))).unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge { limit: 3 }));
        assert_eq!(block_on(req.raw_text(None)).unwrap(), "hello world");
    }

    #[test]
    fn body_stream_of_memory_request_is_repeatable() {
        let mut req = sample();
        let first = block_on(req.take_body_stream().collect(None)).unwrap();
        assert_eq!(first.as_ref(), b"hello world");
        assert_eq!(block_on(req.raw_text(None)).unwrap(), "hello world");
    }

    #[test]
    fn body_stream_of_transport_request_drains_once() {
        use futures_util::StreamExt;

        let mut req = transport(&[b"hel", b"lo"], Headers::new());
        let Body::Stream(stream) = req.take_body_stream() else {
            panic!("expected a streamed body");
        };
        let chunks: Vec<Bytes> = block_on(stream.map(|chunk| chunk.unwrap()).collect());
        assert_eq!(chunks, vec![Bytes::from_static(b"hel"), Bytes::from_static(b"lo")]);
        assert!(block_on(req.raw_body(None)).unwrap().is_empty());
    }

    #[test]
    fn transport_body_drains_once() {
        let mut req = transport(&[b"hel", b"lo"], Headers::new());
        assert_eq!(block_on(req.raw_body(None)).unwrap().as_ref(), b"hello");
        assert!(block_on(req.raw_body(None)).unwrap().is_empty());
    }

    #[test]
    fn raw_body_enforces_limit() {
        let mut req = transport(&[b"hel", b"lo"], Headers::new());
        let err = block_on(req.raw_text(Some(3))).unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge { limit: 3 }));
        assert_eq!(err.message(), "request entity too large (limit 3 bytes)");
    }

    #[test]
    fn raw_body_rejects_oversized_content_length_up_front() {
        let headers: Headers = [("Content-Length", "5")].into_iter().collect();
        let mut req = transport(&[b"hello"], headers).with_body_limit(2);
        let err = block_on(req.raw_body(None)).unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge { limit: 2 }));
    }

    #[test]
    fn query_uses_last_value() {
        let req = Request::memory(Method::GET, "/?a=1&b=2&a=3&flag", Headers::new(), "");
        let query = req.query();
        assert_eq!(query.get("a").map(String::as_str), Some("3"));
        assert_eq!(query.get("b").map(String::as_str), Some("2"));
        assert_eq!(query.get("flag").map(String::as_str), Some(""));
    }

    #[test]
    fn query_as_deserializes() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Page {
            a: u8,
        }
        let req = sample();
        assert_eq!(req.query_as::<Page>().unwrap(), Page { a: 1 });

        let req = Request::memory(Method::GET, "/?a=x", Headers::new(), "");
        let err = req.query_as::<Page>().unwrap_err();
        assert!(err.message().contains("invalid query string"));
    }

    #[test]
    fn path_handles_every_target_form() {
        let path = |target: &str| {
            Request::memory(Method::GET, target, Headers::new(), "")
                .path()
                .to_string()
        };
        assert_eq!(path("/hello/world?x=1#frag"), "/hello/world");
        assert_eq!(path("https://example.org/foo?bar"), "/foo");
        assert_eq!(path("https://example.org"), "/");
        assert_eq!(path("*"), "*");
        assert_eq!(path("example.org:443"), "");
        assert_eq!(path(""), "");
        assert_eq!(path("/with space?q=1"), "/with space");
    }

    #[test]
    fn query_reads_absolute_and_unparseable_targets() {
        let query = |target: &str| Request::memory(Method::GET, target, Headers::new(), "").query();
        assert_eq!(
            query("https://example.org/foo?a=1#frag").get("a").map(String::as_str),
            Some("1")
        );
        assert_eq!(
            query("/with space?b=2#frag").get("b").map(String::as_str),
            Some("2")
        );
        assert!(query("*").is_empty());
    }

    #[test]
    fn set_path_replaces_target() {
        let mut req = sample();
        req.set_path("/bar?z=1");
        assert_eq!(req.path(), "/bar");
        assert_eq!(req.request_target(), "/bar?z=1");
    }

    #[test]
    fn content_type_and_is() {
        let mut req = sample();
        assert_eq!(req.content_type(), "text/html");
        assert!(req.is("html"));
        req.headers_mut().delete("Content-Type");
        assert_eq!(req.content_type(), "");
        assert!(!req.is("html"));
    }

    #[test]
    fn accepts_uses_accept_header() {
        let mut req = sample();
        assert_eq!(
            req.accepts(&["application/json", "text/html"]),
            Some("text/html")
        );
        assert_eq!(req.accepts(&["application/json"]), None);
        req.headers_mut().delete("accept");
        assert_eq!(req.accepts(&["application/json"]), Some("application/json"));
    }

    #[test]
    fn prefer_reads_prefer_header() {
        let headers: Headers = [("Prefer", "handling=lenient, respond-async")]
            .into_iter()
            .collect();
        let req = Request::memory(Method::GET, "/foo", headers, "");
        assert_eq!(
            req.prefer("handling"),
            Some(Preference::Value("lenient".into()))
        );
        assert_eq!(req.prefer("respond-async"), Some(Preference::Flag));
        assert_eq!(req.prefer("return"), None);
    }

    #[test]
    fn ip_is_only_known_for_transport_requests() {
        let headers: Headers = [("X-Forwarded-For", "1.2.3.4, 5.6.7.8")].into_iter().collect();
        let memory = Request::memory(Method::GET, "/", headers.clone(), "");
        assert_eq!(memory.ip(true), None);

        let req = transport(&[], headers);
        assert_eq!(req.ip(false).as_deref(), Some("10.0.0.1"));
        assert_eq!(req.ip(true).as_deref(), Some("1.2.3.4"));

        let req = transport(&[], Headers::new());
        assert_eq!(req.ip(true).as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn parsed_body_slot_is_typed() {
        #[derive(Debug, PartialEq)]
        struct Login {
            user: String,
        }
        let mut req = sample();
        assert!(!req.has_body());
        req.set_body(Login {
            user: "evert".into(),
        });
        assert_eq!(req.body::<String>(), None);
        assert_eq!(req.body::<Login>().map(|l| l.user.as_str()), Some("evert"));
        assert_eq!(req.take_body::<String>(), None);
        assert!(req.has_body());
        assert!(req.take_body::<Login>().is_some());
        assert!(!req.has_body());
    }

    #[test]
    fn json_and_form_helpers() {
        #[derive(Deserialize, PartialEq, Debug)]
        struct Payload {
            name: String,
        }
        let mut req = Request::memory(Method::POST, "/", Headers::new(), r#"{"name":"demo"}"#);
        let parsed: Payload = block_on(req.json()).unwrap();
        assert_eq!(parsed.name, "demo");

        let mut req = Request::memory(Method::POST, "/", Headers::new(), "name=demo");
        let parsed: Payload = block_on(req.form()).unwrap();
        assert_eq!(parsed.name, "demo");

        let mut req = Request::memory(Method::POST, "/", Headers::new(), "not json");
        let err = block_on(req.json::<Payload>()).unwrap_err();
        assert!(err.message().contains("invalid JSON payload"));
    }
}
