use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use serde::Deserialize;
use tower_service::Service;
use validator::Validate;

use crate::body::Body;
use crate::context::Context;
use crate::error::AppError;
use crate::headers::Headers;
use crate::http::{AppResult, BoxFuture, Method, StatusCode, Uri};
use crate::middleware::{BoxMiddleware, Middleware, Next, NotFound};
use crate::request::Request;
use crate::response::Response;

/// Value of the `Server` header stamped on every response.
pub const SERVER_NAME: &str = concat!("volley/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_CONTENT_TYPE: &str = "application/hal+json";
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

pub type ErrorObserver = Arc<dyn Fn(&AppError) + Send + Sync>;

/// Application settings, usually read from the `[app]` table of the server config.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(default)]
pub struct AppConfig {
    /// Explicit public base URL. Wins over everything else.
    #[validate(length(min = 1))]
    pub origin: Option<String>,
    /// Deployment override, normally filled from `VOLLEY_ORIGIN`.
    #[validate(length(min = 1))]
    pub app_origin: Option<String>,
    /// Public URI of the deployment; only scheme, host and port are kept.
    #[validate(length(min = 1))]
    pub public_uri: Option<String>,
    pub port: Option<u16>,
    #[validate(length(min = 1))]
    pub default_content_type: String,
    #[validate(range(min = 1))]
    pub body_limit: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            origin: None,
            app_origin: None,
            public_uri: None,
            port: None,
            default_content_type: DEFAULT_CONTENT_TYPE.to_string(),
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

/// Owns the middleware chain and runs requests through it.
pub struct Application {
    middlewares: Vec<BoxMiddleware>,
    observers: Vec<ErrorObserver>,
    config: AppConfig,
}

impl Default for Application {
    fn default() -> Self {
        Self::new()
    }
}

impl Application {
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    pub fn with_config(config: AppConfig) -> Self {
        Self {
            middlewares: Vec::new(),
            observers: Vec::new(),
            config,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut AppConfig {
        &mut self.config
    }

    /// Append a middleware. Middlewares run in the order they were added.
    pub fn use_middleware<M>(&mut self, middleware: M) -> &mut Self
    where
        M: Middleware,
    {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    pub fn use_arc(&mut self, middleware: BoxMiddleware) -> &mut Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn extend<I>(&mut self, middlewares: I) -> &mut Self
    where
        I: IntoIterator<Item = BoxMiddleware>,
    {
        self.middlewares.extend(middlewares);
        self
    }

    pub fn middlewares(&self) -> &[BoxMiddleware] {
        &self.middlewares
    }

    /// Register a callback for errors that escape the middleware chain.
    pub fn on_error<F>(&mut self, observer: F) -> &mut Self
    where
        F: Fn(&AppError) + Send + Sync + 'static,
    {
        self.observers.push(Arc::new(observer));
        self
    }

    pub fn emit_error(&self, err: &AppError) {
        for observer in &self.observers {
            observer(err);
        }
    }

    /// The public base URL of the application.
    pub fn origin(&self) -> String {
        if let Some(origin) = &self.config.origin {
            return origin.clone();
        }
        if let Some(origin) = &self.config.app_origin {
            return origin.clone();
        }
        if let Some(origin) = self.config.public_uri.as_deref().and_then(origin_of) {
            return origin;
        }
        match self.config.port {
            Some(port) if port != 80 => format!("http://localhost:{port}"),
            _ => "http://localhost".to_string(),
        }
    }

    pub fn set_origin<S>(&mut self, origin: S)
    where
        S: Into<String>,
    {
        self.config.origin = Some(origin.into());
    }

    /// Run the chain, followed by the not-found fallback, against `ctx`.
    pub async fn handle(&self, ctx: &mut Context) -> AppResult {
        let response = ctx.response_mut();
        response.headers_mut().set("Server", SERVER_NAME);
        response.set_content_type(&self.config.default_content_type);

        let request = ctx.request_mut();
        if request.body_limit().is_none() {
            request.set_body_limit(Some(self.config.body_limit));
        }
        if request.origin().is_empty() {
            request.set_origin(self.origin());
        }

        static NOT_FOUND: NotFound = NotFound;
        Next::with_terminal(&self.middlewares, &NOT_FOUND)
            .run(ctx)
            .await
    }

    /// Wrap `request` in a context with a fresh in-memory response.
    pub fn context(&self, request: Request) -> Context {
        let origin = self.origin();
        let mut request = request;
        if request.origin().is_empty() {
            request.set_origin(origin.as_str());
        }
        Context::new(request, Response::memory().with_origin(origin))
    }

    /// Run an in-process request through the whole application.
    pub async fn sub_request<T, B>(
        &self,
        method: Method,
        request_target: T,
        headers: Headers,
        body: B,
    ) -> Response
    where
        T: Into<String>,
        B: Into<Body>,
    {
        let request = Request::memory(method, request_target, headers, body);
        self.sub_request_with(request).await
    }

    /// Like [`Application::sub_request`] with a prepared request. Errors never escape; they
    /// are reported to the error observers and written into the returned response.
    pub async fn sub_request_with(&self, request: Request) -> Response {
        let mut ctx = self.context(request);
        if let Err(err) = self.handle(&mut ctx).await {
            let status = Self::error_status(&err);
            tracing::error!(
                "sub-request {} {} failed: {}",
                ctx.method(),
                ctx.path(),
                err.message()
            );
            self.emit_error(&err);

            let response = ctx.response_mut();
            response.set_status(status);
            response.set_content_type("text/plain; charset=utf-8");
            response.set_body(err.message());
        }
        ctx.into_response()
    }

    /// Status of the response written for an escaped error.
    pub fn error_status(err: &AppError) -> StatusCode {
        if err.carries_status() {
            err.http_status()
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Reduce an absolute URI to `scheme://host[:port]`, dropping default ports.
fn origin_of(uri: &str) -> Option<String> {
    let uri: Uri = uri.parse().ok()?;
    let scheme = uri.scheme_str()?;
    let authority = uri.authority()?;
    let port = match (scheme, authority.port_u16()) {
        ("http", Some(80)) | ("https", Some(443)) | (_, None) => String::new(),
        (_, Some(port)) => format!(":{port}"),
    };
    Some(format!("{}://{}{}", scheme, authority.host(), port))
}

/// `tower_service::Service` over a shared application. Every call is a sub-request.
#[derive(Clone)]
pub struct AppService {
    app: Arc<Application>,
}

impl AppService {
    pub fn new(app: Arc<Application>) -> Self {
        Self { app }
    }

    pub fn app(&self) -> &Arc<Application> {
        &self.app
    }
}

impl Service<Request> for AppService {
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let app = Arc::clone(&self.app);
        Box::pin(async move { Ok(app.sub_request_with(request).await) })
    }
}
