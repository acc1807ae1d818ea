use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use axum::body::Body as AxumBody;
use axum::http::{Request, Response};
use tower::Service;

use volley_core::app::Application;
use volley_core::body::Body;
use volley_core::context::Context;
use volley_core::request::Request as CoreRequest;
use volley_core::response::Response as CoreResponse;

use crate::request::from_parts;
use crate::response::{fallback_response, into_axum_response};
use crate::websocket;

/// Tower service that runs Axum/Hyper requests through a Volley application.
#[derive(Clone)]
pub struct VolleyAxumService {
    app: Arc<Application>,
}

impl VolleyAxumService {
    pub fn new(app: Application) -> Self {
        Self::from_arc(Arc::new(app))
    }

    pub fn from_arc(app: Arc<Application>) -> Self {
        Self { app }
    }

    pub fn app(&self) -> &Arc<Application> {
        &self.app
    }
}

impl Service<Request<AxumBody>> for VolleyAxumService {
    type Response = Response<AxumBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<AxumBody>) -> Self::Future {
        let app = Arc::clone(&self.app);
        Box::pin(async move {
            let (parts, body) = request.into_parts();
            if websocket::is_upgrade(&parts) {
                return Ok(websocket::upgrade(app, parts).await);
            }
            let request = from_parts(&parts, Body::from_stream(body.into_data_stream()));
            Ok(dispatch(&app, request).await)
        })
    }
}

/// Run one transport request through `app` and serialize the outcome. Errors that escape the
/// chain, including serialization failures, become the plain-text fallback response.
pub async fn dispatch(app: &Application, request: CoreRequest) -> Response<AxumBody> {
    let response = CoreResponse::transport().with_origin(app.origin());
    let mut ctx = Context::new(request, response);

    let outcome = match app.handle(&mut ctx).await {
        Ok(()) => into_axum_response(ctx.into_response()),
        Err(err) => Err(err),
    };
    outcome.unwrap_or_else(|err| fallback_response(app, &err))
}
