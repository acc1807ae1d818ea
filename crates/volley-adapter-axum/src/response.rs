use axum::body::Body as AxumBody;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Response};

use volley_core::app::Application;
use volley_core::error::AppError;
use volley_core::response::{Payload, Response as CoreResponse};

/// Serialize a core response for Axum/Hyper.
///
/// Streams are piped through without buffering. Writer bodies run on their own task and feed
/// the outgoing stream as they produce chunks.
pub fn into_axum_response(mut response: CoreResponse) -> Result<Response<AxumBody>, AppError> {
    let body = match response.take_body().into_payload()? {
        Payload::Full(bytes) => AxumBody::from(bytes),
        Payload::Stream(stream) => AxumBody::from_stream(stream),
        Payload::Writer { stream, driver } => {
            tokio::spawn(async move {
                if let Err(err) = driver.await {
                    tracing::error!("response body writer failed: {err}");
                }
            });
            AxumBody::from_stream(stream)
        }
    };

    let mut out = Response::new(body);
    *out.status_mut() = response.status();
    *out.headers_mut() = response.headers().to_header_map();
    Ok(out)
}

/// Plain-text response for an error that escaped the middleware chain. Notifies the
/// application's error observers.
pub fn fallback_response(app: &Application, err: &AppError) -> Response<AxumBody> {
    let status = Application::error_status(err);
    tracing::error!(
        "uncaught error status={} error={}",
        status.as_u16(),
        err.message()
    );
    app.emit_error(err);

    let body = format!(
        "Uncaught exception. No middleware handled the request (HTTP status {})",
        status.as_u16()
    );
    let mut response = Response::new(AxumBody::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
