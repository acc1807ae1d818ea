use std::net::SocketAddr;

use axum::body::Body as AxumBody;
use axum::extract::connect_info::ConnectInfo;
use axum::http::request::Parts;
use axum::http::{Request, Uri};

use volley_core::body::Body;
use volley_core::headers::Headers;
use volley_core::request::Request as CoreRequest;

/// Convert an Axum/Hyper request into a transport-backed core request. The body stays a
/// stream and is only pulled when a middleware reads it.
pub fn into_core_request(request: Request<AxumBody>) -> CoreRequest {
    let (parts, body) = request.into_parts();
    from_parts(&parts, Body::from_stream(body.into_data_stream()))
}

pub(crate) fn from_parts(parts: &Parts, body: Body) -> CoreRequest {
    let peer_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    CoreRequest::transport(
        parts.method.clone(),
        request_target(&parts.uri),
        Headers::from_header_map(&parts.headers),
        body,
        peer_addr,
    )
}

/// Rebuild the request target as the client sent it.
fn request_target(uri: &Uri) -> String {
    if uri.scheme().is_some() {
        return uri.to_string();
    }
    if let Some(path_and_query) = uri.path_and_query() {
        return path_and_query.as_str().to_string();
    }
    match uri.authority() {
        Some(authority) => authority.as_str().to_string(),
        None => "/".to_string(),
    }
}
