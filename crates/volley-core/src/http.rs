use std::future::Future;
use std::pin::Pin;

use crate::error::AppError;

pub use http::header;

pub type Method = http::Method;
pub type StatusCode = http::StatusCode;
pub type HeaderMap = http::HeaderMap;
pub type HeaderValue = http::HeaderValue;
pub type HeaderName = http::header::HeaderName;
pub type Uri = http::Uri;

/// Boxed future returned by middleware and transport capabilities.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result type used throughout the middleware chain.
pub type AppResult<T = ()> = Result<T, AppError>;
