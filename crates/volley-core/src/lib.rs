//! Core primitives for composing HTTP middleware chains that run against any transport.

pub mod app;
pub mod body;
pub mod conditional;
pub mod context;
pub mod error;
pub mod headers;
pub mod http;
pub mod middleware;
pub mod negotiate;
pub mod request;
pub mod response;
pub mod websocket;

pub use app::{AppConfig, AppService, Application};
pub use body::Body;
pub use conditional::{conditional_check, ETag, Precondition};
pub use context::Context;
pub use error::AppError;
pub use headers::Headers;
pub use http::AppResult;
pub use middleware::{handler_fn, middleware_fn, BoxMiddleware, Middleware, Next};
pub use request::Request;
pub use response::{Response, ResponseBody};
