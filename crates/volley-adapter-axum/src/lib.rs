//! Axum adapter that serves Volley applications over HTTP and WebSocket.

pub mod config;

#[cfg(feature = "axum")]
mod request;
#[cfg(feature = "axum")]
mod response;
#[cfg(feature = "axum")]
mod server;
#[cfg(feature = "axum")]
mod service;
#[cfg(feature = "axum")]
mod websocket;

pub use config::{ConfigError, LogLevel, ServerConfig};
#[cfg(feature = "axum")]
pub use request::into_core_request;
#[cfg(feature = "axum")]
pub use response::{fallback_response, into_axum_response};
#[cfg(feature = "axum")]
pub use server::{run_app, AxumServer, AxumServerConfig};
#[cfg(feature = "axum")]
pub use service::{dispatch, VolleyAxumService};
