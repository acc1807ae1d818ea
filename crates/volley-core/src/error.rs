use std::borrow::Cow;

use anyhow::Error as AnyError;
use thiserror::Error;

use crate::conditional::InvalidETag;
use crate::http::StatusCode;

/// Problem type reported when no middleware claimed a request.
pub const NO_HANDLER_TYPE: &str = "https://volley.dev/errors/no-handler";

/// Application-level error that carries an HTTP status code.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{title}")]
    Problem {
        status: StatusCode,
        kind: Cow<'static, str>,
        title: Cow<'static, str>,
        detail: Option<String>,
    },
    #[error("{message}")]
    BadRequest { message: String },
    #[error("request entity too large (limit {limit} bytes)")]
    PayloadTooLarge { limit: usize },
    #[error("unsupported type for body: {kind}")]
    UnsupportedBody { kind: &'static str },
    #[error("internal error: {source}")]
    Internal {
        #[from]
        source: AnyError,
    },
}

impl AppError {
    /// Structured HTTP problem carrying its own status, type URI and title.
    pub fn problem(
        status: StatusCode,
        kind: impl Into<Cow<'static, str>>,
        title: impl Into<Cow<'static, str>>,
        detail: Option<String>,
    ) -> Self {
        AppError::Problem {
            status,
            kind: kind.into(),
            title: title.into(),
            detail,
        }
    }

    /// Shorthand for a problem whose type is `about:blank` and title is the status reason.
    pub fn status(status: StatusCode) -> Self {
        let title = status.canonical_reason().unwrap_or("Unknown status");
        Self::problem(status, "about:blank", title, None)
    }

    /// The error raised by the terminal fallback middleware.
    pub fn no_handler() -> Self {
        Self::problem(
            StatusCode::NOT_FOUND,
            NO_HANDLER_TYPE,
            "No handler for this request",
            Some(
                "This server doesn't know what to do with your request. Did you make a typo?"
                    .to_string(),
            ),
        )
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        AppError::BadRequest {
            message: message.into(),
        }
    }

    pub fn payload_too_large(limit: usize) -> Self {
        AppError::PayloadTooLarge { limit }
    }

    pub fn unsupported_body(kind: &'static str) -> Self {
        AppError::UnsupportedBody { kind }
    }

    pub fn internal<E>(error: E) -> Self
    where
        E: Into<AnyError>,
    {
        AppError::Internal {
            source: error.into(),
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            AppError::Problem { status, .. } => *status,
            AppError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::UnsupportedBody { .. } | AppError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Whether this error was constructed with an intended HTTP status, rather than being an
    /// unexpected failure mapped to 500.
    pub fn carries_status(&self) -> bool {
        !matches!(
            self,
            AppError::UnsupportedBody { .. } | AppError::Internal { .. }
        )
    }

    pub fn is_no_handler(&self) -> bool {
        matches!(self, AppError::Problem { kind, .. } if kind == NO_HANDLER_TYPE)
    }
}

impl From<InvalidETag> for AppError {
    fn from(err: InvalidETag) -> Self {
        AppError::internal(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::internal(err)
    }
}
