//! Evaluation of `If-Match`, `If-None-Match`, `If-Modified-Since` and `If-Unmodified-Since`.
//!
//! Only the first of these headers present on the request is evaluated, in the order listed
//! above; the others are ignored.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;

use crate::http::{Method, StatusCode};
use crate::request::Request;

/// Returned when a validator string is not a quoted (optionally weak) entity tag.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid etag {0:?}: etags must be double-quoted, optionally prefixed with W/")]
pub struct InvalidETag(pub String);

/// A syntactically valid entity tag, including its quotes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ETag(String);

impl ETag {
    pub fn parse(value: &str) -> Result<Self, InvalidETag> {
        let opaque = value.strip_prefix("W/").unwrap_or(value);
        let valid = opaque.len() >= 3
            && opaque.starts_with('"')
            && opaque.ends_with('"')
            && opaque[1..opaque.len() - 1]
                .bytes()
                .all(|b| b == 0x21 || (0x23..=0x7e).contains(&b));
        if valid {
            Ok(Self(value.to_string()))
        } else {
            Err(InvalidETag(value.to_string()))
        }
    }

    /// A strong tag wrapping `opaque` in quotes.
    pub fn strong(opaque: &str) -> Result<Self, InvalidETag> {
        Self::parse(&format!("\"{opaque}\""))
    }

    pub fn is_weak(&self) -> bool {
        self.0.starts_with("W/")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ETag {
    type Err = InvalidETag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of a conditional check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Precondition {
    /// 200: preconditions passed, handle the request normally.
    Passed,
    /// 304: the client's cached representation is current.
    NotModified,
    /// 412: a precondition did not hold.
    Failed,
}

impl Precondition {
    pub fn status(self) -> StatusCode {
        match self {
            Precondition::Passed => StatusCode::OK,
            Precondition::NotModified => StatusCode::NOT_MODIFIED,
            Precondition::Failed => StatusCode::PRECONDITION_FAILED,
        }
    }
}

/// Evaluate the request's precondition headers against the resource's current validators.
pub fn conditional_check(
    request: &Request,
    last_modified: Option<DateTime<Utc>>,
    etag: Option<&ETag>,
) -> Precondition {
    let headers = request.headers();
    let etag = etag.map(ETag::as_str);

    if let Some(header) = headers.get("If-Match") {
        return if_match(&header, etag);
    }
    if let Some(header) = headers.get("If-None-Match") {
        return if_none_match(request.method(), &header, etag);
    }
    // Date headers that do not parse are ignored.
    let since = headers.get("If-Modified-Since").and_then(|h| parse_http_date(&h));
    if let Some(since) = since {
        return if_modified_since(request.method(), since, last_modified);
    }
    let since = headers.get("If-Unmodified-Since").and_then(|h| parse_http_date(&h));
    if let Some(since) = since {
        return if_unmodified_since(since, last_modified);
    }
    Precondition::Passed
}

/// Same as [`conditional_check`] but validating a raw ETag string first.
pub fn conditional_check_str(
    request: &Request,
    last_modified: Option<DateTime<Utc>>,
    etag: Option<&str>,
) -> Result<Precondition, InvalidETag> {
    let etag = etag.map(ETag::parse).transpose()?;
    Ok(conditional_check(request, last_modified, etag.as_ref()))
}

fn tag_listed(header: &str, current: Option<&str>) -> bool {
    if header == "*" {
        return current.is_some();
    }
    match current {
        Some(current) => header.split(',').map(str::trim).any(|tag| tag == current),
        None => false,
    }
}

fn if_match(header: &str, current: Option<&str>) -> Precondition {
    if tag_listed(header, current) {
        Precondition::Passed
    } else {
        Precondition::Failed
    }
}

fn if_none_match(method: &Method, header: &str, current: Option<&str>) -> Precondition {
    if !tag_listed(header, current) {
        return Precondition::Passed;
    }
    if is_safe_read(method) {
        Precondition::NotModified
    } else {
        Precondition::Failed
    }
}

fn if_modified_since(
    method: &Method,
    since: DateTime<Utc>,
    last_modified: Option<DateTime<Utc>>,
) -> Precondition {
    if !is_safe_read(method) {
        return Precondition::Passed;
    }
    let Some(last_modified) = last_modified else {
        return Precondition::Passed;
    };
    if last_modified.timestamp() > since.timestamp() {
        Precondition::Passed
    } else {
        Precondition::NotModified
    }
}

fn if_unmodified_since(since: DateTime<Utc>, last_modified: Option<DateTime<Utc>>) -> Precondition {
    // Without a known modification time the precondition cannot be proven.
    let Some(last_modified) = last_modified else {
        return Precondition::Failed;
    };
    if last_modified.timestamp() <= since.timestamp() {
        Precondition::Passed
    } else {
        Precondition::Failed
    }
}

fn is_safe_read(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD
}

/// Parse an HTTP-date in IMF-fixdate, RFC 850 or asctime form.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date.with_timezone(&Utc));
    }
    ["%A, %d-%b-%y %H:%M:%S GMT", "%a %b %e %H:%M:%S %Y"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

/// Format a timestamp as an IMF-fixdate, suitable for `Last-Modified`.
pub fn format_http_date(date: DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
