//! Content-Type matching, Accept negotiation and Prefer parsing.

use std::collections::HashMap;

use mime::Mime;

use crate::headers::Headers;

/// Returns the Content-Type of a header set with parameters such as `charset` removed, or an
/// empty string when the header is absent.
pub fn media_type(headers: &Headers) -> String {
    headers
        .get("content-type")
        .map(|value| value.split(';').next().unwrap_or("").trim().to_string())
        .unwrap_or_default()
}

/// Checks whether `content_type` (already stripped of parameters) matches `wanted`.
///
/// For `application/hal+json` each of `application/hal+json`, `hal+json`, `application/*`,
/// `json` and `application/json` match.
pub fn is(content_type: &str, wanted: &str) -> bool {
    if content_type.is_empty() {
        return false;
    }
    if wanted == content_type {
        return true;
    }

    let (main, sub) = content_type.split_once('/').unwrap_or((content_type, ""));
    if sub == wanted {
        return true;
    }
    if wanted.strip_suffix("/*") == Some(main) {
        return true;
    }

    if let Some((_, suffix)) = sub.split_once('+') {
        if suffix == wanted {
            return true;
        }
        if let Some((wanted_main, wanted_sub)) = wanted.split_once('/') {
            return wanted_main == main && wanted_sub == suffix;
        }
    }
    false
}

/// One entry of an Accept header.
#[derive(Debug)]
struct MediaRange {
    mime: Mime,
    quality: f32,
    position: usize,
}

/// How well a candidate matched a media range. Ordered by specificity, then quality, then
/// position in the header the way RFC 7231 §5.3.2 ranks overlapping ranges.
#[derive(Clone, Copy, Debug)]
struct Priority {
    quality: f32,
    specificity: u8,
    position: usize,
    candidate: usize,
}

fn parse_accept(header: &str) -> Vec<MediaRange> {
    header
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .enumerate()
        .filter_map(|(position, item)| {
            let mime: Mime = item.parse().ok()?;
            let quality = mime
                .get_param("q")
                .and_then(|q| q.as_str().parse::<f32>().ok())
                .unwrap_or(1.0);
            Some(MediaRange {
                mime,
                quality,
                position,
            })
        })
        .collect()
}

fn specificity(range: &Mime, candidate: &Mime) -> Option<u8> {
    let mut score = 0;

    if range.type_() == candidate.type_() {
        score |= 4;
    } else if range.type_() != mime::STAR {
        return None;
    }

    if range.subtype() == candidate.subtype() {
        score |= 2;
    } else if range.subtype() != mime::STAR {
        return None;
    }

    let mut params = range.params().filter(|(name, _)| *name != "q").peekable();
    if params.peek().is_some() {
        for (name, value) in params {
            match candidate.get_param(name.as_str()) {
                Some(candidate_value)
                    if candidate_value.as_str().eq_ignore_ascii_case(value.as_str()) => {}
                _ => return None,
            }
        }
        score |= 1;
    }

    Some(score)
}

fn best_priority(ranges: &[MediaRange], candidate: &Mime, index: usize) -> Option<Priority> {
    let mut best: Option<Priority> = None;
    for range in ranges {
        let Some(specificity) = specificity(&range.mime, candidate) else {
            continue;
        };
        let priority = Priority {
            quality: range.quality,
            specificity,
            position: range.position,
            candidate: index,
        };
        let replace = match best {
            None => true,
            Some(current) => {
                (current.specificity, current.quality, std::cmp::Reverse(current.position))
                    < (specificity, range.quality, std::cmp::Reverse(range.position))
            }
        };
        if replace {
            best = Some(priority);
        }
    }
    best
}

/// Expand extension shorthands such as `json` or `html` into a full media type.
fn expand_candidate(candidate: &str) -> Option<Mime> {
    if candidate.contains('/') {
        return candidate.parse().ok();
    }
    let full = match candidate.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "json" => "application/json",
        "html" | "htm" => "text/html",
        "text" | "txt" => "text/plain",
        "xml" => "application/xml",
        "css" => "text/css",
        "js" => "application/javascript",
        "csv" => "text/csv",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "form" | "urlencoded" => "application/x-www-form-urlencoded",
        "multipart" => "multipart/form-data",
        _ => return None,
    };
    full.parse().ok()
}

/// Pick the best of `candidates` for the given Accept header value.
///
/// Without an Accept header every type is acceptable, so the first candidate wins. Returns the
/// candidate string exactly as it was passed in.
pub fn accepts<'a>(accept: Option<&str>, candidates: &[&'a str]) -> Option<&'a str> {
    let Some(accept) = accept else {
        return candidates.first().copied();
    };

    let ranges = parse_accept(accept);
    let mut matches: Vec<Priority> = candidates
        .iter()
        .enumerate()
        .filter_map(|(index, candidate)| {
            let mime = expand_candidate(candidate)?;
            best_priority(&ranges, &mime, index)
        })
        .filter(|priority| priority.quality > 0.0)
        .collect();

    matches.sort_by(|a, b| {
        b.quality
            .total_cmp(&a.quality)
            .then(b.specificity.cmp(&a.specificity))
            .then(a.position.cmp(&b.position))
            .then(a.candidate.cmp(&b.candidate))
    });

    matches.first().map(|priority| candidates[priority.candidate])
}

/// The value of one RFC 7240 preference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Preference {
    /// The preference appeared without a value, e.g. `respond-async`.
    Flag,
    /// The preference appeared with a value, e.g. `return=minimal`.
    Value(String),
}

impl Preference {
    pub fn value(&self) -> Option<&str> {
        match self {
            Preference::Flag => None,
            Preference::Value(value) => Some(value),
        }
    }
}

/// Parse a Prefer header into lowercased preference names. Commas inside quoted strings are
/// not recognised.
pub fn parse_prefer(header: Option<&str>) -> HashMap<String, Preference> {
    let mut result = HashMap::new();
    let Some(header) = header else {
        return result;
    };
    for item in header.split(',').map(str::trim) {
        if item.is_empty() {
            continue;
        }
        let key_value = item.split(';').next().unwrap_or("");
        let (key, value) = match key_value.split_once('=') {
            Some((key, value)) => (key, Preference::Value(value.to_string())),
            None => (key_value, Preference::Flag),
        };
        result.insert(key.to_ascii_lowercase(), value);
    }
    result
}

/// Look up a single preference by name.
pub fn prefer(header: Option<&str>, name: &str) -> Option<Preference> {
    parse_prefer(header).remove(&name.to_ascii_lowercase())
}
