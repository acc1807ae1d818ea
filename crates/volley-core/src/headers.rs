//! Case-insensitive, multi-valued header container shared by requests and responses.
//!
//! Values are stored the way they were set: a single text value, a number, or a list of
//! strings. Lists exist for headers that are legitimately repeated on the wire, most
//! notably `Set-Cookie`, where joining with a comma would change the meaning.

use std::collections::BTreeMap;
use std::fmt;

use crate::http::{HeaderMap, HeaderName, HeaderValue};

/// A raw stored header value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Number(u64),
    List(Vec<String>),
}

impl FieldValue {
    fn into_list(self) -> Vec<String> {
        match self {
            FieldValue::Text(text) => vec![text],
            FieldValue::Number(number) => vec![number.to_string()],
            FieldValue::List(list) => list,
        }
    }

    fn to_list(&self) -> Vec<String> {
        self.clone().into_list()
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(text) => f.write_str(text),
            FieldValue::Number(number) => write!(f, "{number}"),
            FieldValue::List(list) => f.write_str(&list.join(", ")),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<&String> for FieldValue {
    fn from(value: &String) -> Self {
        FieldValue::Text(value.clone())
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Number(u64::from(value))
    }
}

impl From<usize> for FieldValue {
    fn from(value: usize) -> Self {
        FieldValue::Number(value as u64)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(value: Vec<String>) -> Self {
        FieldValue::List(value)
    }
}

impl From<Vec<&str>> for FieldValue {
    fn from(value: Vec<&str>) -> Self {
        FieldValue::List(value.into_iter().map(str::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for FieldValue {
    fn from(value: [&str; N]) -> Self {
        FieldValue::List(value.iter().map(|v| v.to_string()).collect())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Field {
    name: String,
    value: FieldValue,
}

/// Header store keyed by the lowercased field name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers {
    fields: BTreeMap<String, Field>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from `(name, value)` pairs; repeated names are appended.
    pub fn from_pairs<I, N, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<str>,
        V: Into<FieldValue>,
    {
        let mut headers = Self::new();
        for (name, value) in pairs {
            headers.append(name.as_ref(), value);
        }
        headers
    }

    /// Import an `http::HeaderMap`. Values that are not valid visible ASCII are decoded lossily.
    pub fn from_header_map(map: &HeaderMap) -> Self {
        let mut headers = Self::new();
        for (name, value) in map {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            headers.append(name.as_str(), value);
        }
        headers
    }

    pub fn set<V>(&mut self, name: &str, value: V)
    where
        V: Into<FieldValue>,
    {
        let key = name.to_ascii_lowercase();
        let value = value.into();
        match self.fields.get_mut(&key) {
            Some(field) => field.value = value,
            None => {
                self.fields.insert(
                    key,
                    Field {
                        name: name.to_string(),
                        value,
                    },
                );
            }
        }
    }

    pub fn append<V>(&mut self, name: &str, value: V)
    where
        V: Into<FieldValue>,
    {
        let key = name.to_ascii_lowercase();
        let value = value.into();
        match self.fields.get_mut(&key) {
            Some(field) => {
                let mut list = std::mem::replace(&mut field.value, FieldValue::List(Vec::new()))
                    .into_list();
                list.extend(value.into_list());
                field.value = FieldValue::List(list);
            }
            None => self.set(name, value),
        }
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.field(name).map(|field| field.value.to_string())
    }

    pub fn get_many(&self, name: &str) -> Vec<String> {
        self.field(name)
            .map(|field| field.value.to_list())
            .unwrap_or_default()
    }

    pub fn has(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn delete(&mut self, name: &str) {
        self.fields.remove(&name.to_ascii_lowercase());
    }

    /// Snapshot of every header keyed by lowercased name.
    pub fn get_all(&self) -> BTreeMap<String, FieldValue> {
        self.fields
            .iter()
            .map(|(key, field)| (key.clone(), field.value.clone()))
            .collect()
    }

    /// Iterate `(display name, raw value)` pairs in lowercased-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields
            .values()
            .map(|field| (field.name.as_str(), &field.value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Export to an `http::HeaderMap`, one wire field per list element. Fields whose name or
    /// value cannot be represented on the wire are skipped.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.fields.len());
        for (key, field) in &self.fields {
            let Ok(name) = HeaderName::from_bytes(key.as_bytes()) else {
                tracing::warn!("dropping header with invalid name {:?}", field.name);
                continue;
            };
            for value in field.value.to_list() {
                match HeaderValue::from_str(&value) {
                    Ok(value) => {
                        map.append(name.clone(), value);
                    }
                    Err(_) => {
                        tracing::warn!("dropping invalid value for header {}", field.name);
                    }
                }
            }
        }
        map
    }

    fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(&name.to_ascii_lowercase())
    }
}

impl<N, V> FromIterator<(N, V)> for Headers
where
    N: AsRef<str>,
    V: Into<FieldValue>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}
