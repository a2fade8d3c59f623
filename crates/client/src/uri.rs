//! Request target construction.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use reqwest::Url;
use std::borrow::Cow;
use std::collections::BTreeMap;

pub const PARAM_COLLECTION: &str = "collection";
pub const PARAM_TTL: &str = "ttl";
pub const PARAM_RECURSIVE: &str = "recursive";

/// Query parameters for a Filer request.
///
/// Keys are kept sorted so the encoded query string is deterministic; each
/// key keeps its values in insertion order. Empty values are never stored,
/// so they never reach the wire as `key=`.
///
/// ```
/// use filer_client::QueryParams;
///
/// let params = QueryParams::new().collection("photos").ttl("").recursive();
/// assert_eq!(params.get("collection"), Some(&["photos".to_string()][..]));
/// assert_eq!(params.get("ttl"), None);
/// assert_eq!(params.get("recursive"), Some(&["true".to_string()][..]));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(BTreeMap<String, Vec<String>>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, keeping any existing values for the same key.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let value = value.into();
        if !value.is_empty() {
            self.0.entry(key.into()).or_default().push(value);
        }
        self
    }

    /// Replace every value for `key`. An empty value removes the key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        if value.is_empty() {
            self.0.remove(&key);
        } else {
            self.0.insert(key, vec![value]);
        }
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.add(key, value);
        self
    }

    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.set(PARAM_COLLECTION, collection);
        self
    }

    pub fn ttl(mut self, ttl: impl Into<String>) -> Self {
        self.set(PARAM_TTL, ttl);
        self
    }

    /// Force `recursive=true`, overriding whatever was there before.
    pub fn recursive(mut self) -> Self {
        self.set(PARAM_RECURSIVE, "true");
        self
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.0.get(key).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Every `(key, value)` pair in encoding order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().flat_map(|(key, values)| values.iter().map(move |value| (key.as_str(), value.as_str())))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (key, value) in iter {
            params.add(key, value);
        }
        params
    }
}

/// Parse the Filer's base endpoint.
///
/// A missing scheme defaults to `http`, so `localhost:8888` is accepted.
/// Only `http` and `https` URLs with a host are usable; everything else is
/// [`MalformedEndpoint`](crate::error::ErrorKind::MalformedEndpoint).
pub fn parse_endpoint(input: &str) -> Result<Url> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        exn::bail!(ErrorKind::MalformedEndpoint(input.to_string()));
    }
    let candidate = match trimmed.contains("://") {
        true => Cow::Borrowed(trimmed),
        false => Cow::Owned(format!("http://{trimmed}")),
    };
    let url = Url::parse(&candidate).or_raise(|| ErrorKind::MalformedEndpoint(input.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none_or(str::is_empty) {
        exn::bail!(ErrorKind::MalformedEndpoint(input.to_string()));
    }
    Ok(url)
}

/// Build the full request URI for `path` on the Filer at `base`.
///
/// The logical path replaces whatever path `base` carries, each segment
/// percent-encoded on its own. Query parameters
/// already on `base` are merged with `params`, then encoded sorted by key.
///
/// ```
/// use filer_client::{QueryParams, build_request_uri, parse_endpoint};
///
/// let base = parse_endpoint("localhost:8888/ignored").unwrap();
/// let params = QueryParams::new().ttl("3m").collection("photos");
/// assert_eq!(
///     build_request_uri(&base, "/album/cat.jpg", &params),
///     "http://localhost:8888/album/cat.jpg?collection=photos&ttl=3m",
/// );
/// ```
pub fn build_request_uri(base: &Url, path: &str, params: &QueryParams) -> String {
    let mut url = base.clone();
    // Segment by segment, so `%`, `\`, `?` and `#` inside a name are escaped
    // rather than read as URL syntax.
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.clear().extend(path.strip_prefix('/').unwrap_or(path).split('/'));
    }
    let mut merged: QueryParams = base.query_pairs().collect();
    for (key, value) in params.iter() {
        merged.add(key, value);
    }
    url.set_query(None);
    if !merged.is_empty() {
        url.query_pairs_mut().extend_pairs(merged.iter());
    }
    url.into()
}
