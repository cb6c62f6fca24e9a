//! Description of a single API call
//!
//! An `ApiRequest` is plain data (no open file handles, no token) so the
//! client can rebuild the HTTP request after refreshing the token.

use std::path::PathBuf;

use reqwest::{Method, Url};
use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(Value),
    /// Streamed from disk with an explicit Content-Length
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// Label for logs and metrics
    pub endpoint: &'static str,
    pub method: Method,
    /// Path segments relative to the API base, e.g. `["me", "skydrive", "files"]`
    pub segments: Vec<String>,
    pub params: Vec<(String, String)>,
    pub body: RequestBody,
}

impl ApiRequest {
    /// `path` is an object id or a `/`-separated alias such as `me/skydrive`.
    /// Ids never contain `/`; free-form names go through [`ApiRequest::segment`].
    pub fn new(endpoint: &'static str, method: Method, path: &str) -> Self {
        Self {
            endpoint,
            method,
            segments: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            params: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn get(endpoint: &'static str, path: &str) -> Self {
        Self::new(endpoint, Method::GET, path)
    }

    pub fn put(endpoint: &'static str, path: &str) -> Self {
        Self::new(endpoint, Method::PUT, path)
    }

    pub fn post(endpoint: &'static str, path: &str) -> Self {
        Self::new(endpoint, Method::POST, path)
    }

    pub fn delete(endpoint: &'static str, path: &str) -> Self {
        Self::new(endpoint, Method::DELETE, path)
    }

    /// Append one literal path segment; `/`, `#`, `?` and `%` are escaped.
    pub fn segment(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    /// The path as logged, e.g. `folder.1/files/IMG #12.jpg`.
    pub fn path(&self) -> String {
        self.segments.join("/")
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Append a caller-supplied filter such as `filter=photos&limit=10`.
    pub fn raw_query(mut self, query: Option<&str>) -> Self {
        if let Some(query) = query {
            self.params.extend(parse_query(query));
        }
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.body = RequestBody::File(path.into());
        self
    }

    /// Resolve against `base` and append the access token as the last parameter.
    pub fn url(&self, base: &str, access_token: &str) -> Result<Url> {
        let mut url = Url::parse(base).map_err(|e| Error::InvalidUrl(format!("{base}: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| Error::InvalidUrl(format!("{base}: cannot be a base")))?
            .pop_if_empty()
            .extend(&self.segments);
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.params {
                pairs.append_pair(key, value);
            }
            pairs.append_pair("access_token", access_token);
        }
        Ok(url)
    }
}

/// Split a query string into decoded pairs; a leading `?` is ignored.
fn parse_query(query: &str) -> Vec<(String, String)> {
    let query = query.trim_start_matches('?');
    if query.is_empty() {
        return Vec::new();
    }
    match Url::parse(&format!("http://query.invalid/?{query}")) {
        Ok(url) => url.query_pairs().into_owned().collect(),
        Err(_) => Vec::new(),
    }
}
