//! Request descriptor and normalized response.
//!
//! A [`Request`] is immutable once built and passed by value through the
//! stack; the retry loop replays the same descriptor on every attempt.

use std::collections::HashMap;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};

/// Maximum number of body bytes kept when rendering an error message.
const BODY_PREVIEW_LIMIT: usize = 256;

/// Where a request is sent.
///
/// Platform paths are resolved against the configured base URL and carry
/// the bearer token; external URLs (signed upload targets) never do.
#[derive(Debug, Clone)]
pub enum Target {
    Platform(String),
    External(String),
}

/// Request payload.
#[derive(Debug, Clone)]
pub enum Body {
    Empty,
    Json(Value),
    Bytes(Vec<u8>),
}

/// One HTTP exchange to perform, independent of any transport library.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub target: Target,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Body,
    /// POSTs are not replayed on transient statuses unless the caller
    /// marks them side-effect free (search endpoints, signed-URL fetches).
    pub retry_post: bool,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            target: Target::Platform(path.into()),
            query: Vec::new(),
            headers: Vec::new(),
            body: Body::Empty,
            retry_post: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Request against an absolute URL outside the platform (e.g. a
    /// signed upload target). No bearer token is attached.
    pub fn external(method: Method, url: impl Into<String>) -> Self {
        Self { target: Target::External(url.into()), ..Self::new(method, "") }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Body::Json(body);
        self
    }

    pub fn bytes(mut self, body: Vec<u8>) -> Self {
        self.body = Body::Bytes(body);
        self
    }

    /// Mark a POST as safe to replay under the retry policy.
    pub fn retryable(mut self) -> Self {
        self.retry_post = true;
        self
    }

    pub fn is_platform(&self) -> bool {
        matches!(self.target, Target::Platform(_))
    }
}

/// Response normalized regardless of the transport library.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    /// Header names lowercased on ingestion.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|err| Error::Decode(err.to_string()))
    }

    /// Lossy, truncated body rendering for error messages.
    pub fn body_preview(&self) -> String {
        let end = self.body.len().min(BODY_PREVIEW_LIMIT);
        String::from_utf8_lossy(&self.body[..end]).into_owned()
    }
}
