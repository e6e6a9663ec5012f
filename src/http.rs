//! Minimal request/response abstractions the limiter runs against.
//!
//! The surrounding HTTP server owns parsing and transport. It hands the
//! limiter a [`Request`], gets a [`Response`] back, and supplies the inner
//! [`Handler`] that admitted requests are forwarded to.

use std::borrow::Cow;
use std::collections::HashMap;
use std::future::Future;

use async_trait::async_trait;

/// An ordered header collection with case-insensitive names.
///
/// Insertion order is kept so emitted headers stay deterministic. Inserting
/// a name that already exists (in any letter case) replaces the value in
/// place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    /// Create an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a header.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(entry) => *entry = (name, value),
            None => self.entries.push((name, value)),
        }
    }

    /// Look up a header value by name, ignoring letter case.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Whether a header with this name is present.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remove a header, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let idx = self
            .entries
            .iter()
            .position(|(existing, _)| existing.eq_ignore_ascii_case(name))?;
        Some(self.entries.remove(idx).1)
    }

    /// Merge headers on top of this map; incoming values win.
    pub fn merge<I, K, V>(&mut self, headers: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in headers {
            self.insert(name, value);
        }
    }

    /// Iterate over `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = HeaderMap::new();
        map.merge(iter);
        map
    }
}

/// An inbound request as seen by the limiter.
#[derive(Debug, Clone, Default)]
pub struct Request {
    path: String,
    headers: HeaderMap,
    /// Remote address pre-extracted from connection metadata, if the
    /// transport provides one.
    remote_addr: Option<String>,
    /// Free-form values an embedding application can attach for custom
    /// client identification.
    extensions: HashMap<String, String>,
}

impl Request {
    /// Create a request for the given URL path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn remote_addr(&self) -> Option<&str> {
        self.remote_addr.as_deref()
    }

    pub fn extension(&self, key: &str) -> Option<&str> {
        self.extensions.get(key).map(String::as_str)
    }
}

/// An outbound response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: u16,
    body: Vec<u8>,
    headers: HeaderMap,
}

impl Response {
    /// Create a response with the given status and body.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
            headers: HeaderMap::new(),
        }
    }

    /// A `200 OK` response.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::new(200, body)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Return the same response with `headers` added, overriding any
    /// existing values. Status and body are untouched.
    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers.merge(headers);
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The body interpreted as UTF-8, lossily.
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }
}

/// The downstream handler an admitted request is forwarded to.
///
/// Implemented for any `Fn(Request) -> impl Future<Output = Response>`, so a
/// plain async closure works.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, request: Request) -> Response;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    async fn call(&self, request: Request) -> Response {
        (self)(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_insert_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("x-custom", "a");
        headers.insert("X-Custom", "b");

        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("X-CUSTOM"), Some("b"));
        assert_eq!(headers.iter().next(), Some(("X-Custom", "b")));
    }

    #[test]
    fn test_header_merge_keeps_order_and_overrides() {
        let mut headers: HeaderMap = [("A", "1"), ("B", "2")].into_iter().collect();
        headers.merge([("b", "3"), ("C", "4")]);

        let pairs: Vec<_> = headers.iter().collect();
        assert_eq!(pairs, vec![("A", "1"), ("b", "3"), ("C", "4")]);
    }

    #[test]
    fn test_header_remove() {
        let mut headers: HeaderMap = [("A", "1")].into_iter().collect();
        assert_eq!(headers.remove("a"), Some("1".to_string()));
        assert!(headers.is_empty());
        assert_eq!(headers.remove("a"), None);
    }

    #[test]
    fn test_response_with_headers_preserves_status_and_body() {
        let response = Response::new(201, "created")
            .with_header("Location", "/items/1")
            .with_headers([("location", "/items/2"), ("X-Extra", "yes")]);

        assert_eq!(response.status(), 201);
        assert_eq!(response.body_text(), "created");
        assert_eq!(response.header("Location"), Some("/items/2"));
        assert_eq!(response.header("x-extra"), Some("yes"));
        assert_eq!(response.headers().len(), 2);
    }

    #[test]
    fn test_request_accessors() {
        let request = Request::new("/items")
            .with_remote_addr("10.0.0.1:4242")
            .with_header("X-Api-Key", "secret")
            .with_extension("tenant", "acme");

        assert_eq!(request.path(), "/items");
        assert_eq!(request.remote_addr(), Some("10.0.0.1:4242"));
        assert_eq!(request.header("x-api-key"), Some("secret"));
        assert_eq!(request.extension("tenant"), Some("acme"));
        assert_eq!(request.extension("missing"), None);
    }

    #[test]
    fn test_closure_handler() {
        let handler = |req: Request| async move { Response::ok(req.path().to_string()) };
        let response = tokio_test::block_on(Handler::call(&handler, Request::new("/echo")));
        assert_eq!(response.body_text(), "/echo");
    }
}
