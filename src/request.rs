//! Per-request facts.
//!
//! [`Request`] is what the dispatcher sees of one HTTP exchange: method,
//! path, query, headers, the caller's [`SecurityContext`] and the body
//! stream. It is owned by the request's task and dropped with it.
//!
//! Matrix parameters (`/cars;color=red/models;year=2016`) are stripped from
//! every segment before routing. Those on the last segment stay available
//! through [`Request::matrix`].

use std::sync::Arc;

use bytes::Bytes;
use http::HeaderMap;
use http::header::{COOKIE, HeaderName, HeaderValue};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Body as HttpBody;

use crate::error::BoxError;
use crate::security::{Anonymous, SecurityContext};

/// The body stream handed to the dispatcher.
pub type Body = UnsyncBoxBody<Bytes, BoxError>;

/// An incoming request as seen by the dispatcher.
pub struct Request {
    method: String,
    path: String,
    query: Vec<(String, String)>,
    matrix: Vec<(String, String)>,
    headers: HeaderMap,
    security: Arc<dyn SecurityContext>,
    body: Body,
}

impl Request {
    pub fn builder() -> RequestBuilder {
        RequestBuilder::default()
    }

    /// Adapts an `http::Request` produced by a transport.
    ///
    /// An authentication layer in front of the dispatcher passes the caller's
    /// context as an `Arc<dyn SecurityContext>` request extension; without
    /// one the request is anonymous.
    pub fn from_http<B>(req: http::Request<B>) -> Self
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();
        let security = parts
            .extensions
            .get::<Arc<dyn SecurityContext>>()
            .cloned()
            .unwrap_or_else(|| Arc::new(Anonymous));
        let body = body.map_err(Into::<BoxError>::into).boxed_unsync();
        Self::new(parts.method.as_str(), parts.uri.path(), parts.uri.query(), parts.headers, security, body)
    }

    fn new(
        method: &str,
        raw_path: &str,
        query: Option<&str>,
        headers: HeaderMap,
        security: Arc<dyn SecurityContext>,
        body: Body,
    ) -> Self {
        let (path, matrix) = split_matrix(raw_path);
        let query = query
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default();
        Self { method: method.to_owned(), path, query, matrix, headers, security, body }
    }

    pub fn method(&self) -> &str { &self.method }

    /// The path with matrix parameters removed. Not percent-decoded.
    pub fn path(&self) -> &str { &self.path }

    pub fn headers(&self) -> &HeaderMap { &self.headers }

    pub fn security(&self) -> &dyn SecurityContext { &*self.security }

    /// First value of a header. Header names are case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Every value of a header, in arrival order.
    pub fn header_all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + use<'a> {
        self.headers
            .get_all(name)
            .into_iter()
            .filter_map(|v| v.to_str().ok())
    }

    /// First decoded value of a query parameter.
    pub fn query(&self, name: &str) -> Option<&str> {
        lookup_first(&self.query, name)
    }

    pub fn query_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        lookup_all(&self.query, name)
    }

    /// First value of a matrix parameter on the last path segment.
    pub fn matrix(&self, name: &str) -> Option<&str> {
        lookup_first(&self.matrix, name)
    }

    pub fn matrix_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        lookup_all(&self.matrix, name)
    }

    /// Value of a cookie from any `Cookie` header.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.header_all(COOKIE.as_str())
            .flat_map(|h| h.split(';'))
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| k.trim() == name)
            .map(|(_, v)| v.trim().trim_matches('"'))
    }

    /// Moves the body stream out, leaving an empty one behind.
    pub(crate) fn take_body(&mut self) -> Body {
        std::mem::replace(&mut self.body, empty_body())
    }
}

/// Builder for requests assembled by hand, mostly in tests.
///
/// ```rust
/// use tenon::Request;
///
/// let req = Request::builder()
///     .method("GET")
///     .uri("/users/42?expand=posts")
///     .header("accept", "application/json")
///     .build();
/// assert_eq!(req.query("expand"), Some("posts"));
/// ```
pub struct RequestBuilder {
    method: String,
    uri: String,
    headers: HeaderMap,
    security: Arc<dyn SecurityContext>,
    body: Body,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self {
            method: "GET".to_owned(),
            uri: "/".to_owned(),
            headers: HeaderMap::new(),
            security: Arc::new(Anonymous),
            body: empty_body(),
        }
    }
}

impl RequestBuilder {
    pub fn method(mut self, method: &str) -> Self {
        self.method = method.to_owned();
        self
    }

    /// Path plus optional query, e.g. `/users?page=2`.
    pub fn uri(mut self, uri: &str) -> Self {
        self.uri = uri.to_owned();
        self
    }

    /// Appends a header value. Invalid names or values are ignored.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn security(mut self, ctx: impl SecurityContext + 'static) -> Self {
        self.security = Arc::new(ctx);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Full::new(body.into()).map_err(|never| match never {}).boxed_unsync();
        self
    }

    /// Uses an arbitrary body stream.
    pub fn stream(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    pub fn build(self) -> Request {
        let (path, query) = match self.uri.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (self.uri.as_str(), None),
        };
        Request::new(&self.method, path, query, self.headers, self.security, self.body)
    }
}

pub(crate) fn empty_body() -> Body {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync()
}

fn lookup_first<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
}

fn lookup_all<'a>(pairs: &'a [(String, String)], name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    pairs.iter().filter(move |(k, _)| k == name).map(|(_, v)| v.as_str())
}

/// Splits `/a;x=1/b;y=2` into `/a/b` and the last segment's `[(y, 2)]`.
fn split_matrix(raw: &str) -> (String, Vec<(String, String)>) {
    if !raw.contains(';') {
        return (raw.to_owned(), Vec::new());
    }

    let mut path = String::with_capacity(raw.len());
    let mut matrix = Vec::new();
    let segments: Vec<&str> = raw.split('/').collect();
    let last = segments.len() - 1;
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            path.push('/');
        }
        let mut parts = segment.split(';');
        path.push_str(parts.next().unwrap_or_default());
        if i == last {
            matrix = parts
                .filter(|p| !p.is_empty())
                .map(|p| match p.split_once('=') {
                    Some((k, v)) => (k.to_owned(), v.to_owned()),
                    None => (p.to_owned(), String::new()),
                })
                .collect();
        }
    }
    (path, matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::Authenticated;

    #[test]
    fn lookups_borrow_only_the_request() {
        let req = Request::builder().uri("/cars;color=red?page=2").build();
        let key = String::from("page");
        let page = req.query(&key);
        drop(key);
        let key = String::from("color");
        let color = req.matrix(&key);
        drop(key);
        assert_eq!((page, color), (Some("2"), Some("red")));
    }

    #[test]
    fn query_values_are_decoded_and_repeatable() {
        let req = Request::builder().uri("/s?q=hello%20world&tag=a&tag=b").build();
        assert_eq!(req.query("q"), Some("hello world"));
        assert_eq!(req.query_all("tag").collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(req.query("missing"), None);
    }

    #[test]
    fn matrix_params_are_stripped_from_the_path() {
        let req = Request::builder().uri("/cars;color=red/models;year=2016;used").build();
        assert_eq!(req.path(), "/cars/models");
        assert_eq!(req.matrix("year"), Some("2016"));
        assert_eq!(req.matrix("used"), Some(""));
        assert_eq!(req.matrix("color"), None);
    }

    #[test]
    fn headers_are_case_insensitive() {
        let req = Request::builder().header("X-Trace", "abc").build();
        assert_eq!(req.header("x-trace"), Some("abc"));
    }

    #[test]
    fn cookies_from_every_cookie_header() {
        let req = Request::builder()
            .header("cookie", "a=1; session=\"xyz\"")
            .header("cookie", "theme=dark")
            .build();
        assert_eq!(req.cookie("session"), Some("xyz"));
        assert_eq!(req.cookie("theme"), Some("dark"));
        assert_eq!(req.cookie("nope"), None);
    }

    #[test]
    fn from_http_picks_up_security_extension() {
        let ctx: Arc<dyn SecurityContext> = Arc::new(Authenticated::new("alice"));
        let mut http_req = http::Request::builder()
            .method("DELETE")
            .uri("http://example.com/users/1?force=true")
            .body(Full::new(Bytes::new()))
            .unwrap();
        http_req.extensions_mut().insert(ctx);

        let req = Request::from_http(http_req);
        assert_eq!(req.method(), "DELETE");
        assert_eq!(req.path(), "/users/1");
        assert_eq!(req.query("force"), Some("true"));
        assert_eq!(req.security().principal().map(|p| p.name()), Some("alice"));
    }

    #[tokio::test]
    async fn take_body_leaves_an_empty_stream() {
        let mut req = Request::builder().body("payload").build();
        let first = req.take_body().collect().await.unwrap().to_bytes();
        let second = req.take_body().collect().await.unwrap().to_bytes();
        assert_eq!(&first[..], b"payload");
        assert!(second.is_empty());
    }
}
