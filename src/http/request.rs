//! Request heads parsed off the wire with [`httparse`], or built in-process.

use bytes::Bytes;
use thiserror::Error;

use super::{Headers, Method};

#[derive(Debug, Error)]
pub enum RequestError {
    /// The header block has not fully arrived yet.
    #[error("request head is incomplete")]
    Incomplete,

    #[error("malformed request: {0}")]
    Parse(#[from] httparse::Error),

    #[error("request line has no {0}")]
    MissingField(&'static str),

    #[error("invalid Content-Length `{0}`")]
    InvalidContentLength(String),
}

/// One request as a handler sees it.
///
/// The target is kept split into path and query: routing and the root-object
/// rewrite only ever look at the path, while cache keys, redirects and origin
/// URLs use the whole [`target`](Self::target).
///
/// ```
/// use dynhtml::http::request::Request;
///
/// let raw = b"GET /html?lang=en HTTP/1.1\r\nHost: d111.cdn.test\r\n\r\n";
/// let (request, head_len) = Request::parse(raw).unwrap();
///
/// assert_eq!(head_len, raw.len());
/// assert_eq!(request.path(), "/html");
/// assert_eq!(request.query_string(), Some("lang=en"));
/// assert_eq!(request.host(), Some("d111.cdn.test"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query: Option<String>,
    // Minor version of HTTP/1.x.
    version: u8,
    headers: Headers,
    body: Bytes,
}

impl Request {
    const MAX_HEADERS: usize = 64;

    /// An HTTP/1.1 request with no headers and no body. A `?query` suffix on
    /// `target` is split off the path.
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = split_target(target);
        Self {
            method,
            path,
            query,
            version: 1,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Parses the request line and header block at the start of `buf`.
    ///
    /// Returns the request, with an empty body, and the length of the head.
    /// The caller owns framing: it waits for [`content_length`](Self::content_length)
    /// further bytes and attaches them with [`set_body`](Self::set_body), so
    /// bytes of a pipelined successor never leak into this request.
    ///
    /// Header values that are not valid UTF-8 are dropped. A `Content-Length`
    /// that is not a plain decimal number is rejected outright, since guessing
    /// at framing desynchronizes the connection.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut slots = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut head = httparse::Request::new(&mut slots);

        let httparse::Status::Complete(head_len) = head.parse(buf)? else {
            return Err(RequestError::Incomplete);
        };

        let method = head.method.ok_or(RequestError::MissingField("method"))?;
        let Ok(method) = method.parse::<Method>();
        let target = head.path.ok_or(RequestError::MissingField("target"))?;
        let version = head.version.ok_or(RequestError::MissingField("version"))?;

        let mut headers = Headers::with_capacity(head.headers.len());
        for field in head.headers.iter() {
            if let Ok(value) = std::str::from_utf8(field.value) {
                headers.insert(field.name, value);
            }
        }
        if let Some(length) = headers.get("content-length") {
            if length.trim().parse::<usize>().is_err() {
                return Err(RequestError::InvalidContentLength(length.to_owned()));
            }
        }

        let (path, query) = split_target(target);
        let request = Self {
            method,
            path,
            query,
            version,
            headers,
            body: Bytes::new(),
        };
        Ok((request, head_len))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    /// The path without its query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Rewrites the path; the query string is kept.
    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }

    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// The request target as it would appear on a request line.
    pub fn target(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{query}", self.path),
            None => self.path.clone(),
        }
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn host(&self) -> Option<&str> {
        self.headers.get("host").map(str::trim).filter(|h| !h.is_empty())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn set_body(&mut self, body: Bytes) {
        self.body = body;
    }

    /// HTTP/1.1 stays open unless told `close`; HTTP/1.0 closes unless told
    /// `keep-alive`.
    pub fn is_keep_alive(&self) -> bool {
        let tokens = || {
            self.headers
                .get_all("connection")
                .flat_map(|v| v.split(','))
                .map(str::trim)
        };
        if self.version >= 1 {
            !tokens().any(|t| t.eq_ignore_ascii_case("close"))
        } else {
            tokens().any(|t| t.eq_ignore_ascii_case("keep-alive"))
        }
    }

    /// Declared body length; absent means no body.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.trim().parse().ok()
    }
}

fn split_target(target: &str) -> (String, Option<String>) {
    match target.split_once('?') {
        Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
        None => (target.to_owned(), None),
    }
}
