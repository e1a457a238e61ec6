//! The HTTP/1.1 vocabulary shared by both tiers.
//!
//! Both listeners speak the same small dialect: [`Request`] in, [`Response`] out,
//! with [`Headers`] carried as an ordered multimap.

use std::fmt;
use std::str::FromStr;

pub mod headers;
pub mod request;
pub mod response;

pub use headers::Headers;
pub use request::Request;
pub use response::Response;

macro_rules! status_codes {
    ($($variant:ident = $code:literal => $reason:literal,)+) => {
        /// A response status this crate can produce or relay.
        ///
        /// Upstream statuses outside this table are refused by the edge rather
        /// than passed through with an invented reason phrase.
        ///
        /// ```
        /// use dynhtml::http::StatusCode;
        ///
        /// assert_eq!(StatusCode::from_u16(301), Some(StatusCode::MovedPermanently));
        /// assert_eq!(StatusCode::MovedPermanently.to_string(), "301 Moved Permanently");
        /// ```
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum StatusCode {
            $($variant = $code,)+
        }

        impl StatusCode {
            pub fn from_u16(code: u16) -> Option<Self> {
                match code {
                    $($code => Some(Self::$variant),)+
                    _ => None,
                }
            }

            pub fn canonical_reason(self) -> &'static str {
                match self {
                    $(Self::$variant => $reason,)+
                }
            }
        }
    };
}

status_codes! {
    Continue = 100 => "Continue",
    Ok = 200 => "OK",
    Created = 201 => "Created",
    Accepted = 202 => "Accepted",
    NoContent = 204 => "No Content",
    PartialContent = 206 => "Partial Content",
    MovedPermanently = 301 => "Moved Permanently",
    Found = 302 => "Found",
    SeeOther = 303 => "See Other",
    NotModified = 304 => "Not Modified",
    TemporaryRedirect = 307 => "Temporary Redirect",
    PermanentRedirect = 308 => "Permanent Redirect",
    BadRequest = 400 => "Bad Request",
    Unauthorized = 401 => "Unauthorized",
    Forbidden = 403 => "Forbidden",
    NotFound = 404 => "Not Found",
    MethodNotAllowed = 405 => "Method Not Allowed",
    Gone = 410 => "Gone",
    PayloadTooLarge = 413 => "Payload Too Large",
    UriTooLong = 414 => "URI Too Long",
    TooManyRequests = 429 => "Too Many Requests",
    InternalServerError = 500 => "Internal Server Error",
    NotImplemented = 501 => "Not Implemented",
    BadGateway = 502 => "Bad Gateway",
    ServiceUnavailable = 503 => "Service Unavailable",
    GatewayTimeout = 504 => "Gateway Timeout",
}

impl StatusCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.canonical_reason())
    }
}

/// Request method. Anything unrecognised is kept verbatim in `Custom` so the
/// method filters can name it in their logs before refusing it.
///
/// ```
/// use dynhtml::http::Method;
///
/// let method: Method = "HEAD".parse().unwrap();
/// assert!(method.is_cacheable());
/// assert_eq!(method.to_string(), "HEAD");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Connect,
    Trace,
    Custom(String),
}

impl Method {
    const KNOWN: [(Method, &'static str); 9] = [
        (Method::Get, "GET"),
        (Method::Head, "HEAD"),
        (Method::Post, "POST"),
        (Method::Put, "PUT"),
        (Method::Patch, "PATCH"),
        (Method::Delete, "DELETE"),
        (Method::Options, "OPTIONS"),
        (Method::Connect, "CONNECT"),
        (Method::Trace, "TRACE"),
    ];

    pub fn as_str(&self) -> &str {
        if let Self::Custom(token) = self {
            return token;
        }
        Self::KNOWN
            .iter()
            .find(|(m, _)| m == self)
            .map_or("", |(_, s)| s)
    }

    /// GET and HEAD: the only methods an edge may answer from storage.
    pub fn is_cacheable(&self) -> bool {
        matches!(self, Self::Get | Self::Head)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = std::convert::Infallible;

    /// Method tokens are case-sensitive: `get` is an extension method, not GET.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::KNOWN
            .into_iter()
            .find(|(_, token)| *token == s)
            .map_or_else(|| Self::Custom(s.to_owned()), |(m, _)| m))
    }
}
