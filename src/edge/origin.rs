//! Origins the edge forwards cache misses to.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::endpoint::ApiEndpoint;
use crate::http::headers::is_hop_by_hop;
use crate::http::{Request, Response, StatusCode};

/// Default bound on a single origin round trip.
pub const DEFAULT_ORIGIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum OriginError {
    #[error("invalid origin url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("origin url `{url}` is not https")]
    InsecureScheme { url: String },

    #[error("origin transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("origin answered with unsupported status {0}")]
    UnsupportedStatus(u16),
}

/// Something that can answer a request the edge could not serve from cache.
#[async_trait]
pub trait Origin: Send + Sync {
    async fn fetch(&self, request: Request) -> Result<Response, OriginError>;
}

/// Calls the [`ApiEndpoint`] in-process, for a single binary running both tiers.
#[derive(Clone)]
pub struct LocalOrigin {
    endpoint: ApiEndpoint,
}

impl LocalOrigin {
    pub fn new(endpoint: ApiEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl Origin for LocalOrigin {
    async fn fetch(&self, request: Request) -> Result<Response, OriginError> {
        Ok(self.endpoint.handle_request(request).await)
    }
}

/// Which schemes an [`HttpOrigin`] may use to reach its upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OriginProtocolPolicy {
    #[default]
    HttpsOnly,
    /// Permits plain `http://` upstreams; meant for loopback and tests.
    AllowHttp,
}

impl FromStr for OriginProtocolPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "https-only" => Ok(Self::HttpsOnly),
            "allow-http" => Ok(Self::AllowHttp),
            other => Err(format!("unknown origin protocol policy `{other}`")),
        }
    }
}

/// Forwards requests to a remote API over HTTP(S).
///
/// The request target is appended to `base_url`, so a base of
/// `https://api.example.com/prod` turns `/html?x=1` into
/// `https://api.example.com/prod/html?x=1`. Nothing is retried.
pub struct HttpOrigin {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOrigin {
    pub fn new(
        base_url: &str,
        policy: OriginProtocolPolicy,
        timeout: Duration,
    ) -> Result<Self, OriginError> {
        let parsed = reqwest::Url::parse(base_url).map_err(|e| OriginError::InvalidUrl {
            url: base_url.to_owned(),
            reason: e.to_string(),
        })?;

        match (parsed.scheme(), policy) {
            ("https", _) | ("http", OriginProtocolPolicy::AllowHttp) => {}
            ("http", OriginProtocolPolicy::HttpsOnly) => {
                return Err(OriginError::InsecureScheme {
                    url: base_url.to_owned(),
                });
            }
            (other, _) => {
                return Err(OriginError::InvalidUrl {
                    url: base_url.to_owned(),
                    reason: format!("unsupported scheme `{other}`"),
                });
            }
        }

        let client = reqwest::Client::builder()
            .https_only(policy == OriginProtocolPolicy::HttpsOnly)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, request: &Request) -> String {
        format!("{}{}", self.base_url, request.target())
    }
}

#[async_trait]
impl Origin for HttpOrigin {
    async fn fetch(&self, request: Request) -> Result<Response, OriginError> {
        let url = self.url_for(&request);
        let method = reqwest::Method::from_bytes(request.method().as_str().as_bytes()).map_err(
            |e| OriginError::InvalidUrl {
                url: url.clone(),
                reason: e.to_string(),
            },
        )?;

        let mut upstream = self.client.request(method, &url);
        for (name, value) in request.headers().end_to_end() {
            if !recomputed(name) {
                upstream = upstream.header(name, value);
            }
        }
        if !request.body().is_empty() {
            upstream = upstream.body(request.body().clone());
        }

        let reply = upstream.send().await?;
        let code = reply.status().as_u16();
        let status = StatusCode::from_u16(code).ok_or(OriginError::UnsupportedStatus(code))?;

        let mut response = Response::new(status);
        for (name, value) in reply.headers() {
            let name = name.as_str();
            if is_hop_by_hop(name) || recomputed(name) {
                continue;
            }
            match value.to_str() {
                Ok(value) => response.add_header(name, value),
                Err(_) => tracing::debug!(header = %name, "dropping non-ascii origin header"),
            }
        }

        let body = reply.bytes().await?;
        tracing::debug!(url = %url, status = code, bytes = body.len(), "origin fetch");
        Ok(response.body_bytes(body.to_vec()))
    }
}

// Rewritten for the next hop by whoever serializes it.
fn recomputed(name: &str) -> bool {
    name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("content-length")
}
