//! Security middleware for the edge tier.
//!
//! - [`ViewerProtocolMiddleware`]: enforces HTTPS between clients and the edge,
//!   either by redirecting plaintext requests or by refusing them.
//! - [`AllowedMethodsMiddleware`]: refuses methods the distribution does not
//!   forward.

use std::pin::Pin;
use std::str::FromStr;

use crate::{
    Method, Response, StatusCode,
    context::Context,
    error::ServiceError,
    middleware::{Middleware, Next},
};

/// Scheme the client used to reach the edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerScheme {
    Http,
    Https,
}

impl FromStr for ViewerScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            other => Err(format!("unknown scheme `{other}`")),
        }
    }
}

/// How the edge treats plaintext viewer requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewerProtocolPolicy {
    /// Serve HTTP and HTTPS alike.
    AllowAll,
    /// Answer plaintext requests with `301` to the `https://` URL.
    #[default]
    RedirectToHttps,
    /// Answer plaintext requests with `403`.
    HttpsOnly,
}

impl FromStr for ViewerProtocolPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow-all" => Ok(Self::AllowAll),
            "redirect-to-https" => Ok(Self::RedirectToHttps),
            "https-only" => Ok(Self::HttpsOnly),
            other => Err(format!("unknown viewer protocol policy `{other}`")),
        }
    }
}

/// Enforces the [`ViewerProtocolPolicy`].
///
/// The edge listener speaks plaintext; TLS is terminated in front of it. The
/// viewer's scheme is therefore read from `X-Forwarded-Proto` and falls back to
/// `listener_scheme` when that header is absent or unparseable.
///
/// # Behavior
///
/// - HTTPS requests always pass through.
/// - Under [`RedirectToHttps`](ViewerProtocolPolicy::RedirectToHttps), an HTTP
///   request receives `301 Moved Permanently` with
///   `Location: https://{Host}{path}{?query}`. Without a `Host` header no URL can
///   be built and the request is answered `400`.
/// - Under [`HttpsOnly`](ViewerProtocolPolicy::HttpsOnly), an HTTP request
///   receives `403 Forbidden`.
///
/// # Examples
///
/// ```rust
/// use dynhtml::security::{ViewerProtocolMiddleware, ViewerProtocolPolicy, ViewerScheme};
///
/// let viewer = ViewerProtocolMiddleware::new(ViewerProtocolPolicy::RedirectToHttps)
///     .listener_scheme(ViewerScheme::Http);
/// ```
#[derive(Debug, Clone)]
pub struct ViewerProtocolMiddleware {
    policy: ViewerProtocolPolicy,
    listener_scheme: ViewerScheme,
}

impl ViewerProtocolMiddleware {
    /// Creates the middleware with a plaintext listener.
    pub fn new(policy: ViewerProtocolPolicy) -> Self {
        Self {
            policy,
            listener_scheme: ViewerScheme::Http,
        }
    }

    /// Sets the scheme assumed when `X-Forwarded-Proto` is missing.
    #[must_use]
    pub fn listener_scheme(mut self, scheme: ViewerScheme) -> Self {
        self.listener_scheme = scheme;
        self
    }

    fn viewer_scheme(&self, ctx: &Context) -> ViewerScheme {
        ctx.request()
            .headers()
            .first_token("x-forwarded-proto")
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.listener_scheme)
    }
}

impl Middleware for ViewerProtocolMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let scheme = self.viewer_scheme(&ctx);
        let policy = self.policy;

        Box::pin(async move {
            if scheme == ViewerScheme::Https || policy == ViewerProtocolPolicy::AllowAll {
                return next.run(ctx).await;
            }

            match policy {
                ViewerProtocolPolicy::HttpsOnly => {
                    tracing::debug!(path = %ctx.request().path(), "plaintext request refused");
                    Response::new(StatusCode::Forbidden).body("HTTPS required")
                }
                _ => {
                    let Some(host) = ctx.request().host() else {
                        return Response::new(StatusCode::BadRequest).body("Missing Host header");
                    };
                    let location = format!("https://{host}{}", ctx.request().target());
                    tracing::debug!(location = %location, "redirecting to https");
                    Response::new(StatusCode::MovedPermanently).header("Location", location)
                }
            }
        })
    }
}

/// Methods the edge forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllowedMethods {
    #[default]
    GetHead,
    GetHeadOptions,
}

impl AllowedMethods {
    pub fn methods(self) -> Vec<Method> {
        match self {
            Self::GetHead => vec![Method::Get, Method::Head],
            Self::GetHeadOptions => vec![Method::Get, Method::Head, Method::Options],
        }
    }

    pub fn permits(self, method: &Method) -> bool {
        self.methods().contains(method)
    }
}

impl FromStr for AllowedMethods {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "get-head" => Ok(Self::GetHead),
            "get-head-options" => Ok(Self::GetHeadOptions),
            other => Err(format!("unknown allowed-methods set `{other}`")),
        }
    }
}

/// Answers any method outside [`AllowedMethods`] with `405` and an `Allow` header.
/// Nothing downstream runs for such requests.
#[derive(Debug, Clone, Default)]
pub struct AllowedMethodsMiddleware {
    allowed: AllowedMethods,
}

impl AllowedMethodsMiddleware {
    pub fn new(allowed: AllowedMethods) -> Self {
        Self { allowed }
    }
}

impl Middleware for AllowedMethodsMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let allowed = self.allowed;
        Box::pin(async move {
            let method = ctx.request().method().clone();
            if allowed.permits(&method) {
                next.run(ctx).await
            } else {
                ServiceError::MethodNotAllowed {
                    method,
                    allowed: allowed.methods(),
                }
                .into_response()
            }
        })
    }
}
