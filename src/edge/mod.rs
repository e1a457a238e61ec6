//! The edge tier: viewer policy, caching, and forwarding to the origin.
//!
//! An [`Edge`] is a [`Pipeline`] assembled in a fixed order:
//!
//! ```text
//! Logger -> CatchPanic -> ViewerProtocol -> AllowedMethods -> EdgeCache -> ForwardToOrigin
//! ```
//!
//! Requests rejected by the policy stages never reach the cache, and requests
//! answered from the cache never reach the origin.

pub mod origin;

use std::pin::Pin;
use std::sync::Arc;

use tokio::time::Instant;

use crate::cache::{CacheKey, CachePolicy, Freshness, ResponseStore};
use crate::context::Context;
use crate::error::ServiceError;
use crate::middleware::{CatchPanicMiddleware, LoggerMiddleware, Middleware, Next, Pipeline};
use crate::security::{
    AllowedMethods, AllowedMethodsMiddleware, ViewerProtocolMiddleware, ViewerProtocolPolicy,
    ViewerScheme,
};
use crate::{Method, Request, Response};

pub use origin::{
    DEFAULT_ORIGIN_TIMEOUT, HttpOrigin, LocalOrigin, Origin, OriginError, OriginProtocolPolicy,
};

/// Path segment served for requests to `/`.
pub const DEFAULT_ROOT_OBJECT: &str = "html";

/// Header reporting whether the edge answered from storage.
pub const X_CACHE: &str = "X-Cache";

#[derive(Debug, Clone)]
pub struct EdgeSettings {
    pub viewer_protocol: ViewerProtocolPolicy,
    /// Scheme assumed when the request carries no `X-Forwarded-Proto`.
    pub listener_scheme: ViewerScheme,
    pub allowed_methods: AllowedMethods,
    /// `/` is rewritten to `/{root}`; `None` forwards `/` untouched.
    pub default_root_object: Option<String>,
    pub cache: CachePolicy,
}

impl Default for EdgeSettings {
    fn default() -> Self {
        Self {
            viewer_protocol: ViewerProtocolPolicy::default(),
            listener_scheme: ViewerScheme::Http,
            allowed_methods: AllowedMethods::default(),
            default_root_object: Some(DEFAULT_ROOT_OBJECT.to_owned()),
            cache: CachePolicy::default(),
        }
    }
}

/// A configured edge, ready to handle viewer requests.
///
/// Cloning is cheap; clones share one pipeline and so one response store.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use dynhtml::edge::{Edge, EdgeSettings, LocalOrigin};
/// use dynhtml::endpoint::{ApiEndpoint, EndpointSettings};
/// use dynhtml::store::MemoryStore;
/// use dynhtml::{Method, Request};
///
/// # async fn demo() {
/// let endpoint = ApiEndpoint::new(Arc::new(MemoryStore::seeded()), EndpointSettings::default());
/// let edge = Edge::new(Arc::new(LocalOrigin::new(endpoint)), EdgeSettings::default());
///
/// let request = Request::new(Method::Get, "/")
///     .with_header("Host", "d111.cdn.test")
///     .with_header("X-Forwarded-Proto", "https");
/// let response = edge.handle(request).await;
/// # }
/// ```
#[derive(Clone)]
pub struct Edge {
    pipeline: Pipeline,
}

impl Edge {
    pub fn new(origin: Arc<dyn Origin>, settings: EdgeSettings) -> Self {
        let store = ResponseStore::new(settings.cache.capacity);

        let viewer = ViewerProtocolMiddleware::new(settings.viewer_protocol)
            .listener_scheme(settings.listener_scheme);
        let cache = EdgeCacheMiddleware::new(settings.cache, store)
            .default_root_object(settings.default_root_object);

        let pipeline = Pipeline::new()
            .with(Arc::new(LoggerMiddleware))
            .with(Arc::new(CatchPanicMiddleware))
            .with(Arc::new(viewer))
            .with(Arc::new(AllowedMethodsMiddleware::new(settings.allowed_methods)))
            .with(Arc::new(cache))
            .with(Arc::new(ForwardToOrigin::new(origin)));

        Self { pipeline }
    }

    pub async fn handle(&self, request: Request) -> Response {
        self.pipeline.run(request).await
    }
}

/// Serves `GET`/`HEAD` from the [`ResponseStore`] and fills it on a miss.
///
/// `HEAD` shares the `GET` entry. A `HEAD` miss is fetched as `GET` so the full
/// representation can be stored, and the body is stripped on the way out.
pub struct EdgeCacheMiddleware {
    policy: Arc<CachePolicy>,
    store: ResponseStore,
    default_root_object: Option<String>,
}

impl EdgeCacheMiddleware {
    pub fn new(policy: CachePolicy, store: ResponseStore) -> Self {
        Self {
            policy: Arc::new(policy),
            store,
            default_root_object: Some(DEFAULT_ROOT_OBJECT.to_owned()),
        }
    }

    /// Sets the object served for `/`; `None` disables the rewrite.
    #[must_use]
    pub fn default_root_object(mut self, root: Option<String>) -> Self {
        self.default_root_object = root;
        self
    }
}

impl Middleware for EdgeCacheMiddleware {
    fn handle(
        &self,
        mut ctx: Context,
        next: Next,
    ) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        if let Some(root) = &self.default_root_object {
            if ctx.request().path() == "/" {
                ctx.request_mut().set_path(format!("/{root}"));
            }
        }

        let policy = Arc::clone(&self.policy);
        let store = self.store.clone();

        Box::pin(async move {
            let method = ctx.request().method().clone();
            if !method.is_cacheable() {
                return next.run(ctx).await;
            }
            let is_head = method == Method::Head;
            let key = CacheKey::for_request(ctx.request(), &policy.vary_headers);

            if let Some(entry) = store.get(&key).await {
                tracing::debug!(key = %key.as_str(), "edge hit");
                let mut response = entry.response().clone();
                response.set_header(X_CACHE, "Hit from edge");
                response.set_header("Age", entry.age(Instant::now()).to_string());
                return if is_head { response.without_body() } else { response };
            }

            if is_head {
                ctx.request_mut().set_method(Method::Get);
            }
            let mut response = next.run(ctx).await;

            match policy.freshness(&response) {
                Freshness::Store(ttl) => {
                    tracing::debug!(key = %key.as_str(), ttl = ?ttl, "edge store");
                    store.insert(key, response.clone(), ttl).await;
                }
                Freshness::Bypass(reason) => {
                    tracing::debug!(key = %key.as_str(), reason, "edge bypass");
                }
            }

            response.set_header(X_CACHE, "Miss from edge");
            if is_head { response.without_body() } else { response }
        })
    }
}

/// Terminal stage: hands the request to the [`Origin`].
///
/// Origin failures surface as `502`; nothing is retried.
pub struct ForwardToOrigin {
    origin: Arc<dyn Origin>,
}

impl ForwardToOrigin {
    pub fn new(origin: Arc<dyn Origin>) -> Self {
        Self { origin }
    }
}

impl Middleware for ForwardToOrigin {
    fn handle(&self, ctx: Context, _next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let origin = Arc::clone(&self.origin);
        Box::pin(async move {
            match origin.fetch(ctx.into_request()).await {
                Ok(response) => response,
                Err(e) => ServiceError::Origin(e.to_string()).into_response(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{ApiEndpoint, EndpointSettings};
    use crate::store::{DEFAULT_PARAMETER_NAME, MemoryStore};
    use crate::StatusCode;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Origin double that records what it was asked for.
    struct RecordingOrigin {
        seen: Mutex<Vec<(Method, String)>>,
        cache_control: Option<&'static str>,
    }

    impl RecordingOrigin {
        fn new(cache_control: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                cache_control,
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }

        fn last(&self) -> (Method, String) {
            self.seen.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl Origin for RecordingOrigin {
        async fn fetch(&self, request: Request) -> Result<Response, OriginError> {
            let n = {
                let mut seen = self.seen.lock().unwrap();
                seen.push((request.method().clone(), request.target()));
                seen.len()
            };
            let mut response = Response::new(StatusCode::Ok)
                .header("Content-Type", "text/html; charset=utf-8")
                .body(format!("<h1>render {n}</h1>"));
            if let Some(cc) = self.cache_control {
                response.add_header("Cache-Control", cc);
            }
            Ok(response)
        }
    }

    struct DownOrigin;

    #[async_trait]
    impl Origin for DownOrigin {
        async fn fetch(&self, _request: Request) -> Result<Response, OriginError> {
            Err(OriginError::UnsupportedStatus(599))
        }
    }

    struct PanickingOrigin;

    #[async_trait]
    impl Origin for PanickingOrigin {
        async fn fetch(&self, _request: Request) -> Result<Response, OriginError> {
            panic!("origin exploded")
        }
    }

    fn caching(ttl_secs: u64) -> EdgeSettings {
        EdgeSettings {
            cache: CachePolicy {
                default_ttl: Duration::from_secs(ttl_secs),
                ..CachePolicy::default()
            },
            ..EdgeSettings::default()
        }
    }

    fn viewer(method: Method, target: &str) -> Request {
        Request::new(method, target)
            .with_header("Host", "d111.cdn.test")
            .with_header("X-Forwarded-Proto", "https")
    }

    fn x_cache(res: &Response) -> &str {
        res.headers().get("x-cache").unwrap_or("")
    }

    #[tokio::test]
    async fn root_is_served_from_the_html_route() {
        let origin = RecordingOrigin::new(None);
        let edge = Edge::new(origin.clone(), EdgeSettings::default());
        let res = edge.handle(viewer(Method::Get, "/")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(origin.last(), (Method::Get, "/html".to_owned()));
    }

    #[tokio::test]
    async fn without_a_ttl_every_request_reaches_the_origin() {
        let origin = RecordingOrigin::new(None);
        let edge = Edge::new(origin.clone(), EdgeSettings::default());
        for _ in 0..3 {
            let res = edge.handle(viewer(Method::Get, "/")).await;
            assert_eq!(x_cache(&res), "Miss from edge");
        }
        assert_eq!(origin.calls(), 3);
    }

    #[tokio::test]
    async fn default_ttl_serves_repeat_requests_from_cache() {
        let origin = RecordingOrigin::new(None);
        let edge = Edge::new(origin.clone(), caching(60));

        let first = edge.handle(viewer(Method::Get, "/")).await;
        let second = edge.handle(viewer(Method::Get, "/html")).await;

        assert_eq!(x_cache(&first), "Miss from edge");
        assert_eq!(x_cache(&second), "Hit from edge");
        assert_eq!(second.headers().get("age"), Some("0"));
        assert_eq!(first.body_slice(), second.body_slice());
        assert_eq!(origin.calls(), 1);
    }

    #[tokio::test]
    async fn origin_max_age_enables_caching() {
        let origin = RecordingOrigin::new(Some("max-age=30"));
        let edge = Edge::new(origin.clone(), EdgeSettings::default());
        edge.handle(viewer(Method::Get, "/")).await;
        let res = edge.handle(viewer(Method::Get, "/")).await;
        assert_eq!(x_cache(&res), "Hit from edge");
        assert_eq!(origin.calls(), 1);
    }

    #[tokio::test]
    async fn origin_no_store_wins_over_default_ttl() {
        let origin = RecordingOrigin::new(Some("no-store"));
        let edge = Edge::new(origin.clone(), caching(60));
        edge.handle(viewer(Method::Get, "/")).await;
        edge.handle(viewer(Method::Get, "/")).await;
        assert_eq!(origin.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire() {
        let origin = RecordingOrigin::new(None);
        let edge = Edge::new(origin.clone(), caching(60));

        edge.handle(viewer(Method::Get, "/")).await;
        tokio::time::advance(Duration::from_secs(59)).await;
        let res = edge.handle(viewer(Method::Get, "/")).await;
        assert_eq!(res.headers().get("age"), Some("59"));

        tokio::time::advance(Duration::from_secs(1)).await;
        let res = edge.handle(viewer(Method::Get, "/")).await;
        assert_eq!(x_cache(&res), "Miss from edge");
        assert_eq!(origin.calls(), 2);
    }

    #[tokio::test]
    async fn head_miss_is_fetched_as_get_and_shares_the_entry() {
        let origin = RecordingOrigin::new(None);
        let edge = Edge::new(origin.clone(), caching(60));

        let head = edge.handle(viewer(Method::Head, "/")).await;
        assert_eq!(origin.last().0, Method::Get);
        let wire = String::from_utf8(head.into_bytes().to_vec()).unwrap();
        assert!(wire.ends_with("\r\n\r\n"));
        assert!(wire.contains("Content-Length: 17\r\n"));

        let get = edge.handle(viewer(Method::Get, "/")).await;
        assert_eq!(x_cache(&get), "Hit from edge");
        assert_eq!(get.body_text(), Some("<h1>render 1</h1>"));
        assert_eq!(origin.calls(), 1);
    }

    #[tokio::test]
    async fn query_strings_are_distinct_entries() {
        let origin = RecordingOrigin::new(None);
        let edge = Edge::new(origin.clone(), caching(60));
        edge.handle(viewer(Method::Get, "/html?a=1")).await;
        edge.handle(viewer(Method::Get, "/html?a=2")).await;
        edge.handle(viewer(Method::Get, "/html?a=1")).await;
        assert_eq!(origin.calls(), 2);
        assert_eq!(origin.last().1, "/html?a=2");
    }

    #[tokio::test]
    async fn rejected_methods_never_reach_the_origin() {
        let origin = RecordingOrigin::new(None);
        let edge = Edge::new(origin.clone(), caching(60));
        for method in [Method::Post, Method::Put, Method::Delete, Method::Patch] {
            let res = edge.handle(viewer(method, "/html")).await;
            assert_eq!(res.status(), StatusCode::MethodNotAllowed);
        }
        assert_eq!(origin.calls(), 0);
    }

    #[tokio::test]
    async fn plaintext_viewers_are_redirected_before_the_cache() {
        let origin = RecordingOrigin::new(None);
        let edge = Edge::new(origin.clone(), caching(60));
        let req = Request::new(Method::Get, "/").with_header("Host", "d111.cdn.test");
        let res = edge.handle(req).await;
        assert_eq!(res.status(), StatusCode::MovedPermanently);
        assert_eq!(res.headers().get("location"), Some("https://d111.cdn.test/"));
        assert_eq!(origin.calls(), 0);
    }

    #[tokio::test]
    async fn origin_failure_is_502_and_not_cached() {
        let edge = Edge::new(Arc::new(DownOrigin), caching(60));
        let res = edge.handle(viewer(Method::Get, "/")).await;
        assert_eq!(res.status(), StatusCode::BadGateway);
        assert_eq!(x_cache(&res), "Miss from edge");
    }

    #[tokio::test]
    async fn origin_panic_is_500() {
        let edge = Edge::new(Arc::new(PanickingOrigin), EdgeSettings::default());
        let res = edge.handle(viewer(Method::Get, "/")).await;
        assert_eq!(res.status(), StatusCode::InternalServerError);
    }

    #[tokio::test(start_paused = true)]
    async fn cached_value_is_stale_until_expiry() {
        let store = Arc::new(MemoryStore::seeded());
        let endpoint = ApiEndpoint::new(store.clone(), EndpointSettings::default());
        let edge = Edge::new(Arc::new(LocalOrigin::new(endpoint)), caching(10));

        let before = edge.handle(viewer(Method::Get, "/")).await;
        assert!(before.body_text().unwrap().contains("Initial Dynamic String"));

        store.set(DEFAULT_PARAMETER_NAME, "Changed").await;
        let stale = edge.handle(viewer(Method::Get, "/")).await;
        assert!(stale.body_text().unwrap().contains("Initial Dynamic String"));

        tokio::time::advance(Duration::from_secs(10)).await;
        let fresh = edge.handle(viewer(Method::Get, "/")).await;
        assert!(fresh.body_text().unwrap().contains("Changed"));
    }

    #[tokio::test]
    async fn local_origin_errors_pass_through() {
        let endpoint = ApiEndpoint::new(Arc::new(MemoryStore::new()), EndpointSettings::default());
        let edge = Edge::new(Arc::new(LocalOrigin::new(endpoint)), caching(60));
        let res = edge.handle(viewer(Method::Get, "/")).await;
        assert_eq!(res.status(), StatusCode::BadGateway);
        let res = edge.handle(viewer(Method::Get, "/missing")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_forces_a_refetch() {
        let origin = RecordingOrigin::new(None);
        let edge = Edge::new(origin.clone(), caching(60));
        edge.handle(viewer(Method::Get, "/")).await;

        tokio::time::advance(Duration::from_secs(59)).await;
        let hit = edge.handle(viewer(Method::Get, "/")).await;
        assert_eq!(hit.headers().get(X_CACHE), Some("Hit from edge"));
        assert_eq!(origin.calls(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        let miss = edge.handle(viewer(Method::Get, "/")).await;
        assert_eq!(miss.headers().get(X_CACHE), Some("Miss from edge"));
        assert_eq!(origin.calls(), 2);
    }
}
