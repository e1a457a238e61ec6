//! Exact-path routing for the API tier.
//!
//! | lookup                          | outcome                                    |
//! |---------------------------------|--------------------------------------------|
//! | path known, method registered   | [`Resolution::Matched`]                    |
//! | path known, method not          | [`Resolution::MethodNotAllowed`] + methods |
//! | path unknown                    | [`Resolution::NotFound`]                   |
//!
//! `/html`, `/html/` and `/HTML` are three different paths. The query string
//! plays no part in matching.

use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::{Method, Response};

/// A boxed async handler, shareable across connection tasks.
pub type Handler =
    Arc<dyn Fn(Context) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

pub enum Resolution<'a> {
    Matched(&'a Handler),
    /// Registered methods for the path, in registration order.
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

/// Routes grouped by path. Registering a method twice on one path keeps the
/// first handler.
///
/// ```
/// use dynhtml::{Method, Response, Router, StatusCode};
///
/// let mut router = Router::new();
/// router.get("/html", |_ctx| async { Response::new(StatusCode::Ok) });
/// router.on(Method::Options, "/html", |_ctx| async { Response::new(StatusCode::NoContent) });
/// assert_eq!(router.len(), 2);
/// ```
#[derive(Default)]
pub struct Router {
    paths: Vec<(String, Vec<(Method, Handler)>)>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<H, F>(&mut self, path: &str, handler: H)
    where
        H: Fn(Context) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        self.on(Method::Get, path, handler);
    }

    /// Registers `handler` for `method` on `path`.
    pub fn on<H, F>(&mut self, method: Method, path: &str, handler: H)
    where
        H: Fn(Context) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        let boxed: Handler = Arc::new(move |ctx| -> Pin<Box<dyn Future<Output = Response> + Send>> {
            Box::pin(handler(ctx))
        });

        let index = match self.paths.iter().position(|(p, _)| p == path) {
            Some(index) => index,
            None => {
                self.paths.push((path.to_owned(), Vec::new()));
                self.paths.len() - 1
            }
        };
        let methods = &mut self.paths[index].1;
        if methods.iter().any(|(m, _)| *m == method) {
            tracing::warn!(%method, path, "duplicate route ignored");
            return;
        }
        methods.push((method, boxed));
    }

    /// Number of (method, path) pairs registered.
    pub fn len(&self) -> usize {
        self.paths.iter().map(|(_, methods)| methods.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Looks a request up without running anything.
    pub fn resolve(&self, method: &Method, path: &str) -> Resolution<'_> {
        let Some((_, methods)) = self.paths.iter().find(|(p, _)| p == path) else {
            return Resolution::NotFound;
        };
        match methods.iter().find(|(m, _)| m == method) {
            Some((_, handler)) => Resolution::Matched(handler),
            None => Resolution::MethodNotAllowed(methods.iter().map(|(m, _)| m.clone()).collect()),
        }
    }
}

/// `Allow` header value for `methods`, e.g. `GET, HEAD`.
pub fn allow_header(methods: &[Method]) -> String {
    methods
        .iter()
        .map(Method::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Request, StatusCode};

    fn ok(_ctx: Context) -> impl Future<Output = Response> {
        async { Response::new(StatusCode::Ok) }
    }

    fn html_router() -> Router {
        let mut router = Router::new();
        router.get("/html", ok);
        router
    }

    fn allowed(resolution: Resolution<'_>) -> Option<String> {
        match resolution {
            Resolution::MethodNotAllowed(methods) => Some(allow_header(&methods)),
            _ => None,
        }
    }

    #[test]
    fn empty_router_finds_nothing() {
        let router = Router::new();
        assert!(router.is_empty());
        assert!(matches!(
            router.resolve(&Method::Get, "/"),
            Resolution::NotFound
        ));
    }

    #[tokio::test]
    async fn get_html_runs_its_handler() {
        let router = html_router();
        let request = Request::new(Method::Get, "/html?lang=en");
        let Resolution::Matched(handler) = router.resolve(request.method(), request.path()) else {
            panic!("GET /html did not match");
        };
        let res = handler(Context::new(request)).await;
        assert_eq!(res.status(), StatusCode::Ok);
    }

    #[test]
    fn other_methods_list_what_is_allowed() {
        let router = html_router();
        for method in [Method::Post, Method::Head, Method::Delete] {
            let found = allowed(router.resolve(&method, "/html"));
            assert_eq!(found.as_deref(), Some("GET"), "{method}");
        }
    }

    #[test]
    fn near_miss_paths_are_not_found() {
        let router = html_router();
        for path in ["/html/", "/HTML", "/html/x", "/", "/htm"] {
            assert!(
                matches!(router.resolve(&Method::Get, path), Resolution::NotFound),
                "{path}"
            );
        }
    }

    #[tokio::test]
    async fn duplicate_registration_keeps_the_first() {
        let mut router = html_router();
        router.get("/html", |_ctx| async { Response::new(StatusCode::Accepted) });
        router.on(Method::Head, "/html", ok);
        assert_eq!(router.len(), 2);

        let Resolution::Matched(handler) = router.resolve(&Method::Get, "/html") else {
            panic!("GET /html did not match");
        };
        let res = handler(Context::new(Request::new(Method::Get, "/html"))).await;
        assert_eq!(res.status(), StatusCode::Ok);
        let found = allowed(router.resolve(&Method::Put, "/html"));
        assert_eq!(found.as_deref(), Some("GET, HEAD"));
    }
}
