//! The API endpoint: `GET /html`.
//!
//! Each request performs exactly one read of the configuration store, renders the
//! value, and answers `200` with `Content-Type: text/html`. Requests for any other
//! path or method are answered by the router before the store is touched.

use std::sync::Arc;
use std::time::Duration;

use crate::context::Context;
use crate::error::ServiceError;
use crate::middleware::{CatchPanicMiddleware, LoggerMiddleware, Pipeline};
use crate::render::render;
use crate::router::{Resolution, Router};
use crate::store::{ConfigurationStore, DEFAULT_PARAMETER_NAME};
use crate::{Method, Request, Response, StatusCode};

/// The single resource this endpoint serves.
pub const HTML_PATH: &str = "/html";

/// Default bound on the configuration read.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(3);

/// Tunables for [`ApiEndpoint`].
#[derive(Debug, Clone)]
pub struct EndpointSettings {
    /// Name of the store entry to render.
    pub parameter_name: String,
    /// `Cache-Control` value attached to successful responses. `None` sends no
    /// directive and leaves freshness to the edge's defaults.
    pub cache_control: Option<String>,
    /// Upper bound on the store read; a read that takes longer counts as the store
    /// being unreachable.
    pub store_timeout: Duration,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            parameter_name: DEFAULT_PARAMETER_NAME.to_owned(),
            cache_control: None,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }
}

// Shared by the endpoint and its route handler.
struct Inner {
    store: Arc<dyn ConfigurationStore>,
    settings: EndpointSettings,
}

impl Inner {
    async fn render_current(&self) -> Result<Response, ServiceError> {
        let name = self.settings.parameter_name.as_str();
        let value = match tokio::time::timeout(self.settings.store_timeout, self.store.get(name))
            .await
        {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => return Err(ServiceError::from_store(name, e)),
            Err(_) => {
                return Err(ServiceError::from_store(
                    name,
                    crate::store::StoreError::Unreachable {
                        reason: format!("no answer within {:?}", self.settings.store_timeout),
                    },
                ));
            }
        };

        let document = render(&value);
        tracing::debug!(parameter = %name, bytes = document.as_str().len(), "rendered document");

        let mut response =
            Response::new(StatusCode::Ok).header("Content-Type", document.content_type());
        if let Some(cache_control) = &self.settings.cache_control {
            response.add_header("Cache-Control", cache_control.as_str());
        }
        Ok(response.body(document.into_string()))
    }
}

/// Stateless request handler for the HTML resource.
///
/// Cloning is cheap; every clone shares the same store.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use dynhtml::endpoint::{ApiEndpoint, EndpointSettings};
/// use dynhtml::store::MemoryStore;
/// use dynhtml::{Method, StatusCode};
///
/// # async fn demo() {
/// let endpoint = ApiEndpoint::new(Arc::new(MemoryStore::seeded()), EndpointSettings::default());
/// let response = endpoint.handle(&Method::Get, "/html").await;
/// assert_eq!(response.status(), StatusCode::Ok);
/// # }
/// ```
#[derive(Clone)]
pub struct ApiEndpoint {
    router: Arc<Router>,
}

impl ApiEndpoint {
    pub fn new(store: Arc<dyn ConfigurationStore>, settings: EndpointSettings) -> Self {
        let inner = Arc::new(Inner { store, settings });

        let mut router = Router::new();
        router.get(HTML_PATH, move |_ctx: Context| {
            let inner = Arc::clone(&inner);
            async move {
                match inner.render_current().await {
                    Ok(response) => response,
                    Err(e) => e.into_response(),
                }
            }
        });

        Self {
            router: Arc::new(router),
        }
    }

    /// The endpoint wrapped for a listener: request logging, and a panic in the
    /// handler answered as `500` instead of a dropped connection.
    pub fn pipeline(&self) -> Pipeline {
        let endpoint = self.clone();
        Pipeline::new()
            .with(Arc::new(LoggerMiddleware))
            .with(Arc::new(CatchPanicMiddleware))
            .terminal(move |ctx: Context| {
                let endpoint = endpoint.clone();
                async move { endpoint.handle_request(ctx.into_request()).await }
            })
    }

    /// Handles `method` on `path`.
    pub async fn handle(&self, method: &Method, path: &str) -> Response {
        self.handle_request(Request::new(method.clone(), path)).await
    }

    /// Handles a full request; only its method and path are consulted.
    pub async fn handle_request(&self, request: Request) -> Response {
        match self.router.resolve(request.method(), request.path()) {
            Resolution::Matched(handler) => handler(Context::new(request)).await,
            Resolution::MethodNotAllowed(allowed) => ServiceError::MethodNotAllowed {
                method: request.method().clone(),
                allowed,
            }
            .into_response(),
            Resolution::NotFound => ServiceError::NotFound {
                path: request.path().to_owned(),
            }
            .into_response(),
        }
    }
}
