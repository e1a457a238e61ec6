//! Ordered request pipelines.
//!
//! A [`Pipeline`] is a list of stages. Each stage gets the request [`Context`]
//! and a [`Next`] for the rest of the list; it can answer on its own, or call
//! `next.run(ctx)` and adjust what comes back. The edge is nothing but a pipeline:
//! protocol policy, method filter, cache, then the origin call.

use std::{any::Any, panic::AssertUnwindSafe, pin::Pin, sync::Arc};

use futures::FutureExt;
use tokio::time::Instant;

use crate::error::ServiceError;
use crate::{Request, Response, context::Context};

/// The stages after the current one.
///
/// Consumed by [`run`](Self::run), so a stage can call downstream at most once.
pub struct Next {
    middlewares: Arc<[MiddlewareHandler]>,
    index: usize,
}

/// One stage, boxed.
pub type MiddlewareHandler = Arc<
    dyn Fn(Context, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static,
>;

pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

impl Next {
    pub fn new(middlewares: impl Into<Arc<[MiddlewareHandler]>>) -> Self {
        Self {
            middlewares: middlewares.into(),
            index: 0,
        }
    }

    /// Runs the following stage. Falling off the end of the list is a wiring
    /// bug and answers 500.
    pub async fn run(mut self, ctx: Context) -> Response {
        let Some(stage) = self.middlewares.get(self.index).cloned() else {
            return ServiceError::Internal("pipeline ended without a response".to_owned())
                .into_response();
        };
        self.index += 1;
        stage(ctx, self).await
    }
}

/// A pipeline stage.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

/// An ordered middleware stack.
///
/// The last stage is expected to produce a response without calling `next`.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use dynhtml::middleware::{LoggerMiddleware, Pipeline};
/// use dynhtml::{Response, StatusCode};
///
/// let pipeline = Pipeline::new()
///     .with(Arc::new(LoggerMiddleware))
///     .terminal(|_ctx| async { Response::new(StatusCode::Ok) });
/// ```
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<MiddlewareHandler>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware stage.
    #[must_use]
    pub fn with<M: Middleware + 'static>(mut self, middleware: Arc<M>) -> Self {
        self.stages.push(from_middleware(middleware));
        self
    }

    /// Appends a final handler that never calls `next`.
    #[must_use]
    pub fn terminal<H, F>(mut self, handler: H) -> Self
    where
        H: Fn(Context) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        self.stages.push(Arc::new(
            move |ctx: Context, _next: Next| -> Pin<Box<dyn Future<Output = Response> + Send>> {
                Box::pin(handler(ctx))
            },
        ));
        self
    }

    /// Returns the number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Runs `request` through every stage.
    pub async fn run(&self, request: Request) -> Response {
        Next::new(self.stages.clone()).run(Context::new(request)).await
    }
}

/// One `info` event per request, after the response is known.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().clone();
            let target = ctx.request().target();

            let response = next.run(ctx).await;

            tracing::info!(
                %method,
                %target,
                status = response.status().as_u16(),
                elapsed = ?start.elapsed(),
                "request completed"
            );

            response
        })
    }
}

/// Answers 500 when a later stage panics, instead of dropping the connection.
pub struct CatchPanicMiddleware;

impl Middleware for CatchPanicMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin(async move {
            match AssertUnwindSafe(next.run(ctx)).catch_unwind().await {
                Ok(response) => response,
                Err(payload) => {
                    ServiceError::Internal(panic_message(payload.as_ref())).into_response()
                }
            }
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Method, StatusCode};

    struct AddHeader(&'static str);

    impl Middleware for AddHeader {
        fn handle(
            &self,
            ctx: Context,
            next: Next,
        ) -> Pin<Box<dyn Future<Output = Response> + Send>> {
            let tag = self.0;
            Box::pin(async move {
                let mut res = next.run(ctx).await;
                res.add_header("X-Stage", tag);
                res
            })
        }
    }

    struct ShortCircuit;

    impl Middleware for ShortCircuit {
        fn handle(
            &self,
            _ctx: Context,
            _next: Next,
        ) -> Pin<Box<dyn Future<Output = Response> + Send>> {
            Box::pin(async { Response::new(StatusCode::Forbidden) })
        }
    }

    async fn explode(_ctx: Context) -> Response {
        panic!("boom")
    }

    fn get(path: &str) -> Request {
        Request::new(Method::Get, path)
    }

    #[tokio::test]
    async fn empty_pipeline_returns_500() {
        let res = Pipeline::new().run(get("/")).await;
        assert_eq!(res.status(), StatusCode::InternalServerError);
    }

    #[tokio::test]
    async fn stages_run_in_order_and_decorate_on_the_way_out() {
        let pipeline = Pipeline::new()
            .with(Arc::new(AddHeader("outer")))
            .with(Arc::new(AddHeader("inner")))
            .terminal(|_ctx| async { Response::new(StatusCode::Ok) });
        assert_eq!(pipeline.len(), 3);

        let res = pipeline.run(get("/")).await;
        let stages: Vec<_> = res.headers().get_all("x-stage").collect();
        assert_eq!(stages, vec!["inner", "outer"]);
    }

    #[tokio::test]
    async fn short_circuit_skips_terminal() {
        let pipeline = Pipeline::new()
            .with(Arc::new(ShortCircuit))
            .terminal(explode);
        let res = pipeline.run(get("/")).await;
        assert_eq!(res.status(), StatusCode::Forbidden);
    }

    #[tokio::test]
    async fn catch_panic_yields_500() {
        let pipeline = Pipeline::new()
            .with(Arc::new(LoggerMiddleware))
            .with(Arc::new(CatchPanicMiddleware))
            .terminal(explode);
        let res = pipeline.run(get("/html")).await;
        assert_eq!(res.status(), StatusCode::InternalServerError);
        assert!(!res.body_text().unwrap().contains("boom"));
    }
}
