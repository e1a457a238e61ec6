//! Request-level error taxonomy.
//!
//! Every failure is terminal for the request that hit it: nothing here retries,
//! and nothing here takes the process down. Errors are rendered as small HTML
//! pages since every client of this service expects HTML.

use maud::{DOCTYPE, html};
use thiserror::Error;

use crate::http::{Method, Response, StatusCode};
use crate::router::allow_header;
use crate::store::StoreError;

/// Failure of a single request.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The configuration entry is missing or the store could not be reached.
    #[error("configuration `{name}` unavailable: {source}")]
    ConfigurationUnavailable {
        name: String,
        #[source]
        source: StoreError,
    },

    /// No resource at this path.
    #[error("no route for {path}")]
    NotFound { path: String },

    /// The path exists but does not accept this method.
    #[error("method {method} not allowed")]
    MethodNotAllowed { method: Method, allowed: Vec<Method> },

    /// The edge could not obtain a response from its origin.
    #[error("origin request failed: {0}")]
    Origin(String),

    /// Anything unexpected while producing the response.
    #[error("internal fault: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Classifies a store failure: a missing entry or an unreachable store is a
    /// gateway problem, a store that answered with garbage is an internal fault.
    pub fn from_store(name: &str, source: StoreError) -> Self {
        match source {
            StoreError::Corrupt { .. } => Self::Internal(source.to_string()),
            source => Self::ConfigurationUnavailable {
                name: name.to_owned(),
                source,
            },
        }
    }

    /// HTTP status this error surfaces as.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::ConfigurationUnavailable { .. } | Self::Origin(_) => StatusCode::BadGateway,
            Self::NotFound { .. } => StatusCode::NotFound,
            Self::MethodNotAllowed { .. } => StatusCode::MethodNotAllowed,
            Self::Internal(_) => StatusCode::InternalServerError,
        }
    }

    /// Renders the error page. The underlying cause is logged, never sent.
    pub fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            Self::ConfigurationUnavailable { .. } | Self::Origin(_) => {
                tracing::warn!(error = %self, "upstream unavailable");
            }
            Self::Internal(_) => {
                tracing::error!(error = %self, "internal fault");
            }
            Self::NotFound { .. } | Self::MethodNotAllowed { .. } => {
                tracing::debug!(error = %self, "request rejected");
            }
        }

        let heading = status.to_string();
        let markup = html! {
            (DOCTYPE)
            html lang="en" {
                head {
                    meta charset="utf-8";
                    title { (heading) }
                }
                body {
                    h1 { (heading) }
                }
            }
        };

        let mut response = Response::new(status)
            .header("Content-Type", "text/html; charset=utf-8")
            .body(markup.into_string());
        if let Self::MethodNotAllowed { allowed, .. } = &self {
            response.add_header("Allow", allow_header(allowed));
        }
        response
    }
}
