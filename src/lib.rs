//! # dynhtml
//!
//! A dynamic HTML delivery pipeline: an edge cache in front of an HTTP API that
//! renders a page from a value held in a configuration store.
//!
//! ```text
//! client -> edge (policy, cache) -> API endpoint (GET /html) -> renderer -> store
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dynhtml::endpoint::{ApiEndpoint, EndpointSettings};
//! use dynhtml::server::Server;
//! use dynhtml::store::MemoryStore;
//! use dynhtml::Request;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::seeded());
//!     let endpoint = ApiEndpoint::new(store, EndpointSettings::default());
//!     let server = Server::bind("127.0.0.1:8081").await?;
//!     server.run(move |req: Request| {
//!         let endpoint = endpoint.clone();
//!         async move { endpoint.handle_request(req).await }
//!     }).await?;
//!     Ok(())
//! }
//! ```

// ── Protocol and transport ────────────────────────────────────────────────────
pub mod http;
pub mod server;

// ── Request plumbing ──────────────────────────────────────────────────────────
pub mod context;
pub mod error;
pub mod middleware;
pub mod router;

// ── API tier ──────────────────────────────────────────────────────────────────
pub mod endpoint;
pub mod render;
pub mod store;

// ── Edge tier ─────────────────────────────────────────────────────────────────
pub mod cache;
pub mod edge;
pub mod security;

pub mod config;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::Router;
pub use server::{Server, ServerError};
