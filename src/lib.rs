//! Portico - the edge routing core of an API gateway.
//!
//! Portico accepts inbound HTTP requests, resolves each one to a backend node
//! through a pluggable routing collaborator, and forwards it either as a
//! regular reverse-proxied call or, for WebSocket upgrade handshakes, as a raw
//! bidirectional byte tunnel. It owns the edge listener lifecycle (plaintext,
//! static TLS or ACME) and the handler pipeline around it.
//!
//! # Features
//! - Static or per-request service binding with uniform-random node selection
//! - Transparent reverse proxying with hop-by-hop stripping and `X-Forwarded-For`
//! - WebSocket tunnelling over the upgraded client connection
//! - Plaintext, static certificate and Let's Encrypt listeners
//! - Ordered handler pipeline: caller wrappers, CORS, combined access log
//! - Synchronous stop: the listener is closed when `stop` returns
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use portico::{
//!     EdgeServer, HttpClientAdapter, HttpServer, ProxyHandler, Resolver,
//!     core::{Binding, Node, Service, ServiceEntry},
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let service = Service::new(
//!     "greeter",
//!     vec![ServiceEntry::new("greeter", vec![Node::new("g-1", "127.0.0.1:9000")])],
//! );
//! let resolver = Arc::new(Resolver::new(Binding::Static(service)));
//! let proxy = ProxyHandler::new(resolver, Arc::new(HttpClientAdapter::new()?));
//!
//! let server = EdgeServer::new(":8080", []);
//! server.handle("/", proxy.into_route());
//! server.start().await?;
//! # server.stop().await?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations)
//! while keeping the resolution and protocol logic inside `core`. The edge
//! server in `server` ties a listener to the adapters.
//!
//! # Error Handling
//! Library errors are `thiserror` enums per concern; application code uses
//! `eyre::Result<T>` with `WrapErr` context.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;
pub mod server;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{HttpClientAdapter, LetsEncryptProvider, ProxyHandler, RegistryRouter},
    core::Resolver,
    ports::{http_client::HttpClient, http_server::HttpServer},
    server::{EdgeServer, ServerOption},
    utils::GracefulShutdown,
};
