pub mod acme;
pub mod http_client;
pub mod listener;
pub mod middleware;
pub mod proxy_handler;
pub mod registry_router;
pub mod tls;
pub mod websocket_tunnel;

/// Re-export commonly used types from adapters
pub use acme::LetsEncryptProvider;
pub use http_client::HttpClientAdapter;
pub use middleware::{MiddlewareChain, Stage, Wrapper};
pub use proxy_handler::{ProxyError, ProxyHandler};
pub use registry_router::RegistryRouter;
pub use websocket_tunnel::{TunnelPolicy, TunnelSetupError, WebSocketTunnel};
