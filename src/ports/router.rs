use async_trait::async_trait;
use http::request::Parts;
use thiserror::Error;

use crate::core::directory::Service;

/// Error type for routing collaborators
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RouteError {
    /// No route matches the request
    #[error("no route found for {0}")]
    NotFound(String),

    /// A route matched but names a service the registry does not know
    #[error("route points at unknown service '{0}'")]
    UnknownService(String),

    /// The routing backend itself failed
    #[error("routing failed: {0}")]
    Unavailable(String),
}

/// Router defines the port (interface) for per-request service selection
#[async_trait]
pub trait Router: Send + Sync + 'static {
    /// Select the service that should handle a request
    ///
    /// # Arguments
    /// * `req` - The head of the inbound request
    ///
    /// # Returns
    /// The matched service snapshot or a routing error
    async fn route(&self, req: &Parts) -> Result<Service, RouteError>;
}
