//! Backend address resolution.
//!
//! A [`Resolver`] turns an inbound request into exactly one backend address
//! (`http://host:port`). The service comes either from a [`Binding::Static`]
//! value fixed at construction or from a [`Binding::Dynamic`] routing
//! collaborator consulted per request. Node choice is uniform-random over
//! every node of every entry, re-sampled on each call.
//!
//! The random source is owned by the resolver and can be injected or seeded,
//! so selection is reproducible under test.
use std::sync::{Arc, Mutex, PoisonError};

use http::{StatusCode, request::Parts};
use rand::{Rng, RngCore, SeedableRng, rngs::StdRng};
use thiserror::Error;

use crate::{
    core::directory::Service,
    ports::router::{RouteError, Router},
};

/// Errors produced while resolving a backend for a request
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ResolveError {
    /// Neither a static service nor a router was supplied
    #[error("no route found: resolver has no binding")]
    NoBinding,

    /// The routing collaborator rejected the request
    #[error("no route found: {0}")]
    Route(#[from] RouteError),

    /// The service resolved but has no nodes to dial
    #[error("no route found: service '{service}' has no nodes")]
    NoNodes { service: String },
}

impl ResolveError {
    /// Status the dispatcher answers with. An empty node set means the route
    /// exists but yields nothing (404); anything else is a resolution failure.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ResolveError::NoNodes { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Where the resolver gets its service from. Exactly one mode is active.
#[derive(Clone)]
pub enum Binding {
    /// Always resolve against this service, whatever the request says.
    Static(Service),
    /// Ask the router for every request.
    Dynamic(Arc<dyn Router>),
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Binding::Static(service) => f.debug_tuple("Static").field(&service.name).finish(),
            Binding::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

pub struct Resolver {
    binding: Binding,
    rng: Mutex<Box<dyn RngCore + Send>>,
}

impl Resolver {
    /// Create a resolver drawing randomness from the operating system.
    pub fn new(binding: Binding) -> Self {
        Self::with_rng(binding, StdRng::from_os_rng())
    }

    /// Create a resolver with a deterministic, seeded random source.
    pub fn with_seed(binding: Binding, seed: u64) -> Self {
        Self::with_rng(binding, StdRng::seed_from_u64(seed))
    }

    /// Create a resolver with a caller-supplied random source.
    pub fn with_rng(binding: Binding, rng: impl RngCore + Send + 'static) -> Self {
        Self {
            binding,
            rng: Mutex::new(Box::new(rng)),
        }
    }

    /// Build from two optional halves. A static service wins over a router;
    /// having neither is an error rather than a resolver that always fails.
    pub fn from_parts(
        service: Option<Service>,
        router: Option<Arc<dyn Router>>,
    ) -> Result<Self, ResolveError> {
        match (service, router) {
            (Some(service), _) => Ok(Self::new(Binding::Static(service))),
            (None, Some(router)) => Ok(Self::new(Binding::Dynamic(router))),
            (None, None) => Err(ResolveError::NoBinding),
        }
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    /// Resolve the request to a single `http://host:port` backend address.
    pub async fn resolve(&self, req: &Parts) -> Result<String, ResolveError> {
        let routed;
        let service = match &self.binding {
            Binding::Static(service) => service,
            Binding::Dynamic(router) => {
                routed = router.route(req).await?;
                &routed
            }
        };

        let address = self.select_address(service)?;
        tracing::debug!(
            service = %service.name,
            backend = %address,
            "Resolved backend for {} {}",
            req.method,
            req.uri.path()
        );
        Ok(address)
    }

    fn select_address(&self, service: &Service) -> Result<String, ResolveError> {
        let count = service.node_count();
        if count == 0 {
            return Err(ResolveError::NoNodes {
                service: service.name.clone(),
            });
        }

        let index = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .random_range(0..count);

        service
            .nodes()
            .nth(index)
            .map(|node| format!("http://{}", node.address))
            .ok_or_else(|| ResolveError::NoNodes {
                service: service.name.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use http::Request;

    use super::*;
    use crate::core::directory::{Node, ServiceEntry};

    struct FixedRouter(Service);

    #[async_trait]
    impl Router for FixedRouter {
        async fn route(&self, _req: &Parts) -> Result<Service, RouteError> {
            Ok(self.0.clone())
        }
    }

    struct FailingRouter;

    #[async_trait]
    impl Router for FailingRouter {
        async fn route(&self, req: &Parts) -> Result<Service, RouteError> {
            Err(RouteError::NotFound(req.uri.path().to_string()))
        }
    }

    fn parts(uri: &str) -> Parts {
        Request::builder()
            .uri(uri)
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    fn service_with(addresses: &[&str]) -> Service {
        let nodes = addresses
            .iter()
            .enumerate()
            .map(|(i, addr)| Node::new(format!("node-{i}"), *addr))
            .collect();
        Service::new("greeter", vec![ServiceEntry::new("greeter", nodes)])
    }

    #[tokio::test]
    async fn test_static_binding_ignores_request() {
        let resolver =
            Resolver::with_seed(Binding::Static(service_with(&["127.0.0.1:9000"])), 1);

        for uri in ["/", "/foo", "/bar/baz?x=1"] {
            let address = resolver.resolve(&parts(uri)).await.unwrap();
            assert_eq!(address, "http://127.0.0.1:9000");
        }
    }

    #[tokio::test]
    async fn test_dynamic_binding_uses_router() {
        let router = Arc::new(FixedRouter(service_with(&["10.1.1.1:8080"])));
        let resolver = Resolver::with_seed(Binding::Dynamic(router), 1);

        let address = resolver.resolve(&parts("/api")).await.unwrap();
        assert_eq!(address, "http://10.1.1.1:8080");
    }

    #[tokio::test]
    async fn test_router_error_is_propagated() {
        let resolver = Resolver::new(Binding::Dynamic(Arc::new(FailingRouter)));

        let err = resolver.resolve(&parts("/missing")).await.unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Route(RouteError::NotFound(ref path)) if path == "/missing"
        ));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_service_without_nodes_is_not_found() {
        let empty = Service::new("empty", vec![ServiceEntry::new("empty", vec![])]);
        let resolver = Resolver::new(Binding::Static(empty));

        let err = resolver.resolve(&parts("/")).await.unwrap_err();
        assert!(matches!(err, ResolveError::NoNodes { .. }));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_from_parts_requires_a_binding() {
        assert!(matches!(
            Resolver::from_parts(None, None),
            Err(ResolveError::NoBinding)
        ));

        let resolver = Resolver::from_parts(
            Some(service_with(&["127.0.0.1:1"])),
            Some(Arc::new(FailingRouter)),
        )
        .unwrap();
        assert!(matches!(resolver.binding(), Binding::Static(_)));
    }

    #[tokio::test]
    async fn test_selection_is_uniform() {
        let addresses = ["10.0.0.1:80", "10.0.0.2:80", "10.0.0.3:80"];
        let resolver = Resolver::with_seed(Binding::Static(service_with(&addresses)), 42);
        let req = parts("/");

        let trials = 30_000;
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..trials {
            let address = resolver.resolve(&req).await.unwrap();
            *counts.entry(address).or_default() += 1;
        }

        assert_eq!(counts.len(), addresses.len());
        let expected = trials / addresses.len();
        for (address, count) in counts {
            let deviation = count.abs_diff(expected);
            assert!(
                deviation < expected / 10,
                "{address} selected {count} times, expected about {expected}"
            );
        }
    }

    #[tokio::test]
    async fn test_seeded_resolvers_are_reproducible() {
        let addresses = ["a:1", "b:1", "c:1", "d:1"];
        let first = Resolver::with_seed(Binding::Static(service_with(&addresses)), 7);
        let second = Resolver::with_seed(Binding::Static(service_with(&addresses)), 7);
        let req = parts("/");

        for _ in 0..50 {
            assert_eq!(
                first.resolve(&req).await.unwrap(),
                second.resolve(&req).await.unwrap()
            );
        }
    }
}
