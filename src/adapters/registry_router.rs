use std::collections::HashMap;

use async_trait::async_trait;
use http::request::Parts;

use crate::{
    core::directory::{Service, ServiceEntry},
    ports::router::{RouteError, Router},
};

/// A static, configuration-backed routing collaborator.
///
/// Service entries are grouped by name into [`Service`]s. Requests are matched
/// against path prefixes; the longest matching prefix wins.
#[derive(Debug, Clone, Default)]
pub struct RegistryRouter {
    services: HashMap<String, Service>,
    // Sorted by descending prefix length
    routes: Vec<(String, String)>,
}

impl RegistryRouter {
    pub fn new(
        entries: impl IntoIterator<Item = ServiceEntry>,
        routes: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        let mut grouped: HashMap<String, Vec<ServiceEntry>> = HashMap::new();
        for entry in entries {
            grouped.entry(entry.name.clone()).or_default().push(entry);
        }
        let services = grouped
            .into_iter()
            .map(|(name, entries)| (name.clone(), Service::new(name, entries)))
            .collect();

        let mut routes: Vec<(String, String)> = routes.into_iter().collect();
        routes.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        Self { services, routes }
    }

    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.get(name)
    }

    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    /// The service name bound to the longest prefix of `path`.
    ///
    /// A prefix matches on segment boundaries: `/api` matches `/api` and
    /// `/api/users` but not `/apis`.
    pub fn find_route(&self, path: &str) -> Option<(&str, &str)> {
        self.routes
            .iter()
            .find(|(prefix, _)| prefix_matches(prefix, path))
            .map(|(prefix, service)| (prefix.as_str(), service.as_str()))
    }
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => prefix.ends_with('/') || rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[async_trait]
impl Router for RegistryRouter {
    async fn route(&self, req: &Parts) -> Result<Service, RouteError> {
        let path = req.uri.path();
        let (prefix, name) = self
            .find_route(path)
            .ok_or_else(|| RouteError::NotFound(path.to_string()))?;

        tracing::debug!("Matched route {} -> service {}", prefix, name);

        self.services
            .get(name)
            .cloned()
            .ok_or_else(|| RouteError::UnknownService(name.to_string()))
    }
}
