use std::{fmt, sync::Arc};

use crate::{adapters::middleware::Wrapper, ports::acme::AcmeProvider};

/// A single setting applied to an [`EdgeServer`](super::EdgeServer).
pub enum ServerOption {
    /// Serve through the ACME provider (needs [`ServerOption::AcmeProvider`]).
    EnableAcme(bool),
    /// Hostnames certificates are requested for. Replaces earlier hosts.
    AcmeHosts(Vec<String>),
    AcmeProvider(Arc<dyn AcmeProvider>),
    /// Serve TLS with a fixed certificate (needs [`ServerOption::TlsConfig`]).
    EnableTls(bool),
    TlsConfig(Arc<rustls::ServerConfig>),
    EnableCors(bool),
    /// Append a handler wrapper. Wrappers apply in the order given, the
    /// first one innermost.
    Wrapper(Wrapper),
}

/// The merged option set.
#[derive(Clone, Default)]
pub struct ServerOptions {
    pub enable_acme: bool,
    pub acme_hosts: Vec<String>,
    pub acme_provider: Option<Arc<dyn AcmeProvider>>,
    pub enable_tls: bool,
    pub tls_config: Option<Arc<rustls::ServerConfig>>,
    pub enable_cors: bool,
    pub wrappers: Vec<Wrapper>,
}

impl ServerOptions {
    pub fn apply(&mut self, option: ServerOption) {
        match option {
            ServerOption::EnableAcme(enabled) => self.enable_acme = enabled,
            ServerOption::AcmeHosts(hosts) => self.acme_hosts = hosts,
            ServerOption::AcmeProvider(provider) => self.acme_provider = Some(provider),
            ServerOption::EnableTls(enabled) => self.enable_tls = enabled,
            ServerOption::TlsConfig(config) => self.tls_config = Some(config),
            ServerOption::EnableCors(enabled) => self.enable_cors = enabled,
            ServerOption::Wrapper(wrapper) => self.wrappers.push(wrapper),
        }
    }
}

impl FromIterator<ServerOption> for ServerOptions {
    fn from_iter<I: IntoIterator<Item = ServerOption>>(iter: I) -> Self {
        let mut options = Self::default();
        for option in iter {
            options.apply(option);
        }
        options
    }
}

impl fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerOptions")
            .field("enable_acme", &self.enable_acme)
            .field("acme_hosts", &self.acme_hosts)
            .field("acme_provider", &self.acme_provider.is_some())
            .field("enable_tls", &self.enable_tls)
            .field("tls_config", &self.tls_config.is_some())
            .field("enable_cors", &self.enable_cors)
            .field("wrappers", &self.wrappers.len())
            .finish()
    }
}
