//! Configuration data structures for Portico.
//!
//! These types map directly to TOML (also YAML / JSON) configuration files and
//! carry defaults so that a minimal config stays short: a listen address, one
//! service and either a static `service` binding or some `routes`.
use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

use crate::core::directory::ServiceEntry;

fn default_listen_addr() -> String {
    ":8080".to_string()
}

fn default_true() -> bool {
    true
}

fn default_acme_cache_dir() -> String {
    ".portico/acme".to_string()
}

fn default_drain_grace() -> String {
    "1s".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GatewayConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub enable_cors: bool,
    #[serde(default)]
    pub enable_tls: bool,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    #[serde(default)]
    pub enable_acme: bool,
    #[serde(default)]
    pub acme: Option<AcmeConfig>,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub tunnel: TunnelConfig,
    #[serde(default)]
    pub log: LogConfig,
    /// Bind every request to this service instead of routing by path.
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub services: Vec<ServiceEntry>,
    /// Path prefix to service name.
    #[serde(default)]
    pub routes: HashMap<String, String>,
}

impl GatewayConfig {
    /// Create a new gateway configuration builder
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            enable_cors: false,
            enable_tls: false,
            tls: None,
            enable_acme: false,
            acme: None,
            proxy: ProxyConfig::default(),
            tunnel: TunnelConfig::default(),
            log: LogConfig::default(),
            service: None,
            services: Vec::new(),
            routes: HashMap::new(),
        }
    }
}

/// Builder for GatewayConfig to allow for cleaner configuration creation
#[derive(Default)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    /// Set the listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Register a service entry
    pub fn service_entry(mut self, entry: ServiceEntry) -> Self {
        self.config.services.push(entry);
        self
    }

    /// Bind every request to one service
    pub fn static_service(mut self, name: impl Into<String>) -> Self {
        self.config.service = Some(name.into());
        self
    }

    /// Route a path prefix to a service
    pub fn route(mut self, prefix: impl Into<String>, service: impl Into<String>) -> Self {
        self.config.routes.insert(prefix.into(), service.into());
        self
    }

    /// Serve TLS with a certificate/key pair
    pub fn tls(mut self, cert_path: impl Into<String>, key_path: impl Into<String>) -> Self {
        self.config.enable_tls = true;
        self.config.tls = Some(TlsConfig {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        });
        self
    }

    /// Serve TLS with ACME managed certificates
    pub fn acme(mut self, acme: AcmeConfig) -> Self {
        self.config.enable_acme = true;
        self.config.acme = Some(acme);
        self
    }

    pub fn enable_cors(mut self, enabled: bool) -> Self {
        self.config.enable_cors = enabled;
        self
    }

    pub fn preserve_host(mut self, preserve: bool) -> Self {
        self.config.proxy.preserve_host = preserve;
        self
    }

    pub fn tunnel(mut self, tunnel: TunnelConfig) -> Self {
        self.config.tunnel = tunnel;
        self
    }

    /// Build the final GatewayConfig
    pub fn build(self) -> Result<GatewayConfig, String> {
        if self.config.service.is_none() && self.config.routes.is_empty() {
            return Err("Either a static service or at least one route must be configured".to_string());
        }
        Ok(self.config)
    }
}

/// Certificate/key pair for static TLS.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// Path to PEM encoded certificate chain
    pub cert_path: String,
    /// Path to PEM encoded private key
    pub key_path: String,
}

/// ACME (Let's Encrypt) certificate management configuration.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AcmeConfig {
    /// Hostnames to request certificates for
    pub hosts: Vec<String>,
    /// Contact email for the ACME account
    #[serde(default)]
    pub email: Option<String>,
    /// Where issued certificates and account keys are cached
    #[serde(default = "default_acme_cache_dir")]
    pub cache_dir: String,
    /// Use the production directory instead of staging
    #[serde(default)]
    pub production: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ProxyConfig {
    /// Forward the client's `Host` header to the backend
    #[serde(default = "default_true")]
    pub preserve_host: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            preserve_host: true,
        }
    }
}

/// Tunnel timing, as humantime strings ("500ms", "10s").
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TunnelConfig {
    pub dial_timeout: Option<String>,
    #[serde(default = "default_drain_grace")]
    pub drain_grace: String,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            dial_timeout: None,
            drain_grace: default_drain_grace(),
        }
    }
}

impl TunnelConfig {
    pub fn dial_timeout(&self) -> Result<Option<Duration>, humantime::DurationError> {
        self.dial_timeout
            .as_deref()
            .map(humantime::parse_duration)
            .transpose()
    }

    pub fn drain_grace(&self) -> Result<Duration, humantime::DurationError> {
        humantime::parse_duration(&self.drain_grace)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. "info" or "portico=debug,hyper=warn"
    #[serde(default = "default_log_level")]
    pub level: String,
    /// JSON lines instead of human readable output
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
