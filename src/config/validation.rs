use std::{collections::HashSet, net::SocketAddr, path::Path};

use tracing_subscriber::EnvFilter;
use url::Url;

use crate::{
    adapters::listener::normalize_listen_addr,
    config::models::{AcmeConfig, GatewayConfig, TlsConfig, TunnelConfig},
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Invalid TLS configuration: {message}")]
    InvalidTls { message: String },

    #[error("Unknown service '{service}' referenced by {referrer}")]
    UnknownService { service: String, referrer: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Gateway configuration validator. Collects every problem before failing.
pub struct GatewayConfigValidator;

impl GatewayConfigValidator {
    /// Validate the entire gateway configuration
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if config.enable_tls {
            match &config.tls {
                Some(tls) => errors.extend(Self::validate_tls_config(tls)),
                None => errors.push(ValidationError::MissingField {
                    field: "tls".to_string(),
                }),
            }
        }

        if config.enable_acme {
            match &config.acme {
                Some(acme) => errors.extend(Self::validate_acme_config(acme)),
                None => errors.push(ValidationError::MissingField {
                    field: "acme".to_string(),
                }),
            }
        }

        errors.extend(Self::validate_tunnel_config(&config.tunnel));

        if EnvFilter::try_new(&config.log.level).is_err() {
            errors.push(ValidationError::InvalidField {
                field: "log.level".to_string(),
                message: format!("'{}' is not a valid filter directive", config.log.level),
            });
        }

        errors.extend(Self::validate_services(config));
        errors.extend(Self::validate_bindings(config));

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Accepts `host:port` and `:port`
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        let invalid = |reason: &str| ValidationError::InvalidListenAddress {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        if address.is_empty() {
            return Err(invalid("Must not be empty"));
        }

        let normalized = normalize_listen_addr(address);
        if normalized.parse::<SocketAddr>().is_ok() {
            return Ok(());
        }

        match normalized.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                if host.contains('/') || host.contains(' ') {
                    Err(invalid("Host contains invalid characters"))
                } else {
                    Ok(())
                }
            }
            _ => Err(invalid(
                "Must be in format 'HOST:PORT' or ':PORT' (e.g., '127.0.0.1:3000' or ':8080')",
            )),
        }
    }

    fn validate_tls_config(config: &TlsConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for (name, path) in [("cert_path", &config.cert_path), ("key_path", &config.key_path)] {
            if path.is_empty() {
                errors.push(ValidationError::InvalidTls {
                    message: format!("{name} must not be empty"),
                });
            } else if !Path::new(path).exists() {
                errors.push(ValidationError::InvalidTls {
                    message: format!("{name} '{path}' does not exist"),
                });
            }
        }
        errors
    }

    fn validate_acme_config(config: &AcmeConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if config.hosts.is_empty() {
            errors.push(ValidationError::InvalidTls {
                message: "ACME needs at least one host".to_string(),
            });
        }
        for host in &config.hosts {
            if host.is_empty() || host.contains("://") || host.contains('/') {
                errors.push(ValidationError::InvalidField {
                    field: "acme.hosts".to_string(),
                    message: format!("'{host}' is not a bare hostname"),
                });
            }
        }
        if let Some(email) = &config.email {
            if !email.contains('@') {
                errors.push(ValidationError::InvalidField {
                    field: "acme.email".to_string(),
                    message: format!("'{email}' is not an email address"),
                });
            }
        }
        if config.cache_dir.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "acme.cache_dir".to_string(),
            });
        }

        errors
    }

    fn validate_tunnel_config(config: &TunnelConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if let Err(e) = config.dial_timeout() {
            errors.push(ValidationError::InvalidField {
                field: "tunnel.dial_timeout".to_string(),
                message: e.to_string(),
            });
        }
        if let Err(e) = config.drain_grace() {
            errors.push(ValidationError::InvalidField {
                field: "tunnel.drain_grace".to_string(),
                message: e.to_string(),
            });
        }
        errors
    }

    fn validate_services(config: &GatewayConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        for entry in &config.services {
            if entry.name.is_empty() {
                errors.push(ValidationError::MissingField {
                    field: "services[].name".to_string(),
                });
            }
            for node in &entry.nodes {
                if let Err(reason) = Self::validate_node_address(&node.address) {
                    errors.push(ValidationError::InvalidField {
                        field: format!("service '{}' node '{}'", entry.name, node.id),
                        message: reason,
                    });
                }
            }
        }

        errors
    }

    /// Node addresses must read as `host:port` once prefixed with `http://`.
    fn validate_node_address(address: &str) -> Result<(), String> {
        let Some((host, port)) = address.rsplit_once(':') else {
            return Err(format!("'{address}' has no port"));
        };
        if host.is_empty() {
            return Err(format!("'{address}' has no host"));
        }
        if port.parse::<u16>().is_err() {
            return Err(format!("'{address}' has an invalid port"));
        }

        let url = Url::parse(&format!("http://{address}")).map_err(|e| e.to_string())?;
        if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
            return Err(format!("'{address}' must be host:port only"));
        }
        Ok(())
    }

    fn validate_bindings(config: &GatewayConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let known: HashSet<&str> = config.services.iter().map(|s| s.name.as_str()).collect();

        match &config.service {
            Some(name) => {
                if !known.contains(name.as_str()) {
                    errors.push(ValidationError::UnknownService {
                        service: name.clone(),
                        referrer: "service".to_string(),
                    });
                }
            }
            None if config.routes.is_empty() => errors.push(ValidationError::MissingField {
                field: "routes (or service)".to_string(),
            }),
            None => {}
        }

        for (prefix, service) in &config.routes {
            if !prefix.starts_with('/') {
                errors.push(ValidationError::InvalidField {
                    field: format!("route path: {prefix}"),
                    message: "Route paths must start with '/'".to_string(),
                });
            }
            if !known.contains(service.as_str()) {
                errors.push(ValidationError::UnknownService {
                    service: service.clone(),
                    referrer: format!("route '{prefix}'"),
                });
            }
        }

        errors
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::directory::{Node, ServiceEntry};

    fn minimal_valid_config() -> GatewayConfig {
        GatewayConfig::builder()
            .listen_addr(":8080")
            .service_entry(ServiceEntry::new(
                "greeter",
                vec![Node::new("g-1", "127.0.0.1:9000")],
            ))
            .route("/", "greeter")
            .build()
            .unwrap()
    }

    fn error_message(config: &GatewayConfig) -> String {
        GatewayConfigValidator::validate(config)
            .unwrap_err()
            .to_string()
    }

    #[test]
    fn validate_accepts_minimal_config() {
        assert!(GatewayConfigValidator::validate(&minimal_valid_config()).is_ok());
    }

    #[test]
    fn validate_accepts_listen_spec_forms() {
        for address in [":0", "0.0.0.0:443", "[::1]:8080", "localhost:3000"] {
            assert!(
                GatewayConfigValidator::validate_listen_address(address).is_ok(),
                "{address}"
            );
        }
        for address in ["", "8080", "localhost", ":http", "a/b:80"] {
            assert!(
                GatewayConfigValidator::validate_listen_address(address).is_err(),
                "{address}"
            );
        }
    }

    #[test]
    fn validate_rejects_route_to_unknown_service() {
        let mut config = minimal_valid_config();
        config.routes.insert("/api".to_string(), "missing".to_string());

        assert!(error_message(&config).contains("Unknown service 'missing'"));
    }

    #[test]
    fn validate_rejects_unknown_static_service() {
        let mut config = minimal_valid_config();
        config.routes.clear();
        config.service = Some("nope".to_string());

        assert!(error_message(&config).contains("nope"));
    }

    #[test]
    fn validate_requires_a_binding() {
        let mut config = minimal_valid_config();
        config.routes.clear();

        assert!(error_message(&config).contains("routes"));
    }

    #[test]
    fn validate_rejects_bad_node_address() {
        let mut config = minimal_valid_config();
        config.services[0].nodes.push(Node::new("g-2", "127.0.0.1"));
        config.services[0].nodes.push(Node::new("g-3", "http://127.0.0.1:80"));

        let message = error_message(&config);
        assert!(message.contains("Found 2 validation errors"), "{message}");
    }

    #[test]
    fn validate_rejects_enabled_tls_without_files() {
        let mut config = minimal_valid_config();
        config.enable_tls = true;
        assert!(error_message(&config).contains("tls"));

        config.tls = Some(TlsConfig {
            cert_path: "/nonexistent/cert.pem".to_string(),
            key_path: "/nonexistent/key.pem".to_string(),
        });
        assert!(error_message(&config).contains("does not exist"));
    }

    #[test]
    fn validate_rejects_empty_acme_hosts() {
        let mut config = minimal_valid_config();
        config.enable_acme = true;
        config.acme = Some(AcmeConfig {
            hosts: vec![],
            email: Some("admin@example.com".to_string()),
            cache_dir: ".portico/acme".to_string(),
            production: false,
        });

        assert!(GatewayConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn validate_ignores_disabled_acme_section() {
        let mut config = minimal_valid_config();
        config.acme = Some(AcmeConfig {
            hosts: vec![],
            email: None,
            cache_dir: String::new(),
            production: false,
        });

        assert!(GatewayConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn validate_rejects_bad_durations_and_log_level() {
        let mut config = minimal_valid_config();
        config.tunnel.drain_grace = "forever".to_string();
        config.log.level = "portico=loud".to_string();

        let message = error_message(&config);
        assert!(message.contains("tunnel.drain_grace"), "{message}");
        assert!(message.contains("log.level"), "{message}");
    }
}
