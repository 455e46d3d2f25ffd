use std::{net::SocketAddr, path::PathBuf};

use async_trait::async_trait;
use eyre::{Result, WrapErr, eyre};
use futures_util::StreamExt;
use rustls_acme::{AcmeConfig, caches::DirCache};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::compat::{FuturesAsyncReadCompatExt, TokioAsyncReadCompatExt};

use crate::{
    adapters::{listener::normalize_listen_addr, tls::install_crypto_provider},
    ports::{acme::AcmeProvider, listener::EdgeListener},
};

/// Let's Encrypt backed listener factory.
///
/// Certificates are requested lazily through the TLS-ALPN-01 challenge on the
/// listening socket itself and cached under `cache_dir`.
#[derive(Debug, Clone)]
pub struct LetsEncryptProvider {
    email: Option<String>,
    cache_dir: Option<PathBuf>,
    production: bool,
}

impl LetsEncryptProvider {
    pub fn new(email: Option<String>, cache_dir: Option<PathBuf>, production: bool) -> Self {
        Self {
            email,
            cache_dir,
            production,
        }
    }
}

#[async_trait]
impl AcmeProvider for LetsEncryptProvider {
    async fn listen(&self, address: &str, hosts: &[String]) -> Result<EdgeListener> {
        if hosts.is_empty() {
            return Err(eyre!("ACME requires at least one host"));
        }
        install_crypto_provider();

        let listener = TcpListener::bind(normalize_listen_addr(address))
            .await
            .wrap_err_with(|| format!("failed to bind {address}"))?;
        let local_addr = listener.local_addr().wrap_err("Failed to get local addr")?;

        let mut config = AcmeConfig::new(hosts.to_vec())
            .cache_option(self.cache_dir.clone().map(DirCache::new))
            .directory_lets_encrypt(self.production);
        if let Some(email) = &self.email {
            config = config.contact_push(format!("mailto:{email}"));
        }
        let state = config.state();

        tracing::info!(
            "Requesting certificates for {:?} from Let's Encrypt ({})",
            hosts,
            if self.production { "production" } else { "staging" }
        );

        let incoming = state.incoming(
            TcpListenerStream::new(listener).map(|res| res.map(|s| s.compat())),
            vec![b"http/1.1".to_vec()],
        );
        let stream = incoming.filter_map(|res| async {
            match res {
                Ok(stream) => {
                    let stream = stream.compat();
                    let addr = stream
                        .get_ref()
                        .get_ref()
                        .0
                        .get_ref()
                        .peer_addr()
                        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));
                    Some(Ok::<_, std::io::Error>((stream, addr)))
                }
                Err(e) => {
                    tracing::debug!("TLS accept error: {}", e);
                    None
                }
            }
        });

        Ok(EdgeListener::new(stream, local_addr))
    }
}
