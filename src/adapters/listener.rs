//! Plaintext and static-TLS listener factories.
use std::{io, sync::Arc};

use futures_util::stream;
use tls_listener::TlsListener;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use crate::ports::listener::EdgeListener;

/// Turn a listen spec into something `TcpListener::bind` accepts.
///
/// `:8080` means every interface and an empty spec means an ephemeral port,
/// so both get an explicit unspecified host.
pub fn normalize_listen_addr(address: &str) -> String {
    if address.is_empty() {
        "0.0.0.0:0".to_string()
    } else if address.starts_with(':') {
        format!("0.0.0.0{address}")
    } else {
        address.to_string()
    }
}

async fn bind(address: &str) -> io::Result<TcpListener> {
    TcpListener::bind(normalize_listen_addr(address)).await
}

/// Bind a plaintext TCP listener.
pub async fn bind_tcp(address: &str) -> io::Result<EdgeListener> {
    let listener = bind(address).await?;
    let local_addr = listener.local_addr()?;

    let incoming = stream::unfold(listener, |listener| async move {
        let accepted = listener.accept().await;
        Some((accepted, listener))
    });

    Ok(EdgeListener::new(incoming, local_addr))
}

/// Bind a TLS listener using a fixed certificate configuration.
pub async fn bind_tls(address: &str, config: Arc<rustls::ServerConfig>) -> io::Result<EdgeListener> {
    let listener = bind(address).await?;
    let local_addr = listener.local_addr()?;

    let acceptor = TlsAcceptor::from(config);
    let tls_listener = TlsListener::new(acceptor, listener);

    Ok(EdgeListener::new(tls_listener, local_addr))
}
