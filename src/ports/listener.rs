use std::{fmt, io, net::SocketAddr};

use futures_util::{Stream, StreamExt, TryStreamExt, stream::BoxStream};
use tokio::io::{AsyncRead, AsyncWrite};

/// Any accepted byte stream the edge server can speak HTTP over.
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedConnection = Box<dyn Connection>;

/// A bound listener, erased over plaintext, TLS and ACME transports.
///
/// Wraps a stream of accepted connections. Dropping it closes the socket.
pub struct EdgeListener {
    incoming: BoxStream<'static, io::Result<(BoxedConnection, SocketAddr)>>,
    local_addr: SocketAddr,
}

impl EdgeListener {
    /// Wrap a stream of `(connection, peer)` results bound at `local_addr`.
    pub fn new<S, I, E>(stream: S, local_addr: SocketAddr) -> Self
    where
        S: Stream<Item = Result<(I, SocketAddr), E>> + Send + 'static,
        I: Connection,
        E: fmt::Display + Send + 'static,
    {
        let incoming = stream
            .map_ok(|(io, peer)| (Box::new(io) as BoxedConnection, peer))
            .map_err(|e| io::Error::other(e.to_string()))
            .boxed();

        Self {
            incoming,
            local_addr,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the next connection. Per-connection failures such as a broken
    /// TLS handshake are logged and skipped; `None` means the source ended.
    pub async fn accept(&mut self) -> Option<(BoxedConnection, SocketAddr)> {
        loop {
            match self.incoming.next().await {
                Some(Ok(accepted)) => return Some(accepted),
                Some(Err(e)) => tracing::debug!("Accept error: {}", e),
                None => return None,
            }
        }
    }
}

impl fmt::Debug for EdgeListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeListener")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}
