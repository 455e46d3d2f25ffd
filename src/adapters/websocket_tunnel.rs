//! Raw byte tunnelling for protocol-upgrade (WebSocket) requests.
//!
//! The edge never speaks WebSocket itself. It replays the client's handshake
//! to the backend over a fresh TCP connection, relays the backend's answer,
//! and once both sides have switched protocols it splices the two sockets
//! together with a pair of byte pumps.
use std::{io, net::SocketAddr, pin::pin, time::Duration};

use axum::{
    body::Body,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures_util::future::{Either, select};
use http::{HeaderValue, Request, StatusCode, Version, header, request::Parts};
use http_body_util::Empty;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};

use crate::core::forwarding::append_forwarded_for;

/// Failures before any byte is spliced. Each is answered to the client.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TunnelSetupError {
    #[error("invalid host")]
    InvalidHost,

    #[error("dial tcp {host}: {source}")]
    Dial {
        host: String,
        #[source]
        source: io::Error,
    },

    /// The serving connection cannot hand over its socket (HTTP/2, or a
    /// request that did not come off a live connection).
    #[error("failed to connect")]
    HijackUnsupported,

    #[error("backend handshake failed: {0}")]
    Handshake(#[source] hyper::Error),
}

impl TunnelSetupError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            TunnelSetupError::Handshake(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for TunnelSetupError {
    fn into_response(self) -> Response {
        let body = match &self {
            TunnelSetupError::Handshake(_) => Body::empty(),
            other => Body::from(other.to_string()),
        };
        (self.status_code(), body).into_response()
    }
}

/// Timing knobs for tunnels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelPolicy {
    /// Upper bound on the backend TCP connect. `None` waits for the OS.
    pub dial_timeout: Option<Duration>,
    /// How long the second pump may keep running after the first one ends.
    /// Zero returns as soon as either direction finishes.
    pub drain_grace: Duration,
}

impl Default for TunnelPolicy {
    fn default() -> Self {
        Self {
            dial_timeout: None,
            drain_grace: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToBackend,
    BackendToClient,
}

/// What happened to a finished tunnel. A byte count is `None` when that pump
/// was cancelled at the end of the drain grace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelSummary {
    pub first_finished: Direction,
    pub client_to_backend: Option<u64>,
    pub backend_to_client: Option<u64>,
}

/// An established tunnel. Owns both connections; they are closed when
/// [`TunnelSession::run`] returns.
pub struct TunnelSession<C, B> {
    client: C,
    backend: B,
    drain_grace: Duration,
}

impl<C, B> TunnelSession<C, B>
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(client: C, backend: B, drain_grace: Duration) -> Self {
        Self {
            client,
            backend,
            drain_grace,
        }
    }

    /// Pump bytes both ways until one direction ends, give the other one the
    /// drain grace, then drop everything.
    pub async fn run(self) -> TunnelSummary {
        let (client_read, client_write) = tokio::io::split(self.client);
        let (backend_read, backend_write) = tokio::io::split(self.backend);

        let upstream = pin!(pump(client_read, backend_write, Direction::ClientToBackend));
        let downstream = pin!(pump(backend_read, client_write, Direction::BackendToClient));

        match select(upstream, downstream).await {
            Either::Left((sent, downstream)) => TunnelSummary {
                first_finished: Direction::ClientToBackend,
                client_to_backend: Some(sent),
                backend_to_client: drain(downstream, self.drain_grace).await,
            },
            Either::Right((received, upstream)) => TunnelSummary {
                first_finished: Direction::BackendToClient,
                client_to_backend: drain(upstream, self.drain_grace).await,
                backend_to_client: Some(received),
            },
        }
    }
}

/// Copy until EOF or error, then half-close the destination.
async fn pump<R, W>(mut reader: R, mut writer: W, direction: Direction) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let copied = match tokio::io::copy(&mut reader, &mut writer).await {
        Ok(n) => n,
        Err(e) => {
            tracing::debug!(?direction, "Tunnel copy ended with error: {}", e);
            0
        }
    };
    if let Err(e) = writer.shutdown().await {
        tracing::debug!(?direction, "Tunnel half-close failed: {}", e);
    }
    copied
}

async fn drain<F>(pump: F, grace: Duration) -> Option<u64>
where
    F: Future<Output = u64>,
{
    if grace.is_zero() {
        return None;
    }
    tokio::time::timeout(grace, pump).await.ok()
}

/// Build the request replayed to the backend: the client's head (method,
/// path and query, headers) with the forwarding chain extended. Bodyless.
fn handshake_request(
    parts: &Parts,
    host: &str,
    client_addr: Option<SocketAddr>,
) -> Request<Empty<Bytes>> {
    let mut request = Request::new(Empty::new());
    *request.method_mut() = parts.method.clone();
    *request.uri_mut() = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .parse()
        .unwrap_or_default();
    *request.version_mut() = Version::HTTP_11;
    *request.headers_mut() = parts.headers.clone();

    let headers = request.headers_mut();
    if !headers.contains_key(header::HOST) {
        let authority = parts.uri.authority().map_or(host, |a| a.as_str());
        if let Ok(value) = HeaderValue::from_str(authority) {
            headers.insert(header::HOST, value);
        }
    }
    append_forwarded_for(headers, client_addr);

    request
}

/// Tunnels upgrade requests to a backend chosen by the caller.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTunnel {
    policy: TunnelPolicy,
}

impl WebSocketTunnel {
    pub fn new(policy: TunnelPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &TunnelPolicy {
        &self.policy
    }

    async fn dial(&self, host: &str) -> Result<TcpStream, TunnelSetupError> {
        let connect = TcpStream::connect(host);
        let result = match self.policy.dial_timeout {
            Some(limit) => match tokio::time::timeout(limit, connect).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "i/o timeout")),
            },
            None => connect.await,
        };
        result.map_err(|source| TunnelSetupError::Dial {
            host: host.to_string(),
            source,
        })
    }

    /// Tunnel the request whose head is `parts` to `host` (`host:port`).
    ///
    /// Returns the response for the client: the backend's own answer to the
    /// replayed handshake. On `101` the splice runs in a background task once
    /// the serving connection hands over its socket.
    pub async fn tunnel(
        &self,
        host: &str,
        mut parts: Parts,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response, TunnelSetupError> {
        if host.is_empty() {
            return Err(TunnelSetupError::InvalidHost);
        }

        let backend_request = handshake_request(&parts, host, client_addr);
        let backend = self.dial(host).await?;

        let Some(client_upgrade) = parts.extensions.remove::<OnUpgrade>() else {
            drop(backend);
            return Err(TunnelSetupError::HijackUnsupported);
        };

        let mut builder = hyper::client::conn::http1::Builder::new();
        builder.title_case_headers(true);
        let (mut sender, conn) = builder
            .handshake(TokioIo::new(backend))
            .await
            .map_err(TunnelSetupError::Handshake)?;
        tokio::spawn(async move {
            if let Err(e) = conn.with_upgrades().await {
                tracing::debug!("Backend tunnel connection closed: {}", e);
            }
        });

        let mut backend_response = sender
            .send_request(backend_request)
            .await
            .map_err(TunnelSetupError::Handshake)?;

        if backend_response.status() != StatusCode::SWITCHING_PROTOCOLS {
            tracing::debug!(
                backend = %host,
                status = %backend_response.status(),
                "Backend declined the upgrade"
            );
            let (head, body) = backend_response.into_parts();
            return Ok(Response::from_parts(head, Body::new(body)));
        }

        let backend_upgrade = hyper::upgrade::on(&mut backend_response);
        let drain_grace = self.policy.drain_grace;
        let backend_host = host.to_string();

        tokio::spawn(async move {
            let (client, backend) = match tokio::try_join!(client_upgrade, backend_upgrade) {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::debug!(backend = %backend_host, "Connection upgrade failed: {}", e);
                    return;
                }
            };

            tracing::debug!(backend = %backend_host, "WebSocket tunnel established");
            let summary = TunnelSession::new(TokioIo::new(client), TokioIo::new(backend), drain_grace)
                .run()
                .await;
            tracing::debug!(
                backend = %backend_host,
                first_finished = ?summary.first_finished,
                client_to_backend = ?summary.client_to_backend,
                backend_to_client = ?summary.backend_to_client,
                "WebSocket tunnel closed"
            );
        });

        let (head, _) = backend_response.into_parts();
        Ok(Response::from_parts(head, Body::empty()))
    }
}
