use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Body as AxumBody,
    extract::ConnectInfo,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{MethodRouter, any},
};
use http::{HeaderValue, Request, Uri, request::Parts};
use thiserror::Error;
use url::Url;

use crate::{
    adapters::websocket_tunnel::{TunnelSetupError, WebSocketTunnel},
    core::{
        forwarding::{append_forwarded_for, remove_hop_by_hop},
        protocol::is_upgrade_request,
        resolver::Resolver,
    },
    ports::http_client::HttpClient,
};

/// Dispatch failures after a backend address has been resolved
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    /// The resolved address is not a usable `http://host:port` URL
    #[error("invalid backend address {address:?}: {reason}")]
    AddressParse { address: String, reason: String },

    /// The upgrade tunnel could not be set up
    #[error(transparent)]
    TunnelSetup(#[from] TunnelSetupError),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match self {
            ProxyError::AddressParse { .. } => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            ProxyError::TunnelSetup(e) => e.into_response(),
        }
    }
}

/// A resolved backend: the parsed URL plus its `host:port` authority.
struct Target {
    url: Url,
    authority: String,
}

impl Target {
    fn parse(address: &str) -> Result<Self, ProxyError> {
        let parse_error = |reason: String| ProxyError::AddressParse {
            address: address.to_string(),
            reason,
        };

        let url = Url::parse(address).map_err(|e| parse_error(e.to_string()))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| parse_error("missing host".to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| parse_error("missing port".to_string()))?;
        let authority = format!("{host}:{port}");

        Ok(Self { url, authority })
    }

    /// Absolute URI for the backend carrying the inbound path and query.
    fn request_uri(&self, inbound: &Uri) -> Result<Uri, ProxyError> {
        let path_and_query = inbound.path_and_query().map_or("/", |pq| pq.as_str());
        format!("{}://{}{}", self.url.scheme(), self.authority, path_and_query)
            .parse()
            .map_err(|e: http::uri::InvalidUri| ProxyError::AddressParse {
                address: self.url.to_string(),
                reason: e.to_string(),
            })
    }
}

/// The edge's terminal handler: resolve a backend, then either tunnel the
/// upgrade or reverse-proxy the request.
pub struct ProxyHandler {
    resolver: Arc<Resolver>,
    http_client: Arc<dyn HttpClient>,
    tunnel: WebSocketTunnel,
    preserve_host: bool,
}

impl ProxyHandler {
    pub fn new(resolver: Arc<Resolver>, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            resolver,
            http_client,
            tunnel: WebSocketTunnel::default(),
            preserve_host: true,
        }
    }

    pub fn with_tunnel(mut self, tunnel: WebSocketTunnel) -> Self {
        self.tunnel = tunnel;
        self
    }

    /// Forward the client's `Host` (the default) or let the backend authority
    /// stand in for it.
    pub fn with_preserve_host(mut self, preserve_host: bool) -> Self {
        self.preserve_host = preserve_host;
        self
    }

    /// Wrap the handler as an axum route accepting every method.
    pub fn into_route(self) -> MethodRouter {
        let handler = Arc::new(self);
        any(move |req: Request<AxumBody>| {
            let handler = handler.clone();
            async move { handler.handle(req).await }
        })
    }

    pub async fn handle(&self, req: Request<AxumBody>) -> Response {
        let client_addr = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let (parts, body) = req.into_parts();

        let address = match self.resolver.resolve(&parts).await {
            Ok(address) => address,
            Err(e) => {
                tracing::warn!("Failed to resolve backend for {}: {}", parts.uri.path(), e);
                return e.status_code().into_response();
            }
        };

        if address.is_empty() {
            tracing::warn!("Resolved an empty backend address for {}", parts.uri.path());
            return StatusCode::NOT_FOUND.into_response();
        }

        let target = match Target::parse(&address) {
            Ok(target) => target,
            Err(e) => {
                tracing::error!("{}", e);
                return e.into_response();
            }
        };

        if is_upgrade_request(&parts.headers) {
            tracing::debug!(backend = %target.authority, "Tunnelling upgrade request");
            return match self.tunnel.tunnel(&target.authority, parts, client_addr).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(backend = %target.authority, "WebSocket tunnel setup failed: {}", e);
                    ProxyError::from(e).into_response()
                }
            };
        }

        match self.forward(parts, body, &target, client_addr).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("{}", e);
                e.into_response()
            }
        }
    }

    async fn forward(
        &self,
        mut parts: Parts,
        body: AxumBody,
        target: &Target,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response, ProxyError> {
        let backend_uri = target.request_uri(&parts.uri)?;

        remove_hop_by_hop(&mut parts.headers);
        append_forwarded_for(&mut parts.headers, client_addr);

        if !self.preserve_host {
            parts.headers.remove(header::HOST);
        } else if !parts.headers.contains_key(header::HOST) {
            // HTTP/2 clients carry the host in the URI authority only.
            if let Some(value) = parts
                .uri
                .authority()
                .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
            {
                parts.headers.insert(header::HOST, value);
            }
        }

        parts.uri = backend_uri;
        let outgoing = Request::from_parts(parts, body);

        match self.http_client.send_request(outgoing).await {
            Ok(response) => {
                let (mut head, body) = response.into_parts();
                remove_hop_by_hop(&mut head.headers);
                Ok(Response::from_parts(head, body))
            }
            Err(e) => {
                tracing::error!(backend = %target.authority, "Backend request failed: {}", e);
                Ok(StatusCode::BAD_GATEWAY.into_response())
            }
        }
    }
}
