//! Edge listener lifecycle.
//!
//! An [`EdgeServer`] binds one listener (plaintext, static TLS or ACME),
//! serves every accepted connection through the registered handlers, and
//! stops synchronously: [`HttpServer::stop`] returns only once the listening
//! socket is closed. Connections already accepted keep running.
mod options;

use std::{
    fmt,
    mem,
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use async_trait::async_trait;
use axum::{Router, extract::ConnectInfo, routing::MethodRouter};
use hyper::{Request, body::Incoming, service::service_fn};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
};
pub use options::{ServerOption, ServerOptions};
use tokio::{sync::oneshot, task::JoinHandle};
use tower::ServiceExt;

use crate::{
    adapters::{
        listener::{bind_tcp, bind_tls},
        middleware::MiddlewareChain,
    },
    ports::{
        http_server::{HttpServer, ServerError},
        listener::{BoxedConnection, EdgeListener},
    },
};

type CloseReply = oneshot::Sender<Result<(), ServerError>>;

enum State {
    Created,
    /// Holds the channel the stop watcher waits on.
    Serving(oneshot::Sender<CloseReply>),
    Stopped,
}

/// The gateway's edge HTTP server.
pub struct EdgeServer {
    address: RwLock<String>,
    options: Mutex<ServerOptions>,
    routes: Arc<Mutex<Router>>,
    state: Mutex<State>,
}

impl EdgeServer {
    /// Create a server for `address` (`host:port`, or `:port` for every
    /// interface). Nothing is bound until [`HttpServer::start`].
    pub fn new(address: impl Into<String>, options: impl IntoIterator<Item = ServerOption>) -> Self {
        Self {
            address: RwLock::new(address.into()),
            options: Mutex::new(options.into_iter().collect()),
            routes: Arc::new(Mutex::new(Router::new())),
            state: Mutex::new(State::Created),
        }
    }

    /// Merge further options. Only handlers registered afterwards and
    /// listeners bound afterwards see the change.
    pub fn init(&self, options: impl IntoIterator<Item = ServerOption>) {
        let mut current = self.options.lock().unwrap_or_else(PoisonError::into_inner);
        for option in options {
            current.apply(option);
        }
    }

    pub fn options(&self) -> ServerOptions {
        self.options
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Register `handler` for `path` behind the middleware pipeline.
    ///
    /// A path ending in `/` serves its whole subtree; anything else matches
    /// exactly.
    ///
    /// # Panics
    /// Like axum's router, on an invalid or already registered path.
    pub fn handle(&self, path: &str, handler: MethodRouter) {
        let chain = {
            let options = self.options.lock().unwrap_or_else(PoisonError::into_inner);
            MiddlewareChain::new(options.wrappers.clone(), options.enable_cors)
        };
        let handler = chain.apply(handler);

        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        let mut router = mem::take(&mut *routes);
        if path.ends_with('/') {
            router = router
                .route(path, handler.clone())
                .route(&format!("{path}{{*rest}}"), handler);
        } else {
            router = router.route(path, handler);
        }
        *routes = router;

        tracing::debug!("Registered handler for {}", path);
    }

    async fn listen(&self, address: &str, options: &ServerOptions) -> Result<EdgeListener, ServerError> {
        let bind_error = |source| ServerError::Bind {
            address: address.to_string(),
            source,
        };

        if options.enable_acme {
            if let Some(provider) = &options.acme_provider {
                tracing::info!("Listening with ACME certificates for {:?}", options.acme_hosts);
                return provider
                    .listen(address, &options.acme_hosts)
                    .await
                    .map_err(|e| ServerError::Acme(format!("{e:#}")));
            }
        }

        if options.enable_tls {
            if let Some(config) = &options.tls_config {
                tracing::info!("Listening with static TLS certificates");
                return bind_tls(address, config.clone()).await.map_err(bind_error);
            }
        }

        bind_tcp(address).await.map_err(bind_error)
    }
}

#[async_trait]
impl HttpServer for EdgeServer {
    fn address(&self) -> String {
        self.address
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn start(&self) -> Result<(), ServerError> {
        match *self.state.lock().unwrap_or_else(PoisonError::into_inner) {
            State::Created => {}
            State::Serving(_) => return Err(ServerError::AlreadyStarted),
            State::Stopped => return Err(ServerError::Stopped),
        }

        let address = self.address();
        let options = self.options();
        let listener = self.listen(&address, &options).await?;
        let local_addr = listener.local_addr();

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !matches!(*state, State::Created) {
            // Lost a race with a concurrent start; the new listener is dropped.
            return Err(ServerError::AlreadyStarted);
        }

        *self.address.write().unwrap_or_else(PoisonError::into_inner) = local_addr.to_string();

        let (stop_tx, stop_rx) = oneshot::channel();
        let accept_loop = tokio::spawn(serve(listener, self.routes.clone(), stop_rx));

        let (exit_tx, exit_rx) = oneshot::channel::<CloseReply>();
        tokio::spawn(watch_exit(exit_rx, stop_tx, accept_loop));

        *state = State::Serving(exit_tx);
        tracing::info!("Edge server listening on {}", local_addr);
        Ok(())
    }

    async fn stop(&self) -> Result<(), ServerError> {
        let exit = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match mem::replace(&mut *state, State::Stopped) {
                State::Serving(exit) => exit,
                previous => {
                    *state = previous;
                    return Err(ServerError::NotRunning);
                }
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if exit.send(reply_tx).is_err() {
            return Err(ServerError::Close("server task is gone".to_string()));
        }
        let result = reply_rx
            .await
            .map_err(|_| ServerError::Close("server task is gone".to_string()))?;

        tracing::info!("Edge server on {} stopped", self.address());
        result
    }
}

impl fmt::Display for EdgeServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("http")
    }
}

/// Wait for a stop request (or the server being dropped), stop the accept
/// loop, and report once the listener is gone.
async fn watch_exit(
    exit: oneshot::Receiver<CloseReply>,
    stop: oneshot::Sender<()>,
    accept_loop: JoinHandle<()>,
) {
    let reply = exit.await.ok();
    let _ = stop.send(());

    let result = accept_loop
        .await
        .map_err(|e| ServerError::Close(e.to_string()));

    match reply {
        Some(reply) => {
            let _ = reply.send(result);
        }
        None => tracing::debug!("Edge server dropped without stop; listener closed"),
    }
}

async fn serve(mut listener: EdgeListener, routes: Arc<Mutex<Router>>, mut stop: oneshot::Receiver<()>) {
    loop {
        tokio::select! {
            _ = &mut stop => break,
            accepted = listener.accept() => match accepted {
                Some((conn, remote)) => {
                    let app = routes.lock().unwrap_or_else(PoisonError::into_inner).clone();
                    tokio::spawn(serve_connection(conn, remote, app));
                }
                None => {
                    tracing::warn!("Listener on {} ended", listener.local_addr());
                    break;
                }
            },
        }
    }

    let local_addr = listener.local_addr();
    drop(listener);
    tracing::debug!("Closed listener on {}", local_addr);
}

async fn serve_connection(conn: BoxedConnection, remote: SocketAddr, app: Router) {
    let service = service_fn(move |mut req: Request<Incoming>| {
        req.extensions_mut().insert(ConnectInfo(remote));
        app.clone().oneshot(req)
    });

    if let Err(e) = auto::Builder::new(TokioExecutor::new())
        .serve_connection_with_upgrades(TokioIo::new(conn), service)
        .await
    {
        tracing::debug!(client = %remote, "Connection closed with error: {}", e);
    }
}
