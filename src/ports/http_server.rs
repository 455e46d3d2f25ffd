use async_trait::async_trait;
use thiserror::Error;

/// Error type for edge server lifecycle operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ServerError {
    /// The listener could not be bound
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The ACME provider could not produce a listener
    #[error("ACME listener failed: {0}")]
    Acme(String),

    /// `start` was called on a server that is already serving
    #[error("server already started")]
    AlreadyStarted,

    /// `stop` was called before `start`, or twice
    #[error("server is not running")]
    NotRunning,

    /// The server has been stopped and cannot be restarted
    #[error("server has been stopped")]
    Stopped,

    /// Closing the listener failed
    #[error("failed to close listener: {0}")]
    Close(String),
}

/// HttpServer defines the port (interface) for the edge listener lifecycle
#[async_trait]
pub trait HttpServer: Send + Sync + 'static {
    /// The bound address; the configured listen spec until `start` succeeds
    fn address(&self) -> String;

    /// Bind and begin serving in the background
    ///
    /// # Returns
    /// As soon as the listener is bound, or the bind error
    async fn start(&self) -> Result<(), ServerError>;

    /// Stop accepting connections
    ///
    /// # Returns
    /// Only after the listener has been closed
    async fn stop(&self) -> Result<(), ServerError>;
}
