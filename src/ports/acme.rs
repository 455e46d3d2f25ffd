use async_trait::async_trait;
use eyre::Result;

use crate::ports::listener::EdgeListener;

/// AcmeProvider defines the port (interface) for automated-certificate listeners
#[async_trait]
pub trait AcmeProvider: Send + Sync + 'static {
    /// Bind a TLS listener whose certificates are obtained for `hosts`
    ///
    /// # Arguments
    /// * `address` - The socket address to bind (e.g. `0.0.0.0:443`)
    /// * `hosts` - Hostnames certificates are requested for
    ///
    /// # Returns
    /// A listener yielding already-terminated TLS connections
    async fn listen(&self, address: &str, hosts: &[String]) -> Result<EdgeListener>;
}
