pub mod directory;
pub mod forwarding;
pub mod protocol;
pub mod resolver;

pub use directory::{Node, Service, ServiceEntry};
pub use protocol::is_upgrade_request;
pub use resolver::{Binding, ResolveError, Resolver};
