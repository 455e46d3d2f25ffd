pub mod acme;
pub mod http_client;
pub mod http_server;
pub mod listener;
pub mod router;
