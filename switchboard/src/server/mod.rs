//! Serving typed endpoints for one service over a transport.

mod endpoint;
mod router;
mod service_server;

pub use endpoint::Endpoint;
pub use service_server::{Server, ServerState};
