//! A `switchboard` transport over a message broker.
//!
//! Services are queues. A `BrokerTransport` publishes each request as an `Envelope` to the
//! queue named after its service, with the name of its own private reply queue attached, and
//! waits for the correlated response to come back on that reply queue. Serving works the
//! other way around: `listen` declares the service queue and turns the envelopes arriving on
//! it into deliveries for a `switchboard::Server`.
//!
//! The broker itself sits behind the `Broker` trait. `LocalBroker` is an in-process broker,
//! which is enough for tests and for running many services in one process.
//!
//! ```no_run
//! # async fn example() -> switchboard::Result<()> {
//! use std::sync::Arc;
//! use switchboard::{Server, Transport};
//! use switchboard_broker::{BrokerTransport, LocalBroker};
//!
//! let transport = Arc::new(BrokerTransport::new(Arc::new(LocalBroker::new()))?);
//! transport.ready().wait().await?;
//! let server = Server::new("service.example");
//! server.start(transport)?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

mod broker;
mod completion_registry;
mod envelope;
mod error;
mod transport;

pub use broker::{Broker, LocalBroker};
pub use envelope::{Envelope, Kind};
pub use error::{Error, Result};
pub use transport::{BrokerTransport, Configuration};
