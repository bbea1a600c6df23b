//! The substrate requests and responses travel over.
//!
//! A `Transport` does two jobs. On the calling side, `send` delivers a request to whatever is
//! bound to `request.service()` and waits for the correlated response. On the serving side,
//! `listen` binds a service name and yields a stream of `Delivery`s, each of which must be
//! answered through its `Responder`.
//!
//! Transports are shared. Many servers may bind and unbind on one transport over its lifetime,
//! and the transport's `Tomb` is the shutdown switch for all of them.

mod memory;
mod readiness;
mod tomb;

use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};

use crate::{Request, Response};

pub use memory::{Configuration as MemoryConfiguration, MemoryTransport};
pub use readiness::{readiness, Readiness, ReadinessTrigger};
pub use tomb::Tomb;

/// Moves requests to services and responses back to callers.
///
/// Implementations must behave identically as observed through this trait:
/// * `send` fails fast with `Error::NoRoute` when nothing is bound to the service,
///   with `Error::TransportClosed` once the tomb is dying, and with `Error::Timeout`
///   when no response arrives in time.
/// * `listen` on a service that is already bound replaces the earlier binding, whose
///   listener then runs dry.
/// * `unlisten` only removes the binding if it is still the current one.
pub trait Transport: Send + Sync + 'static {
    /// Fires once the transport can carry traffic.
    fn ready(&self) -> Readiness;

    /// The termination controller shared by everything using this transport.
    fn tomb(&self) -> &Tomb;

    /// Send a request and wait up to `timeout` for its response.
    fn send(&self, request: Request, timeout: Duration)
        -> BoxFuture<'static, crate::Result<Response>>;

    /// Start receiving requests addressed to `service`.
    fn listen(&self, service: &str) -> crate::Result<Listener>;

    /// Stop receiving requests for a binding made by `listen`.
    fn unlisten(&self, binding: &Binding);
}

/// One registration of a service on a transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Binding {
    service: String,
    id: u64,
}

impl Binding {
    /// For transport implementations: the id must be unique per transport.
    pub fn new(service: impl Into<String>, id: u64) -> Self {
        Self {
            service: service.into(),
            id,
        }
    }

    /// The bound service name.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Distinguishes this binding from earlier and later bindings of the same service.
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// The serving side of a binding: inbound deliveries for one service.
#[derive(Debug)]
pub struct Listener {
    binding: Binding,
    inbound: mpsc::Receiver<Delivery>,
}

impl Listener {
    /// For transport implementations.
    pub fn new(binding: Binding, inbound: mpsc::Receiver<Delivery>) -> Self {
        Self { binding, inbound }
    }

    /// The binding this listener serves.
    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    /// The next inbound request. `None` once the binding is gone and everything that was
    /// already queued has been received.
    pub async fn next(&mut self) -> Option<Delivery> {
        self.inbound.recv().await
    }

    /// Refuse anything new, while still yielding what is already queued.
    pub fn close(&mut self) {
        self.inbound.close();
    }
}

/// An inbound request and the way to answer it.
#[derive(Debug)]
pub struct Delivery {
    request: Request,
    responder: Responder,
}

impl Delivery {
    /// For transport implementations.
    pub fn new(request: Request, responder: Responder) -> Self {
        Self { request, responder }
    }

    /// Split into the request and its responder.
    pub fn into_parts(self) -> (Request, Responder) {
        (self.request, self.responder)
    }
}

/// Answers exactly one request.
///
/// Dropping a responder without answering leaves the caller with `Error::Dropped`.
#[derive(Debug)]
pub struct Responder {
    completion: oneshot::Sender<Response>,
}

impl Responder {
    /// For transport implementations: a responder and the receiving end its response goes to.
    pub fn new() -> (Self, oneshot::Receiver<Response>) {
        let (completion, receiver) = oneshot::channel();
        (Self { completion }, receiver)
    }

    /// Send the response back toward the caller.
    pub fn respond(self, response: Response) {
        if let Err(response) = self.completion.send(response) {
            log::debug!(
                "caller of {}/{} is gone, response abandoned",
                response.service(),
                response.endpoint()
            );
        }
    }
}
