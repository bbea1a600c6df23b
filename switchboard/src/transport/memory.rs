use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::future::BoxFuture;
use k_lock::Mutex;
use tokio::sync::mpsc;

use crate::{Error, Request, Response};

use super::{Binding, Delivery, Listener, Readiness, Responder, Tomb, Transport};

/// Configuration for a `MemoryTransport`.
#[derive(Debug, Clone)]
pub struct Configuration {
    max_queued_requests: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            max_queued_requests: 1024,
        }
    }
}

impl Configuration {
    /// Requests that may wait for a server to accept them, per binding. Senders wait for room
    /// when it is full, and that wait counts against their timeout.
    ///
    /// Default: 1024
    pub fn max_queued_requests(&mut self, max_queued_requests: usize) {
        self.max_queued_requests = max_queued_requests.max(1);
    }
}

/// A transport that never leaves the process.
///
/// Requests are handed to the bound server through a channel and answered through a oneshot,
/// so the request context (cancellation included) reaches the handler intact. It is ready as
/// soon as it is constructed.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    configuration: Configuration,
    routes: Mutex<HashMap<String, Route>>,
    next_id: AtomicU64,
    tomb: Tomb,
}

#[derive(Debug)]
struct Route {
    binding_id: u64,
    inbound: mpsc::Sender<Delivery>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// A new transport with the default configuration.
    pub fn new() -> Self {
        Self::with_configuration(Configuration::default())
    }

    /// A new transport.
    pub fn with_configuration(configuration: Configuration) -> Self {
        log::trace!("new memory transport {configuration:?}");
        Self {
            shared: Arc::new(Shared {
                configuration,
                routes: Default::default(),
                next_id: AtomicU64::new(1),
                tomb: Tomb::new(),
            }),
        }
    }

    fn route(&self, service: &str) -> crate::Result<mpsc::Sender<Delivery>> {
        let mut routes = self.shared.routes.lock().expect("must not be poisoned");
        if self.shared.tomb.is_dying() {
            routes.clear();
            return Err(Error::TransportClosed);
        }
        routes
            .get(service)
            .map(|route| route.inbound.clone())
            .ok_or_else(|| Error::NoRoute(service.to_string()))
    }
}

impl Transport for MemoryTransport {
    fn ready(&self) -> Readiness {
        Readiness::ready()
    }

    fn tomb(&self) -> &Tomb {
        &self.shared.tomb
    }

    fn send(
        &self,
        request: Request,
        timeout: Duration,
    ) -> BoxFuture<'static, crate::Result<Response>> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let inbound = if request.service().is_empty() {
            Err(Error::InvalidRequest("request has no service"))
        } else {
            self.route(request.service())
        };
        Box::pin(async move {
            let inbound = inbound?;
            let service = request.service().to_string();
            let endpoint = request.endpoint().to_string();
            log::debug!("{id} sending to {service}/{endpoint}");

            let (responder, completion) = Responder::new();
            let exchange = async {
                inbound
                    .send(Delivery::new(request, responder))
                    .await
                    .map_err(|_| Error::NoRoute(service.clone()))?;
                completion
                    .await
                    .map_err(|_| Error::Dropped(format!("{service}/{endpoint}")))
            };
            let result = tokio::time::timeout(timeout, exchange).await;
            match result {
                Ok(result) => result,
                Err(_elapsed) => {
                    log::debug!("{id} timed out after {timeout:?}");
                    Err(Error::Timeout {
                        service,
                        endpoint,
                        after: timeout,
                    })
                }
            }
        })
    }

    fn listen(&self, service: &str) -> crate::Result<Listener> {
        if service.is_empty() {
            return Err(Error::InvalidRequest("can not listen on an empty service name"));
        }
        let mut routes = self.shared.routes.lock().expect("must not be poisoned");
        if self.shared.tomb.is_dying() {
            return Err(Error::TransportClosed);
        }
        let binding_id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (inbound, inbound_receiver) =
            mpsc::channel(self.shared.configuration.max_queued_requests);
        if let Some(previous) = routes.insert(
            service.to_string(),
            Route {
                binding_id,
                inbound,
            },
        ) {
            log::warn!(
                "{service} binding {} replaced by binding {binding_id}",
                previous.binding_id
            );
        }
        log::debug!("{service} bound as {binding_id}");
        Ok(Listener::new(Binding::new(service, binding_id), inbound_receiver))
    }

    fn unlisten(&self, binding: &Binding) {
        let mut routes = self.shared.routes.lock().expect("must not be poisoned");
        match routes.get(binding.service()) {
            Some(route) if route.binding_id == binding.id() => {
                routes.remove(binding.service());
                log::debug!("{} unbound {}", binding.service(), binding.id());
            }
            _ => {
                log::debug!(
                    "{} binding {} is not current, nothing to unbind",
                    binding.service(),
                    binding.id()
                );
            }
        }
    }
}
