use std::sync::Arc;

use k_lock::Mutex;

use crate::{
    transport::{Binding, Transport},
    Error,
};

use super::{router::Router, Endpoint};

/// Where a `Server` is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Constructed, not yet bound to a transport.
    Created,
    /// Bound to a transport and accepting requests.
    Started,
    /// No longer accepting requests.
    Stopped,
}

enum Lifecycle {
    Created,
    Started {
        transport: Arc<dyn Transport>,
        binding: Binding,
    },
    Stopped,
}

/// Serves one service: owns its endpoint table and routes every inbound request to a handler.
///
/// The server does not own the transport it is started on. Stopping a server unbinds its
/// service and leaves the transport to whoever else is using it.
///
/// ```no_run
/// # async fn example() -> switchboard::Result<()> {
/// use std::sync::Arc;
/// use switchboard::{BoxError, Endpoint, MemoryTransport, Request, Server};
///
/// let server = Server::new("service.greeter");
/// server.add_endpoints([Endpoint::new(
///     "hello",
///     |request: Request, name: String| async move {
///         Ok::<_, BoxError>(request.reply(format!("hello, {name}")))
///     },
/// )]);
/// server.start(Arc::new(MemoryTransport::new()))?;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    router: Arc<Router>,
    lifecycle: Mutex<Lifecycle>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("service_name", &self.router.service_name())
            .field("state", &self.state())
            .field("endpoints", &self.router.endpoint_names())
            .finish()
    }
}

impl Server {
    /// A server for `service_name`, not yet started.
    ///
    /// # Panics
    ///
    /// If `service_name` is empty.
    pub fn new(service_name: impl Into<String>) -> Self {
        let service_name = service_name.into();
        assert!(!service_name.is_empty(), "a server needs a service name");
        Self {
            router: Arc::new(Router::new(service_name)),
            lifecycle: Mutex::new(Lifecycle::Created),
        }
    }

    /// The service this server serves.
    pub fn service_name(&self) -> &str {
        self.router.service_name()
    }

    /// Names of the registered endpoints, sorted.
    pub fn endpoint_names(&self) -> Vec<String> {
        self.router.endpoint_names()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        match *self.lifecycle.lock().expect("must not be poisoned") {
            Lifecycle::Created => ServerState::Created,
            Lifecycle::Started { .. } => ServerState::Started,
            Lifecycle::Stopped => ServerState::Stopped,
        }
    }

    /// Register endpoints. Works before and after `start`, concurrently with dispatch.
    ///
    /// # Panics
    ///
    /// If an endpoint has an empty name, or a name that is already registered (including
    /// twice within `endpoints`). A bad registration is a programming error, and none of the
    /// batch is registered.
    pub fn add_endpoints(&self, endpoints: impl IntoIterator<Item = Endpoint>) {
        if let Err(message) = self.router.add(endpoints.into_iter().collect()) {
            panic!("{message}");
        }
    }

    /// Bind to `transport` and start serving. Only legal once, from `Created`.
    ///
    /// Each request is handled on its own task, tracked by the transport's tomb.
    pub fn start(&self, transport: Arc<dyn Transport>) -> crate::Result<()> {
        let mut lifecycle = self.lifecycle.lock().expect("must not be poisoned");
        if !matches!(*lifecycle, Lifecycle::Created) {
            return Err(Error::InvalidState("a server can only be started once"));
        }
        let listener = transport.listen(self.router.service_name())?;
        let binding = listener.binding().clone();
        let tomb = transport.tomb().clone();
        tomb.spawn(self.router.clone().accept(listener, tomb.clone()));
        log::info!("{} started", self.router.service_name());
        *lifecycle = Lifecycle::Started { transport, binding };
        Ok(())
    }

    /// Stop accepting requests. Requests already accepted still get their responses.
    ///
    /// Stopping a stopped server does nothing. Stopping a server that was never started is
    /// an error.
    pub fn stop(&self) -> crate::Result<()> {
        let mut lifecycle = self.lifecycle.lock().expect("must not be poisoned");
        match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Created => {
                *lifecycle = Lifecycle::Created;
                Err(Error::InvalidState("a server must be started before it is stopped"))
            }
            Lifecycle::Started { transport, binding } => {
                transport.unlisten(&binding);
                log::info!("{} stopped", self.router.service_name());
                Ok(())
            }
            Lifecycle::Stopped => Ok(()),
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Ok(lifecycle) = self.lifecycle.lock() {
            if let Lifecycle::Started { transport, binding } = &*lifecycle {
                log::debug!("{} dropped while started", binding.service());
                transport.unlisten(binding);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, time::Duration};

    use crate::{
        transport::Transport, BoxError, Endpoint, Error, MemoryTransport, Request,
    };

    use super::{Server, ServerState};

    fn noop(name: &str) -> Endpoint {
        Endpoint::new(name, |request: Request, _: ()| async move {
            Ok::<_, BoxError>(request.reply(()))
        })
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn duplicate_endpoint_panics() {
        let server = Server::new("service.example");
        server.add_endpoints([noop("dummy")]);
        server.add_endpoints([noop("dummy")]);
    }

    #[test]
    #[should_panic(expected = "must have a name")]
    fn unnamed_endpoint_panics() {
        let server = Server::new("service.example");
        server.add_endpoints([noop("")]);
    }

    #[test]
    #[should_panic(expected = "needs a service name")]
    fn unnamed_server_panics() {
        let _ = Server::new("");
    }

    #[tokio::test]
    async fn lifecycle() {
        let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new());
        let server = Server::new("service.example");
        assert_eq!(ServerState::Created, server.state());
        assert!(matches!(server.stop(), Err(Error::InvalidState(_))));
        assert_eq!(ServerState::Created, server.state());

        server.start(transport.clone()).expect("starts");
        assert_eq!(ServerState::Started, server.state());
        assert!(matches!(
            server.start(transport.clone()),
            Err(Error::InvalidState(_))
        ));

        server.stop().expect("stops");
        server.stop().expect("stopping twice is harmless");
        assert_eq!(ServerState::Stopped, server.state());
        assert!(matches!(
            server.start(transport.clone()),
            Err(Error::InvalidState(_))
        ));

        let result = transport
            .send(Request::new("service.example", "dummy"), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(Error::NoRoute(_))));
    }

    #[tokio::test]
    async fn start_on_a_dead_transport_stays_created() {
        let transport = Arc::new(MemoryTransport::new());
        transport.tomb().kill("gone");
        let server = Server::new("service.example");
        assert!(matches!(
            server.start(transport),
            Err(Error::TransportClosed)
        ));
        assert_eq!(ServerState::Created, server.state());
    }

    #[tokio::test]
    async fn dropping_a_started_server_unbinds() {
        let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new());
        {
            let server = Server::new("service.example");
            server.start(transport.clone()).expect("starts");
        }
        let result = transport
            .send(Request::new("service.example", "dummy"), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(Error::NoRoute(_))));
    }

    #[test]
    fn endpoints_are_listed() {
        let server = Server::new("service.example");
        server.add_endpoints([noop("b"), noop("a")]);
        assert_eq!(vec!["a", "b"], server.endpoint_names());
        assert_eq!("service.example", server.service_name());
    }
}
